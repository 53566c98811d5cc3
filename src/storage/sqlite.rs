//! SQLite adapters for the metadata store and the incremental index
//! registry. Both live in one database; writes per file run inside a
//! transaction so a record replace is all-or-nothing.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::error::{KestrelError, Result};
use crate::models::{
    FunctionInfo, FunctionMatch, ImportInfo, MetadataStatistics, ProjectRecord,
    StructuralMetadata,
};
use crate::ports::{IndexRegistryStore, MetadataStore};

/// SQLite storage for structural metadata and the checksum registry.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", db_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&connection_string)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| KestrelError::Storage(e.to_string()))?;
        tracing::info!("SQLite migrations completed");
        Ok(())
    }

    /// Quick connectivity check — runs SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStorage {
    async fn store_metadata(&self, metadata: &StructuralMetadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let file_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO structural_files (file_path, language, analyzed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                language = excluded.language,
                analyzed_at = excluded.analyzed_at
            RETURNING id
            "#,
        )
        .bind(&metadata.file_path)
        .bind(&metadata.language)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&mut *tx)
        .await?;

        // Full replace: no merge, no orphans from a prior version.
        sqlx::query("DELETE FROM functions WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM imports WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM file_types WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        for function in &metadata.functions {
            let params_json =
                serde_json::to_string(&function.parameters).unwrap_or_else(|_| "[]".to_string());
            sqlx::query(
                "INSERT INTO functions (file_id, name, line, parameters) VALUES (?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(&function.name)
            .bind(function.line as i64)
            .bind(params_json)
            .execute(&mut *tx)
            .await?;
        }

        for import in &metadata.imports {
            sqlx::query(
                "INSERT INTO imports (file_id, statement, line, module) VALUES (?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(&import.statement)
            .bind(import.line as i64)
            .bind(&import.module)
            .execute(&mut *tx)
            .await?;
        }

        for type_name in &metadata.types {
            sqlx::query("INSERT INTO file_types (file_id, name) VALUES (?, ?)")
                .bind(file_id)
                .bind(type_name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_metadata(&self, file_path: &str) -> Result<Option<StructuralMetadata>> {
        let file_row = sqlx::query("SELECT id, language FROM structural_files WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        let Some(file_row) = file_row else {
            return Ok(None);
        };
        let file_id: i64 = file_row.get("id");
        let language: String = file_row.get("language");

        let function_rows =
            sqlx::query("SELECT name, line, parameters FROM functions WHERE file_id = ? ORDER BY line")
                .bind(file_id)
                .fetch_all(&self.pool)
                .await?;
        let functions = function_rows
            .into_iter()
            .map(|row| FunctionInfo {
                name: row.get("name"),
                line: row.get::<i64, _>("line") as u32,
                parameters: serde_json::from_str(row.get::<String, _>("parameters").as_str())
                    .unwrap_or_default(),
            })
            .collect();

        let import_rows =
            sqlx::query("SELECT statement, line, module FROM imports WHERE file_id = ? ORDER BY line")
                .bind(file_id)
                .fetch_all(&self.pool)
                .await?;
        let imports = import_rows
            .into_iter()
            .map(|row| ImportInfo {
                statement: row.get("statement"),
                line: row.get::<i64, _>("line") as u32,
                module: row.get("module"),
            })
            .collect();

        let type_rows = sqlx::query("SELECT name FROM file_types WHERE file_id = ? ORDER BY id")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
        let types = type_rows.into_iter().map(|row| row.get("name")).collect();

        Ok(Some(StructuralMetadata {
            file_path: file_path.to_string(),
            language,
            functions,
            imports,
            types,
        }))
    }

    async fn delete_metadata(&self, file_path: &str) -> Result<()> {
        // Children are deleted explicitly; pooled connections may not have
        // the foreign_keys pragma applied.
        let mut tx = self.pool.begin().await?;
        for table in ["functions", "imports", "file_types"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE file_id IN (SELECT id FROM structural_files WHERE file_path = ?)"
            ))
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM structural_files WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn statistics(&self) -> Result<MetadataStatistics> {
        let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM structural_files")
            .fetch_one(&self.pool)
            .await?;
        let total_functions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM functions")
            .fetch_one(&self.pool)
            .await?;

        let rows =
            sqlx::query("SELECT language, COUNT(*) AS files FROM structural_files GROUP BY language")
                .fetch_all(&self.pool)
                .await?;
        let language_breakdown = rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("language"),
                    row.get::<i64, _>("files") as u64,
                )
            })
            .collect();

        Ok(MetadataStatistics {
            total_files: total_files as u64,
            total_functions: total_functions as u64,
            language_breakdown,
        })
    }

    async fn search_functions(&self, substring: &str) -> Result<Vec<FunctionMatch>> {
        let pattern = format!(
            "%{}%",
            substring.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let rows = sqlx::query(
            r#"
            SELECT f.name, f.line, s.file_path
            FROM functions f
            JOIN structural_files s ON s.id = f.file_id
            WHERE f.name LIKE ? ESCAPE '\'
            ORDER BY s.file_path, f.line
            "#,
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FunctionMatch {
                file_path: row.get("file_path"),
                function_name: row.get("name"),
                line: row.get::<i64, _>("line") as u32,
            })
            .collect())
    }
}

#[async_trait]
impl IndexRegistryStore for SqliteStorage {
    async fn get(&self, project_id: &str, file_path: &str) -> Result<Option<String>> {
        let hash = sqlx::query_scalar(
            "SELECT content_hash FROM index_registry WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn commit(&self, project_id: &str, file_path: &str, hash: &str) -> Result<()> {
        // Key-level upsert: concurrent per-file commits serialize here.
        sqlx::query(
            r#"
            INSERT INTO index_registry (project_id, file_path, content_hash, indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(project_id)
        .bind(file_path)
        .bind(hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_files(&self, project_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar(
            "SELECT file_path FROM index_registry WHERE project_id = ? ORDER BY file_path",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn remove(&self, project_id: &str, file_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_registry WHERE project_id = ? AND file_path = ?")
            .bind(project_id)
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_project(&self, project: &ProjectRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (project_id, root_path, collection, last_indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                root_path = excluded.root_path,
                collection = excluded.collection,
                last_indexed_at = excluded.last_indexed_at
            "#,
        )
        .bind(&project.project_id)
        .bind(&project.root_path)
        .bind(&project.collection)
        .bind(project.last_indexed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query(
            "SELECT project_id, root_path, collection, last_indexed_at FROM projects WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| ProjectRecord {
            project_id: row.get("project_id"),
            root_path: row.get("root_path"),
            collection: row.get("collection"),
            last_indexed_at: row.get("last_indexed_at"),
        }))
    }
}
