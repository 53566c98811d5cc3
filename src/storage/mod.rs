pub mod lance;
pub mod sqlite;

pub use lance::LanceVectorStore;
pub use sqlite::SqliteStorage;
