//! Line-window chunking: the unit of embedding is a fixed window of lines
//! advanced by `chunk_size - overlap`.
//!
//! Chunking is pure and deterministic — identical input always yields the
//! same windows, which is what lets the checksum gate skip re-chunking
//! entirely. Windows ignore structural boundaries; a chunk may split a
//! function mid-body.

use crate::error::{KestrelError, Result};
use crate::models::{estimate_tokens, CodeChunk};

/// A window of 1-based, inclusive line numbers.
pub type LineSpan = (u32, u32);

/// Compute the chunk windows for a file of `line_count` lines.
///
/// Invariants: windows cover every line `1..=line_count`; consecutive
/// windows overlap by exactly `overlap` lines except possibly the last,
/// which is truncated to the file's end.
pub fn window_spans(line_count: u32, chunk_size: u32, overlap: u32) -> Result<Vec<LineSpan>> {
    if chunk_size == 0 {
        return Err(KestrelError::Configuration(
            "chunk size must be at least 1 line".to_string(),
        ));
    }
    // overlap >= chunk_size would make the window never advance.
    if overlap >= chunk_size {
        return Err(KestrelError::Configuration(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
        )));
    }

    let step = chunk_size - overlap;
    let mut spans = Vec::new();
    let mut start = 1u32;
    while start <= line_count {
        let end = (start + chunk_size - 1).min(line_count);
        spans.push((start, end));
        if end == line_count {
            break;
        }
        start += step;
    }
    Ok(spans)
}

/// Chunk file content into `CodeChunk`s with contiguous indices and a
/// uniform `total_chunks`.
pub fn chunk_content(
    content: &str,
    file_path: &str,
    language: &str,
    chunk_size: u32,
    overlap: u32,
) -> Result<Vec<CodeChunk>> {
    let lines: Vec<&str> = content.lines().collect();
    let spans = window_spans(lines.len() as u32, chunk_size, overlap)?;
    let total = spans.len() as u32;

    let chunks = spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            let body = lines[(start - 1) as usize..end as usize].join("\n");
            CodeChunk {
                file_path: file_path.to_string(),
                language: language.to_string(),
                token_estimate: estimate_tokens(&body),
                content: body,
                start_line: start,
                end_line: end,
                chunk_index: index as u32,
                total_chunks: total,
                embedding: None,
            }
        })
        .collect();

    Ok(chunks)
}
