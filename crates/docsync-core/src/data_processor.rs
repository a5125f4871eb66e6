//! Default chunker: paragraphs, with long paragraphs split into overlapping
//! word windows.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::ChunkingSettings;
use crate::traits::Chunker;
use crate::types::{Chunk, DocumentId};

#[derive(Debug, Clone, Default)]
pub struct DataProcessor {
    chunking: ChunkingSettings,
}

impl DataProcessor {
    pub fn new(chunking: ChunkingSettings) -> Self {
        Self { chunking }
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        let bytes = fs::read(file_path).with_context(|| format!("reading {}", file_path.display()))?;
        Ok(match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    pub fn chunk_content(&self, content: &str, doc_id: &DocumentId, file_path: &Path) -> Vec<Chunk> {
        let doc_path = file_path.to_string_lossy().to_string();
        let normalized = content.replace("\r\n", "\n");
        let mut pieces = Vec::new();
        for paragraph in normalized.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            if self.count_tokens(paragraph) <= self.chunking.max_tokens {
                pieces.push(paragraph.to_string());
            } else {
                pieces.extend(self.split_paragraph_with_overlap(paragraph));
            }
        }
        let total_chunks = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| Chunk {
                id: Chunk::chunk_id(doc_id, chunk_index),
                doc_id: doc_id.clone(),
                doc_path: doc_path.clone(),
                content,
                chunk_index,
                total_chunks,
            })
            .collect()
    }

    // Rough estimate: one token per 0.75 words.
    fn count_tokens(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f32 / 0.75) as usize
    }

    fn split_paragraph_with_overlap(&self, paragraph: &str) -> Vec<String> {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        let words_per_chunk = self.chunking.words_per_chunk.max(1);
        let overlap_words = ((words_per_chunk as f32 * self.chunking.overlap_percent) as usize).min(words_per_chunk - 1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + words_per_chunk).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end >= words.len() {
                break;
            }
            start = end - overlap_words;
        }
        chunks
    }
}

impl Chunker for DataProcessor {
    fn chunk(&self, doc_id: &DocumentId, path: &Path) -> Result<Vec<Chunk>> {
        let content = self.read_file_content(path)?;
        Ok(self.chunk_content(&content, doc_id, path))
    }
}
