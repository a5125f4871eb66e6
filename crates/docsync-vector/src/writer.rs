use anyhow::{ensure, Result};
use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use lancedb::Table;
use std::sync::Arc;
use tracing::debug;

use docsync_core::VectorEntry;

use crate::schema::chunk_schema;

const WRITE_BATCH: usize = 1000;

pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

pub fn entries_to_record_batch(entries: &[VectorEntry], dim: i32) -> Result<RecordBatch> {
    let mut ids = Vec::with_capacity(entries.len());
    let mut doc_ids = Vec::with_capacity(entries.len());
    let mut doc_paths = Vec::with_capacity(entries.len());
    let mut contents = Vec::with_capacity(entries.len());
    let mut hashes = Vec::with_capacity(entries.len());
    let mut chunk_indices = Vec::with_capacity(entries.len());
    let mut total_chunks = Vec::with_capacity(entries.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
    for e in entries {
        ensure!(e.vector.len() == dim as usize, "entry {} has {} dimensions, table expects {dim}", e.id, e.vector.len());
        ids.push(e.id.clone());
        doc_ids.push(e.chunk.doc_id.to_string());
        doc_paths.push(e.chunk.doc_path.clone());
        hashes.push(content_hash(&e.chunk.content));
        contents.push(e.chunk.content.clone());
        chunk_indices.push(i32::try_from(e.chunk.chunk_index)?);
        total_chunks.push(i32::try_from(e.chunk.total_chunks)?);
        vectors.push(Some(e.vector.iter().map(|&x| Some(x)).collect()));
    }
    let batch = RecordBatch::try_new(
        chunk_schema(dim),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(doc_paths)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(hashes)),
            Arc::new(Int32Array::from(chunk_indices)),
            Arc::new(Int32Array::from(total_chunks)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
        ],
    )?;
    Ok(batch)
}

pub async fn insert_entries(table: &Table, entries: &[VectorEntry], dim: i32) -> Result<()> {
    for slice in entries.chunks(WRITE_BATCH) {
        let batch = entries_to_record_batch(slice, dim)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        table.add(reader).execute().await?;
        debug!(rows = slice.len(), table = table.name(), "appended rows");
    }
    Ok(())
}
