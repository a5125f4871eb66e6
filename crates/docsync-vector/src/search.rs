use anyhow::{anyhow, Result};
use arrow_array::{Array, Float32Array, Int32Array, RecordBatch, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};

use docsync_core::{Chunk, DocumentId, SearchHit};

pub async fn nearest(table: &Table, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
    let batches: Vec<RecordBatch> = table
        .vector_search(query.to_vec())?
        .distance_type(DistanceType::Cosine)
        .limit(k)
        .execute()
        .await?
        .try_collect()
        .await?;
    let mut hits = Vec::new();
    for batch in &batches {
        hits.extend(hits_from_batch(batch)?);
    }
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    Ok(hits)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("result column {name} missing or mistyped"))
}

pub fn hits_from_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let ids = column::<StringArray>(batch, "id")?;
    let doc_ids = column::<StringArray>(batch, "doc_id")?;
    let doc_paths = column::<StringArray>(batch, "doc_path")?;
    let contents = column::<StringArray>(batch, "content")?;
    let chunk_indices = column::<Int32Array>(batch, "chunk_index")?;
    let total_chunks = column::<Int32Array>(batch, "total_chunks")?;
    // Cosine distance; 1 - d is the similarity.
    let distances = column::<Float32Array>(batch, "_distance").ok();

    let mut hits = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let doc_id = DocumentId::new(doc_ids.value(i)).ok_or_else(|| anyhow!("row {i} has an invalid doc_id"))?;
        let chunk = Chunk {
            id: ids.value(i).to_string(),
            doc_id,
            doc_path: doc_paths.value(i).to_string(),
            content: contents.value(i).to_string(),
            chunk_index: usize::try_from(chunk_indices.value(i))?,
            total_chunks: usize::try_from(total_chunks.value(i))?,
        };
        let score = distances.map_or(0.0, |d| 1.0 - d.value(i));
        hits.push(SearchHit { chunk, score });
    }
    Ok(hits)
}
