//! docsync-vector
//!
//! LanceDB-backed [`VectorStore`]. A storage location is a LanceDB directory;
//! the collection is a table inside it, and a small meta table records which
//! collection the location was created for.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use lancedb::{Connection, Table};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use docsync_core::traits::{VectorIndex, VectorStore};
use docsync_core::{Error, Result, SearchHit, VectorEntry};

pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

use schema::{chunk_schema, vector_dim, META_TABLE};

const COLLECTION_KEY: &str = "collection";

#[derive(Clone)]
pub struct LanceStore {
    rt: Arc<Runtime>,
}

impl LanceStore {
    pub fn new() -> Result<Self> {
        let rt = Runtime::new().map_err(Error::vector_store)?;
        Ok(Self { rt: Arc::new(rt) })
    }

    fn connect(&self, location: &Path) -> Result<Connection> {
        let uri = location.to_string_lossy();
        self.rt.block_on(table::open_db(&uri)).map_err(Error::vector_store)
    }
}

impl VectorStore for LanceStore {
    type Index = LanceIndex;

    fn exists(&self, location: &Path, collection: &str) -> Result<bool> {
        if !location.is_dir() {
            return Ok(false);
        }
        let conn = self.connect(location)?;
        self.rt
            .block_on(async {
                let recorded = table::get_meta(&conn, COLLECTION_KEY).await?;
                Ok::<_, anyhow::Error>(
                    recorded.as_deref() == Some(collection) && table::has_table(&conn, collection).await?,
                )
            })
            .map_err(Error::vector_store)
    }

    fn create_or_open(&self, location: &Path, collection: &str, dim: usize) -> Result<LanceIndex> {
        if collection == META_TABLE {
            return Err(Error::InvalidConfig(format!("collection name '{META_TABLE}' is reserved")));
        }
        let dim_i32 = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("vector dimension {dim} is too large")))?;
        std::fs::create_dir_all(location).map_err(Error::vector_store)?;
        let conn = self.connect(location)?;

        let recorded = self.rt.block_on(table::get_meta(&conn, COLLECTION_KEY)).map_err(Error::vector_store)?;
        if let Some(found) = &recorded {
            if found != collection {
                return Err(Error::CollectionMismatch {
                    location: location.to_path_buf(),
                    expected: collection.to_string(),
                    found: found.clone(),
                });
            }
        }

        let (created, table) = self
            .rt
            .block_on(async {
                let created = table::ensure_table(&conn, collection, chunk_schema(dim_i32)).await?;
                let t = conn.open_table(collection).execute().await?;
                Ok::<_, anyhow::Error>((created, t))
            })
            .map_err(Error::vector_store)?;

        let schema = self.rt.block_on(table.schema()).map_err(Error::vector_store)?;
        match vector_dim(&schema) {
            Some(stored) if stored == dim_i32 => {}
            Some(stored) => {
                return Err(Error::VectorStoreFailure(format!(
                    "collection '{collection}' stores {stored}-dimensional vectors, embedder produces {dim}"
                )));
            }
            None => {
                return Err(Error::VectorStoreFailure(format!("collection '{collection}' has no vector column")));
            }
        }

        // The location is bound to a name only once its table exists.
        if recorded.is_none() {
            self.rt
                .block_on(table::set_meta(&conn, COLLECTION_KEY, collection))
                .map_err(Error::vector_store)?;
        }
        if created {
            self.rt
                .block_on(table::set_meta(&conn, &format!("{collection}.dim"), &dim.to_string()))
                .map_err(Error::vector_store)?;
            info!(location = %location.display(), collection, dim, "created collection");
        } else {
            debug!(location = %location.display(), collection, "opened collection");
        }
        Ok(LanceIndex {
            rt: Arc::clone(&self.rt),
            conn,
            table,
            collection: collection.to_string(),
            dim: dim_i32,
            created,
        })
    }
}

pub struct LanceIndex {
    rt: Arc<Runtime>,
    conn: Connection,
    table: Table,
    collection: String,
    dim: i32,
    created: bool,
}

impl LanceIndex {
    /// Row count written by the last `persist`, if any.
    pub fn persisted_rows(&self) -> Result<Option<usize>> {
        let key = format!("{}.persisted_rows", self.collection);
        let value = self.rt.block_on(table::get_meta(&self.conn, &key)).map_err(Error::vector_store)?;
        Ok(value.and_then(|v| v.parse().ok()))
    }
}

impl VectorIndex for LanceIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn was_created(&self) -> bool {
        self.created
    }

    fn upsert_batch(&mut self, entries: &[VectorEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.rt
            .block_on(writer::insert_entries(&self.table, entries, self.dim))
            .map_err(Error::vector_store)
    }

    fn count(&self) -> Result<usize> {
        self.rt.block_on(self.table.count_rows(None)).map_err(Error::vector_store)
    }

    // Lance commits every append; persisting stamps the committed row count
    // into the meta table.
    fn persist(&mut self) -> Result<()> {
        let rows = self.count()?;
        let rows_key = format!("{}.persisted_rows", self.collection);
        let at_key = format!("{}.persisted_at", self.collection);
        self.rt
            .block_on(async {
                table::set_meta(&self.conn, &rows_key, &rows.to_string()).await?;
                table::set_meta(&self.conn, &at_key, &Utc::now().to_rfc3339()).await
            })
            .map_err(Error::vector_store)?;
        debug!(collection = %self.collection, rows, "persisted");
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.count()? == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim as usize {
            return Err(Error::VectorStoreFailure(format!(
                "query has {} dimensions, collection expects {}",
                query.len(),
                self.dim
            )));
        }
        self.rt.block_on(search::nearest(&self.table, query, k)).map_err(Error::vector_store)
    }
}
