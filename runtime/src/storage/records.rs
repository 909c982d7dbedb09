//! Transactional, batched persistence of ingestion records.
//!
//! Each batched save runs in one transaction and inserts its records in
//! fixed-size chunks. A failing chunk rolls the whole call back, so callers
//! see either every record of the call or none of them.

use crate::error::IngestError;
use crate::model::{
    BatchSummary, IndexChild, RobotsRecord, SitemapIndexRecord, SitemapUrlsetRecord,
    UploadSummary,
};
use crate::storage::db::Database;
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

/// Records per chunk insert.
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Relational sink for ingestion records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_robots(&self, record: RobotsRecord) -> Result<(), IngestError>;

    async fn save_sitemap_index(
        &self,
        records: Vec<SitemapIndexRecord>,
    ) -> Result<BatchSummary, IngestError>;

    async fn save_sitemap_urlset(
        &self,
        records: Vec<SitemapUrlsetRecord>,
    ) -> Result<BatchSummary, IngestError>;

    /// Index records written under `origin_id` (root level when `None`).
    async fn sitemap_index_children(
        &self,
        upload_id: Uuid,
        robots_id: Uuid,
        origin_id: Option<Uuid>,
    ) -> Result<Vec<IndexChild>, IngestError>;
}

/// [`RecordStore`] over the shared SQLite database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
    chunk_size: usize,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch one robots record by ID.
    pub async fn robots_record(&self, id: Uuid) -> Result<Option<RobotsRecord>, IngestError> {
        self.db
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT id, entity_id, upload_id, data, scraped FROM robots WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok(RobotsRecord {
                            id: uuid_at(row, 0)?,
                            entity_id: uuid_at(row, 1)?,
                            upload_id: uuid_at(row, 2)?,
                            data: row.get(3)?,
                            scraped: row.get(4)?,
                        })
                    },
                );
                match result {
                    Ok(record) => Ok(Some(record)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// All index records of an upload, ordered by URL.
    pub async fn sitemap_index_records(
        &self,
        upload_id: Uuid,
    ) -> Result<Vec<SitemapIndexRecord>, IngestError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, entity_id, upload_id, robots_id, origin_id, url, last_modified, scraped
                     FROM sitemap_index WHERE upload_id = ?1 ORDER BY url",
                )?;
                let records = stmt
                    .query_map(params![upload_id.to_string()], |row| {
                        Ok(SitemapIndexRecord {
                            id: uuid_at(row, 0)?,
                            entity_id: uuid_at(row, 1)?,
                            upload_id: uuid_at(row, 2)?,
                            robots_id: uuid_at(row, 3)?,
                            origin_id: opt_uuid_at(row, 4)?,
                            url: row.get(5)?,
                            last_modified: row.get(6)?,
                            scraped: row.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await
    }

    /// All urlset records of an upload, ordered by URL.
    pub async fn sitemap_urlset_records(
        &self,
        upload_id: Uuid,
    ) -> Result<Vec<SitemapUrlsetRecord>, IngestError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, entity_id, upload_id, robots_id, origin_id, url, last_modified,
                            change_freq, scraped
                     FROM sitemap_urlset WHERE upload_id = ?1 ORDER BY url",
                )?;
                let records = stmt
                    .query_map(params![upload_id.to_string()], |row| {
                        Ok(SitemapUrlsetRecord {
                            id: uuid_at(row, 0)?,
                            entity_id: uuid_at(row, 1)?,
                            upload_id: uuid_at(row, 2)?,
                            robots_id: uuid_at(row, 3)?,
                            origin_id: opt_uuid_at(row, 4)?,
                            url: row.get(5)?,
                            last_modified: row.get(6)?,
                            change_freq: row.get(7)?,
                            scraped: row.get(8)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await
    }

    /// Row counts per table for one upload.
    pub async fn upload_summary(&self, upload_id: Uuid) -> Result<UploadSummary, IngestError> {
        self.db
            .call(move |conn| {
                let id = upload_id.to_string();
                let count = |table: &str| -> rusqlite::Result<usize> {
                    conn.query_row(
                        &format!("SELECT COUNT(*) FROM {table} WHERE upload_id = ?1"),
                        params![id],
                        |row| row.get::<_, i64>(0),
                    )
                    .map(|n| n as usize)
                };
                Ok(UploadSummary {
                    robots: count("robots")?,
                    sitemap_index: count("sitemap_index")?,
                    sitemap_urlset: count("sitemap_urlset")?,
                })
            })
            .await
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save_robots(&self, record: RobotsRecord) -> Result<(), IngestError> {
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO robots (id, entity_id, upload_id, data, scraped)
                     VALUES (?1, ?2, ?3, ?4, 0)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        record.id.to_string(),
                        record.entity_id.to_string(),
                        record.upload_id.to_string(),
                        record.data,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn save_sitemap_index(
        &self,
        records: Vec<SitemapIndexRecord>,
    ) -> Result<BatchSummary, IngestError> {
        let chunk_size = self.chunk_size;
        let summary = self
            .db
            .call(move |conn| insert_batched(conn, "sitemap_index", &records, chunk_size, insert_index_chunk))
            .await?;
        debug!(rows = summary.rows, chunks = summary.chunks, "saved sitemap index records");
        Ok(summary)
    }

    async fn save_sitemap_urlset(
        &self,
        records: Vec<SitemapUrlsetRecord>,
    ) -> Result<BatchSummary, IngestError> {
        let chunk_size = self.chunk_size;
        let summary = self
            .db
            .call(move |conn| insert_batched(conn, "sitemap_urlset", &records, chunk_size, insert_urlset_chunk))
            .await?;
        debug!(rows = summary.rows, chunks = summary.chunks, "saved sitemap urlset records");
        Ok(summary)
    }

    async fn sitemap_index_children(
        &self,
        upload_id: Uuid,
        robots_id: Uuid,
        origin_id: Option<Uuid>,
    ) -> Result<Vec<IndexChild>, IngestError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url FROM sitemap_index
                     WHERE upload_id = ?1 AND robots_id = ?2 AND origin_id IS ?3
                     ORDER BY url",
                )?;
                let children = stmt
                    .query_map(
                        params![
                            upload_id.to_string(),
                            robots_id.to_string(),
                            origin_id.map(|id| id.to_string()),
                        ],
                        |row| {
                            Ok(IndexChild {
                                id: uuid_at(row, 0)?,
                                url: row.get(1)?,
                            })
                        },
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(children)
            })
            .await
    }
}

/// Insert `rows` in chunks inside one transaction.
fn insert_batched<T>(
    conn: &mut Connection,
    table: &'static str,
    rows: &[T],
    chunk_size: usize,
    insert_chunk: fn(&Transaction<'_>, &[T]) -> rusqlite::Result<()>,
) -> Result<BatchSummary, IngestError> {
    let tx = conn.transaction()?;
    let mut chunks = 0;

    for chunk in rows.chunks(chunk_size) {
        if let Err(err) = insert_chunk(&tx, chunk) {
            warn!(table, chunk = chunks, error = %err, "chunk insert failed; rolling back");
            return match tx.rollback() {
                Ok(()) => Err(err.into()),
                Err(rollback) => Err(IngestError::Rollback {
                    original: Box::new(err.into()),
                    rollback,
                }),
            };
        }
        chunks += 1;
    }

    tx.commit()?;
    Ok(BatchSummary {
        rows: rows.len(),
        chunks,
    })
}

fn insert_index_chunk(tx: &Transaction<'_>, chunk: &[SitemapIndexRecord]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO sitemap_index
            (id, entity_id, upload_id, robots_id, origin_id, url, last_modified, scraped)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT(id) DO NOTHING",
    )?;
    for r in chunk {
        stmt.execute(params![
            r.id.to_string(),
            r.entity_id.to_string(),
            r.upload_id.to_string(),
            r.robots_id.to_string(),
            r.origin_id.map(|id| id.to_string()),
            r.url,
            r.last_modified,
        ])?;
    }
    Ok(())
}

fn insert_urlset_chunk(tx: &Transaction<'_>, chunk: &[SitemapUrlsetRecord]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO sitemap_urlset
            (id, entity_id, upload_id, robots_id, origin_id, url, last_modified, change_freq, scraped)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
         ON CONFLICT(id) DO NOTHING",
    )?;
    for r in chunk {
        stmt.execute(params![
            r.id.to_string(),
            r.entity_id.to_string(),
            r.upload_id.to_string(),
            r.robots_id.to_string(),
            r.origin_id.map(|id| id.to_string()),
            r.url,
            r.last_modified,
            r.change_freq,
        ])?;
    }
    Ok(())
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Uuid::parse_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
