//! On-disk index format.
//!
//! An index is a single SQLite database:
//!
//! ```sql
//! CREATE TABLE index_meta (
//!     key TEXT PRIMARY KEY,
//!     value TEXT NOT NULL
//! );
//!
//! CREATE TABLE records (
//!     ordinal INTEGER PRIMARY KEY,     -- insertion order
//!     chunk_id TEXT UNIQUE NOT NULL,
//!     source TEXT NOT NULL,
//!     section TEXT,
//!     position INTEGER NOT NULL,
//!     part_index INTEGER,
//!     part_total INTEGER,
//!     text TEXT NOT NULL,
//!     vector BLOB NOT NULL             -- raw f32 values
//! );
//! ```
//!
//! `index_meta` carries the format version, the embedder identity (JSON), the
//! dimension, the backend that built the index, the record count, a blake3
//! checksum over ids and vector bytes, the build time and the crate version.
//!
//! Saving writes a temporary database next to the destination and renames it
//! into place once the pool is closed, so readers see either the old index or
//! the complete new one.

use super::{EmbeddedRecord, StoreBackend, StoreIdentity};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use lore_ai_context::{Chunk, PassagePart};
use lore_ai_embed::EmbedderIdentity;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;

const KEY_FORMAT_VERSION: &str = "format_version";
const KEY_EMBEDDER: &str = "embedder";
const KEY_DIMENSION: &str = "dimension";
const KEY_BACKEND: &str = "backend";
const KEY_RECORD_COUNT: &str = "record_count";
const KEY_CHECKSUM: &str = "checksum";
const KEY_CREATED_AT: &str = "created_at";
const KEY_LORE_VERSION: &str = "lore_version";

/// Contents of a persisted index.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub embedder: EmbedderIdentity,
    /// Backend that built the index. Informational; any backend can load it.
    pub backend: StoreBackend,
    pub created_at: DateTime<Utc>,
    pub lore_version: String,
    pub records: Vec<EmbeddedRecord>,
}

/// Blake3 over every id and vector, in record order.
pub fn checksum(records: &[EmbeddedRecord]) -> String {
    let mut hasher = blake3::Hasher::new();
    for record in records {
        hasher.update(record.chunk.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(bytemuck::cast_slice::<f32, u8>(&record.vector));
    }
    hasher.finalize().to_hex().to_string()
}

/// Write `records` to `destination`, replacing any existing index atomically.
pub async fn save(
    identity: &StoreIdentity,
    records: &[EmbeddedRecord],
    destination: &Path,
) -> Result<()> {
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(directory).await?;

    let temp = tempfile::Builder::new()
        .prefix(".lore-index-")
        .suffix(".tmp")
        .tempfile_in(directory)?;

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(temp.path())
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Full)
            .create_if_missing(true),
    )
    .await?;

    let written = write_index(&pool, identity, records).await;
    pool.close().await;
    written?;

    temp.persist(destination).map_err(|e| Error::Io(e.error))?;
    tracing::info!(
        "Saved {} records to {}",
        records.len(),
        destination.display()
    );
    Ok(())
}

async fn write_index(
    pool: &SqlitePool,
    identity: &StoreIdentity,
    records: &[EmbeddedRecord],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE records (
            ordinal INTEGER PRIMARY KEY,
            chunk_id TEXT UNIQUE NOT NULL,
            source TEXT NOT NULL,
            section TEXT,
            position INTEGER NOT NULL,
            part_index INTEGER,
            part_total INTEGER,
            text TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    let embedder_json = serde_json::to_string(&identity.embedder)
        .map_err(|e| Error::corrupt(format!("cannot encode embedder identity: {e}")))?;
    let meta = [
        (KEY_FORMAT_VERSION, FORMAT_VERSION.to_string()),
        (KEY_EMBEDDER, embedder_json),
        (KEY_DIMENSION, identity.embedder.dimension.to_string()),
        (KEY_BACKEND, identity.backend.to_string()),
        (KEY_RECORD_COUNT, records.len().to_string()),
        (KEY_CHECKSUM, checksum(records)),
        (KEY_CREATED_AT, Utc::now().to_rfc3339()),
        (KEY_LORE_VERSION, env!("CARGO_PKG_VERSION").to_string()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for (ordinal, record) in records.iter().enumerate() {
        let chunk = &record.chunk;
        sqlx::query(
            r#"
            INSERT INTO records
                (ordinal, chunk_id, source, section, position, part_index, part_total, text, vector)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(ordinal as i64)
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.section.as_deref())
        .bind(chunk.position as i64)
        .bind(chunk.part.map(|p| p.index as i64))
        .bind(chunk.part.map(|p| p.total as i64))
        .bind(&chunk.text)
        .bind(bytemuck::cast_slice::<f32, u8>(&record.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Read and verify a persisted index.
pub async fn load(source: &Path) -> Result<LoadedIndex> {
    if !tokio::fs::try_exists(source).await? {
        return Err(Error::IndexNotFound {
            path: source.to_path_buf(),
        });
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(source)
            .read_only(true),
    )
    .await
    .map_err(|e| Error::corrupt(format!("cannot open {}: {e}", source.display())))?;

    let loaded = read_index(&pool).await;
    pool.close().await;

    // Anything SQLite rejects while reading means the file is not a usable index
    loaded.map_err(|e| match e {
        Error::Database(db) => Error::corrupt(db.to_string()),
        other => other,
    })
}

fn meta_value<'a>(meta: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    meta.get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::corrupt(format!("missing metadata key '{key}'")))
}

fn parse_meta<T: std::str::FromStr>(meta: &HashMap<String, String>, key: &str) -> Result<T> {
    let value = meta_value(meta, key)?;
    value
        .parse()
        .map_err(|_| Error::corrupt(format!("invalid value '{value}' for '{key}'")))
}

async fn read_index(pool: &SqlitePool) -> Result<LoadedIndex> {
    let mut meta: HashMap<String, String> = HashMap::new();
    for row in sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?
    {
        meta.insert(row.try_get("key")?, row.try_get("value")?);
    }

    let version: u32 = parse_meta(&meta, KEY_FORMAT_VERSION)?;
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "unsupported format version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let embedder: EmbedderIdentity = serde_json::from_str(meta_value(&meta, KEY_EMBEDDER)?)
        .map_err(|e| Error::corrupt(format!("invalid embedder identity: {e}")))?;
    let dimension: usize = parse_meta(&meta, KEY_DIMENSION)?;
    if dimension != embedder.dimension {
        return Err(Error::corrupt(format!(
            "dimension {dimension} disagrees with embedder dimension {}",
            embedder.dimension
        )));
    }
    let backend: StoreBackend = meta_value(&meta, KEY_BACKEND)?
        .parse()
        .map_err(|_| Error::corrupt("unknown backend"))?;
    let record_count: usize = parse_meta(&meta, KEY_RECORD_COUNT)?;
    let created_at = DateTime::parse_from_rfc3339(meta_value(&meta, KEY_CREATED_AT)?)
        .map_err(|e| Error::corrupt(format!("invalid created_at: {e}")))?
        .with_timezone(&Utc);
    let lore_version = meta_value(&meta, KEY_LORE_VERSION)?.to_string();

    let rows = sqlx::query(
        r#"
        SELECT ordinal, chunk_id, source, section, position, part_index, part_total, text, vector
        FROM records
        ORDER BY ordinal
        "#,
    )
    .fetch_all(pool)
    .await?;

    if rows.len() != record_count {
        return Err(Error::corrupt(format!(
            "expected {record_count} records, found {}",
            rows.len()
        )));
    }

    let mut records = Vec::with_capacity(rows.len());
    for (expected_ordinal, row) in rows.into_iter().enumerate() {
        let ordinal: i64 = row.try_get("ordinal")?;
        if ordinal != expected_ordinal as i64 {
            return Err(Error::corrupt(format!("gap in record ordinals at {ordinal}")));
        }

        let bytes: Vec<u8> = row.try_get("vector")?;
        if bytes.len() != dimension * std::mem::size_of::<f32>() {
            return Err(Error::corrupt(format!(
                "record {ordinal} has a {}-byte vector, expected {dimension} floats",
                bytes.len()
            )));
        }
        let vector: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);

        let position: i64 = row.try_get("position")?;
        let part_index: Option<i64> = row.try_get("part_index")?;
        let part_total: Option<i64> = row.try_get("part_total")?;
        let part = match (part_index, part_total) {
            (Some(index), Some(total)) => {
                let part = usize::try_from(index)
                    .ok()
                    .zip(usize::try_from(total).ok())
                    .map(|(index, total)| PassagePart { index, total })
                    .filter(|part| part.index >= 1 && part.index <= part.total);
                Some(part.ok_or_else(|| {
                    Error::corrupt(format!(
                        "invalid part {index}/{total} in record {ordinal}"
                    ))
                })?)
            }
            _ => None,
        };

        records.push(EmbeddedRecord {
            chunk: Chunk {
                id: row.try_get("chunk_id")?,
                text: row.try_get("text")?,
                source: row.try_get("source")?,
                section: row.try_get("section")?,
                position: usize::try_from(position)
                    .map_err(|_| Error::corrupt(format!("negative position in record {ordinal}")))?,
                part,
            },
            vector,
        });
    }

    let stored_checksum = meta_value(&meta, KEY_CHECKSUM)?;
    if checksum(&records) != stored_checksum {
        return Err(Error::corrupt("checksum mismatch"));
    }

    Ok(LoadedIndex {
        embedder,
        backend,
        created_at,
        lore_version,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{identity, record};
    use super::*;
    use tempfile::tempdir;

    fn store_identity() -> StoreIdentity {
        StoreIdentity {
            embedder: identity(3),
            backend: StoreBackend::BruteForce,
        }
    }

    fn sample_records() -> Vec<EmbeddedRecord> {
        let mut first = record("viktor_tech#0", vec![0.1, -0.25, 1.0e-7]);
        first.chunk.section = Some("Hexcore".to_string());
        first.chunk.part = Some(PassagePart { index: 1, total: 2 });
        vec![first, record("viktor_tech#1", vec![f32::MIN_POSITIVE, 3.5, -0.0])]
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_records_exactly() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("index.db");
        let records = sample_records();

        save(&store_identity(), &records, &path).await?;
        let loaded = load(&path).await?;

        assert_eq!(loaded.embedder, identity(3));
        assert_eq!(loaded.backend, StoreBackend::BruteForce);
        assert_eq!(loaded.lore_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(loaded.records, records);
        for (a, b) in loaded.records.iter().zip(&records) {
            let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(&a.vector), bits(&b.vector));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_existing_index() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.db");

        save(&store_identity(), &sample_records(), &path).await?;
        save(&store_identity(), &sample_records()[..1], &path).await?;

        assert_eq!(load(&path).await?.records.len(), 1);

        // No temporary files are left behind
        let leftovers = std::fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let result = load(&dir.path().join("absent.db")).await;
        assert!(matches!(result, Err(Error::IndexNotFound { .. })));
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        std::fs::write(&path, b"definitely not a sqlite database, just some bytes").unwrap();

        assert!(matches!(
            load(&path).await,
            Err(Error::CorruptIndex { .. })
        ));
    }

    #[tokio::test]
    async fn test_tampered_vector_fails_checksum() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.db");
        save(&store_identity(), &sample_records(), &path).await?;

        let pool = SqlitePool::connect_with(SqliteConnectOptions::new().filename(&path)).await?;
        sqlx::query("UPDATE records SET vector = ?1 WHERE ordinal = 0")
            .bind(bytemuck::cast_slice::<f32, u8>(&[9.0f32, 9.0, 9.0]))
            .execute(&pool)
            .await?;
        pool.close().await;

        match load(&path).await {
            Err(Error::CorruptIndex { reason }) => assert_eq!(reason, "checksum mismatch"),
            other => panic!("expected checksum failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_negative_part_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.db");
        save(&store_identity(), &sample_records(), &path).await?;

        let pool = SqlitePool::connect_with(SqliteConnectOptions::new().filename(&path)).await?;
        sqlx::query("UPDATE records SET part_index = -1 WHERE ordinal = 0")
            .execute(&pool)
            .await?;
        pool.close().await;

        match load(&path).await {
            Err(Error::CorruptIndex { reason }) => {
                assert_eq!(reason, "invalid part -1/2 in record 0")
            }
            other => panic!("expected an invalid part error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_vector_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.db");
        save(&store_identity(), &sample_records(), &path).await?;

        let pool = SqlitePool::connect_with(SqliteConnectOptions::new().filename(&path)).await?;
        sqlx::query("UPDATE records SET vector = ?1 WHERE ordinal = 1")
            .bind(vec![0u8; 5])
            .execute(&pool)
            .await?;
        pool.close().await;

        assert!(matches!(
            load(&path).await,
            Err(Error::CorruptIndex { .. })
        ));
        Ok(())
    }
}
