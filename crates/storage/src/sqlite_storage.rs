//! SQLite storage backend.
//!
//! Documents and chunks live in two relational tables; embeddings are
//! stored as little-endian `f32` blobs next to their dimension. Chunk-set
//! replacement runs inside a transaction.

use async_trait::async_trait;
use docrag_core::{Chunk, ChunkId, Document, DocumentId, KnowledgeBaseStats, Time};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

use super::trait_::{reassign_document, validate_chunk_set, KnowledgeBaseStore, Result, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) a database file.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                indexed_at TEXT NOT NULL,
                chunk_count INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (document_id, chunk_index)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn dimension_excluding(&self, document_id: Option<DocumentId>) -> Result<Option<usize>> {
        let excluded = document_id.map(|id| id.to_string()).unwrap_or_default();
        let dimension: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM chunks WHERE document_id != ? LIMIT 1")
                .bind(excluded)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dimension.map(|d| d as usize))
    }

    async fn upsert_document(tx: &mut Transaction<'_, Sqlite>, document: &Document) -> Result<Document> {
        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE file_path = ?")
            .bind(&document.file_path)
            .fetch_optional(&mut **tx)
            .await?;

        let mut saved = document.clone();
        if let Some(id) = existing {
            saved.id = parse_id(&id)?;
        }

        sqlx::query(
            "INSERT INTO documents (id, file_path, title, content, indexed_at, chunk_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_path = excluded.file_path,
                title = excluded.title,
                content = excluded.content,
                indexed_at = excluded.indexed_at,
                chunk_count = excluded.chunk_count",
        )
        .bind(saved.id.to_string())
        .bind(&saved.file_path)
        .bind(&saved.title)
        .bind(&saved.content)
        .bind(format_time(&saved.indexed_at))
        .bind(saved.chunk_count as i64)
        .execute(&mut **tx)
        .await?;

        Ok(saved)
    }

    async fn replace_chunks(
        tx: &mut Transaction<'_, Sqlite>,
        document_id: DocumentId,
        chunks: &[Chunk],
    ) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id.to_string())
            .execute(&mut **tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, content, start_offset, end_offset,
                    token_count, embedding, dimension, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.id.to_string())
            .bind(document_id.to_string())
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(chunk.token_count as i64)
            .bind(encode_embedding(&chunk.embedding))
            .bind(chunk.dimension() as i64)
            .bind(format_time(&chunk.created_at))
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl KnowledgeBaseStore for SqliteStorage {
    async fn save_document(&mut self, document: &Document) -> Result<Document> {
        let mut tx = self.pool.begin().await?;
        let saved = Self::upsert_document(&mut tx, document).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn save_chunks(&mut self, document_id: DocumentId, chunks: &[Chunk]) -> Result<()> {
        validate_chunk_set(document_id, chunks, self.dimension_excluding(Some(document_id)).await?)?;

        let mut tx = self.pool.begin().await?;
        Self::replace_chunks(&mut tx, document_id, chunks).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_document(&mut self, document: &Document, chunks: &[Chunk]) -> Result<Document> {
        let target = match self.get_document_by_path(&document.file_path).await? {
            Some(existing) => existing.id,
            None => document.id,
        };
        let chunks = reassign_document(chunks, target);
        // Checked before the transaction opens: the in-memory pool has a single connection.
        validate_chunk_set(target, &chunks, self.dimension_excluding(Some(target)).await?)?;

        let mut tx = self.pool.begin().await?;
        let saved = Self::upsert_document(&mut tx, document).await?;
        Self::replace_chunks(&mut tx, saved.id, &chunks).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn delete_document(&mut self, id: DocumentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, file_path, title, content, indexed_at, chunk_count FROM documents
            ORDER BY indexed_at DESC, file_path ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, file_path, title, content, indexed_at, chunk_count FROM documents WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, file_path, title, content, indexed_at, chunk_count FROM documents WHERE file_path = ?",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn count_chunks(&self, document_id: DocumentId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn get_statistics(&self) -> Result<KnowledgeBaseStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        Ok(KnowledgeBaseStats {
            documents_count: documents as usize,
            chunks_count: chunks as usize,
        })
    }

    async fn scan_all_chunks(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, content, start_offset, end_offset, token_count,
                embedding, dimension, created_at
            FROM chunks ORDER BY document_id, chunk_index",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn embedding_dimension(&self) -> Result<Option<usize>> {
        self.dimension_excluding(None).await
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        file_path: row.try_get("file_path")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        indexed_at: parse_time(&row.try_get::<String, _>("indexed_at")?)?,
        chunk_count: row.try_get::<i64, _>("chunk_count")? as usize,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let id: String = row.try_get("id")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    let dimension = row.try_get::<i64, _>("dimension")? as usize;
    let embedding = decode_embedding(&blob)?;
    if embedding.len() != dimension {
        return Err(StorageError::InvalidChunk(format!(
            "chunk {} stores {} floats but records dimension {}",
            id,
            embedding.len(),
            dimension
        )));
    }

    Ok(Chunk {
        id: ChunkId::from_str(&id).map_err(|e| StorageError::Other(format!("invalid chunk id {id}: {e}")))?,
        document_id: parse_id(&row.try_get::<String, _>("document_id")?)?,
        chunk_index: row.try_get::<i64, _>("chunk_index")? as usize,
        content: row.try_get("content")?,
        start_offset: row.try_get::<i64, _>("start_offset")? as usize,
        end_offset: row.try_get::<i64, _>("end_offset")? as usize,
        token_count: row.try_get::<i64, _>("token_count")? as usize,
        embedding,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn parse_id(s: &str) -> Result<DocumentId> {
    s.parse()
        .map_err(|e| StorageError::Other(format!("invalid document id {s}: {e}")))
}

fn format_time(time: &Time) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<Time> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StorageError::Other(format!("invalid timestamp {s}: {e}")))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StorageError::InvalidChunk(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
