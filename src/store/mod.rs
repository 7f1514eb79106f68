//! Fragment storage and the process-resident vector index
//!
//! Durable side: SQLite tables for fragments, embeddings, assets and table
//! bodies. Resident side: an append-only array of `{id, metadata, vector}`
//! materialized lazily on first read. A fragment becomes searchable only
//! after its transaction commits; failed inserts leave the index untouched.

mod schema;

pub use schema::*;

use crate::error::{Error, Result};
use crate::textutil::NormalizedCell;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

const UNIT_EPS: f32 = 1e-5;

/// Fragment type, used as retrieval filter and presentation hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Pdf,
    Text,
    Office,
    Hwp,
    Hwpx,
    TableRow,
    ImageCaption,
}

impl std::fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentKind::Pdf => write!(f, "pdf"),
            FragmentKind::Text => write!(f, "text"),
            FragmentKind::Office => write!(f, "office"),
            FragmentKind::Hwp => write!(f, "hwp"),
            FragmentKind::Hwpx => write!(f, "hwpx"),
            FragmentKind::TableRow => write!(f, "table_row"),
            FragmentKind::ImageCaption => write!(f, "image_caption"),
        }
    }
}

impl FromStr for FragmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(FragmentKind::Pdf),
            "text" => Ok(FragmentKind::Text),
            "office" => Ok(FragmentKind::Office),
            "hwp" => Ok(FragmentKind::Hwp),
            "hwpx" => Ok(FragmentKind::Hwpx),
            "table_row" => Ok(FragmentKind::TableRow),
            "image_caption" => Ok(FragmentKind::ImageCaption),
            _ => Err(Error::Config(format!("Unknown fragment type: {}", s))),
        }
    }
}

/// Structured metadata bag attached to every fragment.
///
/// Known keys are projected fields; anything else rides in the open tail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentMeta {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FragmentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(rename = "startTok", skip_serializing_if = "Option::is_none")]
    pub start_tok: Option<i64>,
    #[serde(rename = "endTok", skip_serializing_if = "Option::is_none")]
    pub end_tok: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<Vec<NormalizedCell>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Asset kind: a non-prose source object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Table,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Image => write!(f, "image"),
            AssetKind::Table => write!(f, "table"),
        }
    }
}

/// A new asset row (id assigned by the store)
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub sha256: String,
    pub filepath: String,
    pub page: Option<i64>,
    pub kind: AssetKind,
    pub image_url: Option<String>,
    pub caption_text: Option<String>,
    pub caption_emb: Option<Vec<f32>>,
    pub meta: serde_json::Value,
}

/// A table body row
#[derive(Debug, Clone)]
pub struct TableBody {
    pub asset_id: i64,
    pub n_rows: i64,
    pub n_cols: i64,
    pub tsv: String,
    pub md: String,
    pub html: String,
}

/// One resident index entry
#[derive(Debug, Clone)]
struct IndexEntry {
    id: i64,
    meta: FragmentMeta,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct IndexState {
    loaded: bool,
    entries: Vec<IndexEntry>,
}

/// Search options for `top_k`
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub k: usize,
    pub threshold: f32,
    pub kinds: Option<HashSet<FragmentKind>>,
    pub sha256: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 8,
            threshold: 0.7,
            kinds: None,
            sha256: None,
        }
    }
}

/// One search result with its content attached
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub meta: FragmentMeta,
    pub sim: f32,
    pub content: String,
}

/// Normalize a vector to unit Euclidean norm.
///
/// Empty vectors are rejected; a norm at or below epsilon is treated as 1
/// (zero vectors are undefined input and pass through unchanged).
pub fn normalize(v: &[f32]) -> Result<Vec<f32>> {
    if v.is_empty() {
        return Err(Error::EmbeddingShape("empty vector".to_string()));
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 1e-12 {
        return Ok(v.to_vec());
    }
    if (norm - 1.0).abs() <= UNIT_EPS {
        return Ok(v.to_vec());
    }
    Ok(v.iter().map(|x| x / norm).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(v.len() * 4);
    for x in v {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

fn blob_to_vec(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if blob.len() != dimension * 4 {
        return Err(Error::EmbeddingShape(format!(
            "stored vector has {} bytes, expected {}",
            blob.len(),
            dimension * 4
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Fragment store handle
pub struct VectorStore {
    pool: SqlitePool,
    dimension: usize,
    index: RwLock<IndexState>,
}

impl VectorStore {
    /// Open (or create) the store at the given path
    pub async fn open(db_path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            dimension,
            index: RwLock::new(IndexState::default()),
        })
    }

    /// Expected vector dimension for this store
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Materialize the resident index from durable storage. Idempotent;
    /// a failure leaves the index unloaded and propagates.
    pub async fn load(&self) -> Result<()> {
        {
            let state = self.index.read().await;
            if state.loaded {
                return Ok(());
            }
        }

        let mut state = self.index.write().await;
        if state.loaded {
            return Ok(());
        }

        let rows = sqlx::query(
            r#"
            SELECT f.id, f.metadata, e.vector
            FROM fragments f
            JOIN embeddings e ON e.fragment_id = f.id
            ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get(0);
            let metadata: String = row.get(1);
            let blob: Vec<u8> = row.get(2);
            let meta: FragmentMeta = serde_json::from_str(&metadata)?;
            let embedding = blob_to_vec(&blob, self.dimension)?;
            entries.push(IndexEntry {
                id,
                meta,
                embedding,
            });
        }

        info!("Loaded {} fragments into the resident index", entries.len());
        state.entries = entries;
        state.loaded = true;
        Ok(())
    }

    /// Number of fragments in durable storage
    pub async fn count_fragments(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Insert one fragment and its embedding atomically. The resident
    /// index is appended only after the transaction commits.
    pub async fn insert_fragment(
        &self,
        content: &str,
        meta: &FragmentMeta,
        raw_vec: &[f32],
    ) -> Result<i64> {
        if content.trim().is_empty() {
            return Err(Error::Insert("fragment content is empty".to_string()));
        }
        if raw_vec.len() != self.dimension {
            return Err(Error::Insert(format!(
                "vector dimension {} does not match store dimension {}",
                raw_vec.len(),
                self.dimension
            )));
        }

        let v = normalize(raw_vec).map_err(|e| Error::Insert(e.to_string()))?;
        let metadata = serde_json::to_string(meta)?;

        let mut tx = self.pool.begin().await.map_err(|e| Error::Insert(e.to_string()))?;

        let id: i64 =
            sqlx::query_scalar("INSERT INTO fragments (content, metadata) VALUES (?, ?) RETURNING id")
                .bind(content)
                .bind(&metadata)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::Insert(e.to_string()))?;

        sqlx::query("INSERT INTO embeddings (fragment_id, vector) VALUES (?, ?)")
            .bind(id)
            .bind(vec_to_blob(&v))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Insert(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Insert(e.to_string()))?;

        let mut state = self.index.write().await;
        if state.loaded {
            state.entries.push(IndexEntry {
                id,
                meta: meta.clone(),
                embedding: v,
            });
        }

        Ok(id)
    }

    /// Insert an asset; its caption embedding, if present, is normalized.
    pub async fn insert_asset(&self, asset: &NewAsset) -> Result<i64> {
        let caption_blob = match &asset.caption_emb {
            Some(raw) => {
                if raw.len() != self.dimension {
                    return Err(Error::Insert(format!(
                        "caption embedding dimension {} does not match store dimension {}",
                        raw.len(),
                        self.dimension
                    )));
                }
                let v = normalize(raw).map_err(|e| Error::Insert(e.to_string()))?;
                Some(vec_to_blob(&v))
            }
            None => None,
        };

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO assets (sha256, filepath, page, kind, image_url, caption_text, caption_emb, meta)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&asset.sha256)
        .bind(&asset.filepath)
        .bind(asset.page)
        .bind(asset.kind.to_string())
        .bind(&asset.image_url)
        .bind(&asset.caption_text)
        .bind(caption_blob)
        .bind(asset.meta.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Insert(e.to_string()))?;

        Ok(id)
    }

    /// Insert a table body for a table asset
    pub async fn insert_table_body(&self, body: &TableBody) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO table_bodies (asset_id, n_rows, n_cols, tsv, md, html)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(body.asset_id)
        .bind(body.n_rows)
        .bind(body.n_cols)
        .bind(&body.tsv)
        .bind(&body.md)
        .bind(&body.html)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Insert(e.to_string()))?;
        Ok(())
    }

    /// Filtered top-K cosine search over the resident index, with contents
    /// fetched from durable storage in one batch.
    pub async fn top_k(&self, query_vec: &[f32], options: SearchOptions) -> Result<Vec<SearchHit>> {
        self.load().await?;

        let q = normalize(query_vec)?;
        if q.len() != self.dimension {
            return Err(Error::EmbeddingShape(format!(
                "query dimension {} does not match store dimension {}",
                q.len(),
                self.dimension
            )));
        }

        let mut candidates: Vec<(i64, FragmentMeta, f32)> = Vec::new();
        {
            let state = self.index.read().await;
            let snapshot = state.entries.len();
            for item in state.entries[..snapshot].iter() {
                if let Some(kinds) = &options.kinds {
                    match item.meta.kind {
                        Some(kind) if kinds.contains(&kind) => {}
                        _ => continue,
                    }
                }
                if let Some(sha) = &options.sha256 {
                    if item.meta.sha256.as_deref() != Some(sha.as_str()) {
                        continue;
                    }
                }
                let sim = dot(&q, &item.embedding);
                if sim >= options.threshold {
                    candidates.push((item.id, item.meta.clone(), sim));
                }
            }
        }

        // Stable sort: equal similarities preserve prior insertion order.
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(options.k);

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = candidates.iter().map(|(id, _, _)| *id).collect();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT id, content FROM fragments WHERE id IN ({})",
            placeholders
        );
        let mut q_builder = sqlx::query(&query);
        for id in &ids {
            q_builder = q_builder.bind(id);
        }
        let rows = q_builder.fetch_all(&self.pool).await?;

        let mut contents: HashMap<i64, String> = HashMap::with_capacity(rows.len());
        for row in rows {
            contents.insert(row.get(0), row.get(1));
        }

        Ok(candidates
            .into_iter()
            .map(|(id, meta, sim)| SearchHit {
                id,
                meta,
                sim,
                content: contents.remove(&id).unwrap_or_default(),
            })
            .collect())
    }
}
