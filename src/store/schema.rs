//! SQLite schema definition

/// SQL schema for the fragment store
pub const SCHEMA_SQL: &str = r#"
-- Fragments: the unit of retrieval (prose chunks, table rows, captions)
CREATE TABLE IF NOT EXISTS fragments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Embeddings: one L2-normalized vector per fragment, f32 little-endian
CREATE TABLE IF NOT EXISTS embeddings (
    fragment_id INTEGER PRIMARY KEY REFERENCES fragments(id),
    vector BLOB NOT NULL
);

-- Assets: non-prose source objects (one image or one table)
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sha256 TEXT NOT NULL,
    filepath TEXT NOT NULL,
    page INTEGER,
    kind TEXT NOT NULL,
    image_url TEXT,
    caption_text TEXT,
    caption_emb BLOB,
    meta TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Table bodies: one per table asset
CREATE TABLE IF NOT EXISTS table_bodies (
    asset_id INTEGER PRIMARY KEY REFERENCES assets(id),
    n_rows INTEGER NOT NULL,
    n_cols INTEGER NOT NULL,
    tsv TEXT NOT NULL,
    md TEXT NOT NULL,
    html TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assets_sha ON assets(sha256);
"#;
