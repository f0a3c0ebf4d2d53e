use sqlx::SqlitePool;

// Schema definitions
pub const COLLECTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    -- Next sequence number to hand out; never decremented so deletions leave gaps
    next_sequence INTEGER NOT NULL DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const PHOTOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY NOT NULL,
    collection_id TEXT NOT NULL,
    url TEXT NOT NULL,
    sequence INTEGER NOT NULL CHECK(sequence >= 1),
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (collection_id, sequence),
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
)
"#;

pub const WATERMARKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS watermarks (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

pub const WATERMARK_CONFIGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS watermark_configs (
    collection_id TEXT PRIMARY KEY NOT NULL,
    watermark_id TEXT NOT NULL,
    position_x REAL NOT NULL,
    position_y REAL NOT NULL,
    width REAL NOT NULL CHECK(width > 0),
    height REAL NOT NULL CHECK(height > 0),
    rotation REAL NOT NULL DEFAULT 0,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
    FOREIGN KEY (watermark_id) REFERENCES watermarks(id)
)
"#;

pub const SCHEMA_SQL: &[&str] = &[
    COLLECTIONS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_collections_owner ON collections(owner_id);",
    PHOTOS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_photos_collection_sequence ON photos(collection_id, sequence);",
    WATERMARKS_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_watermarks_owner ON watermarks(owner_id);",
    WATERMARK_CONFIGS_TABLE,
];

pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for sql in SCHEMA_SQL {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}
