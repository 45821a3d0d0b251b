pub const SCHEMA: &str = r#"
-- Photos table: one row per library file
CREATE TABLE IF NOT EXISTS photos (
    file_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    photo_taken_ts INTEGER NOT NULL,  -- epoch millis, falls back to modified_ts
    modified_ts INTEGER,
    size_bytes INTEGER,
    scanned_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    -- Visual embedding (float32 array stored as bytes)
    embedding BLOB,
    embedding_dim INTEGER,
    embedding_status TEXT NOT NULL DEFAULT 'new'
        CHECK (embedding_status IN ('new', 'done')),
    embedded_at TEXT,

    -- Quality metrics from the embedding worker
    quality_score REAL,
    quality_metrics TEXT,  -- JSON

    CHECK ((embedding_status = 'done') = (embedding IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_photos_embedding_status ON photos(embedding_status);
CREATE INDEX IF NOT EXISTS idx_photos_taken_ts ON photos(photo_taken_ts);
CREATE INDEX IF NOT EXISTS idx_photos_path ON photos(path);

-- Key/value settings (worker pool size, thresholds)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Columns added after the first release, applied when missing.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("embedded_at", "ALTER TABLE photos ADD COLUMN embedded_at TEXT"),
    ("quality_score", "ALTER TABLE photos ADD COLUMN quality_score REAL"),
    ("quality_metrics", "ALTER TABLE photos ADD COLUMN quality_metrics TEXT"),
];
