pub(crate) const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS persons (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    name_key    TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    id             TEXT PRIMARY KEY,
    person_id      TEXT NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
    seq            INTEGER NOT NULL,
    path           TEXT NOT NULL,
    embedding      BLOB NOT NULL,
    model_version  TEXT,
    quality        REAL NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE (person_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_samples_person ON samples(person_id);
"#;
