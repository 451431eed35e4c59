//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Q&A records; vectors are little-endian f32 blobs of equal length
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    scope_key TEXT NOT NULL,
    appid TEXT NOT NULL,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    section TEXT NOT NULL,
    question_vector BLOB NOT NULL,
    answer_vector BLOB NOT NULL,
    question_answer_vector BLOB NOT NULL,
    provenance TEXT NOT NULL DEFAULT '{}',
    content_hash BLOB UNIQUE,
    created_at INTEGER NOT NULL,
    CHECK (length(question_vector) = length(answer_vector)
           AND length(answer_vector) = length(question_answer_vector))
);

CREATE INDEX IF NOT EXISTS idx_records_scope_key ON records(scope_key);
CREATE INDEX IF NOT EXISTS idx_records_appid ON records(appid);

-- FTS5 virtual table for keyword search
CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
    question,
    answer,
    section,
    content=records,
    content_rowid=rowid,
    tokenize='unicode61 remove_diacritics 0'
);

-- Per-column term statistics (doc = rows containing the term in that column)
CREATE VIRTUAL TABLE IF NOT EXISTS records_fts_col USING fts5vocab(records_fts, 'col');

-- Triggers to keep FTS5 in sync with records table
CREATE TRIGGER IF NOT EXISTS records_ai AFTER INSERT ON records BEGIN
    INSERT INTO records_fts(rowid, question, answer, section)
    VALUES (NEW.rowid, NEW.question, NEW.answer, NEW.section);
END;

CREATE TRIGGER IF NOT EXISTS records_ad AFTER DELETE ON records BEGIN
    INSERT INTO records_fts(records_fts, rowid, question, answer, section)
    VALUES ('delete', OLD.rowid, OLD.question, OLD.answer, OLD.section);
END;

CREATE TRIGGER IF NOT EXISTS records_au AFTER UPDATE ON records BEGIN
    INSERT INTO records_fts(records_fts, rowid, question, answer, section)
    VALUES ('delete', OLD.rowid, OLD.question, OLD.answer, OLD.section);
    INSERT INTO records_fts(rowid, question, answer, section)
    VALUES (NEW.rowid, NEW.question, NEW.answer, NEW.section);
END;

-- Store-level settings (vector dimension, schema version)
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Column list shared by every record-returning query.
pub const RECORD_COLUMNS: &str = "r.id, r.scope_key, r.question, r.answer, r.section, \
     r.question_vector, r.answer_vector, r.question_answer_vector, \
     r.provenance, r.content_hash, r.created_at";

/// Number of columns in [`RECORD_COLUMNS`].
pub const RECORD_COLUMN_COUNT: usize = 11;

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

pub const META_DIMENSION: &str = "dimension";
pub const META_SCHEMA_VERSION: &str = "schema_version";
