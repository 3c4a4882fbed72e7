//! SQL schema for the Tandem SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS records (
    record_id            TEXT PRIMARY KEY,
    subject_id           TEXT NOT NULL,
    counterparty_id      TEXT,
    part                 TEXT NOT NULL,   -- 'employer_part' | 'employee_part'
    legal_entity_id      TEXT NOT NULL,
    period_from          TEXT,            -- ISO 8601 date or NULL
    period_to            TEXT,
    payload              TEXT NOT NULL DEFAULT 'null',
    status               TEXT NOT NULL,   -- 'draft' | 'submitted'
    linked_record_id     TEXT REFERENCES records(record_id),
    supersedes_record_id TEXT REFERENCES records(record_id),
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    submitted_at         TEXT,
    submitted_by         TEXT,            -- JSON-encoded Actor or NULL
    CHECK ((period_from IS NULL) = (period_to IS NULL)),
    CHECK (period_from IS NULL OR period_from <= period_to),
    CHECK (linked_record_id IS NULL OR linked_record_id != record_id)
);

-- One processing ticket per submitted record; rows are never deleted.
CREATE TABLE IF NOT EXISTS submissions (
    submission_id      TEXT PRIMARY KEY,
    record_id          TEXT NOT NULL UNIQUE REFERENCES records(record_id),
    status             TEXT NOT NULL,
    attempt_count      INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
    last_attempt_at    TEXT,
    last_error         TEXT,
    external_reference TEXT NOT NULL UNIQUE,
    created_at         TEXT NOT NULL
);

-- Cross-instance exclusion for the retry sweep.
CREATE TABLE IF NOT EXISTS sweep_leases (
    name        TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS records_subject_idx     ON records(subject_id, status);
CREATE INDEX IF NOT EXISTS submissions_status_idx  ON submissions(status, attempt_count);

PRAGMA user_version = 1;
";
