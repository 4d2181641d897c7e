/// Tables are created on open; there is no migration path beyond `IF NOT EXISTS`.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    username              TEXT NOT NULL UNIQUE,
    email                 TEXT NOT NULL UNIQUE,
    password_hash         TEXT NOT NULL,
    enabled               INTEGER NOT NULL DEFAULT 1,
    created_at            TEXT NOT NULL,
    last_authenticated_at TEXT
);

CREATE TABLE IF NOT EXISTS signatures (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    payload     BLOB NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signatures_identity ON signatures(identity_id);
";

pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, username, email, enabled, created_at, last_authenticated_at";
