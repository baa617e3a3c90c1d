// Familiar Market - Database Setup
// Schema, pragmas, and the uniqueness backstops the matching engine relies on

use std::path::Path;

use rusqlite::Connection;

use crate::error::MarketError;

/// Open a database file and make sure the schema exists.
pub fn open_database<P: AsRef<Path>>(path: P) -> Result<Connection, MarketError> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<(), MarketError> {
    // WAL for crash recovery; foreign_keys is off by default in SQLite and
    // every relational rule here depends on it. busy_timeout lets parallel
    // writers queue behind an IMMEDIATE transaction instead of failing.
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS wizards (
    wizard_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    image TEXT,
    email TEXT,
    username TEXT,
    password TEXT,
    role TEXT
);

CREATE TABLE IF NOT EXISTS groups (
    group_id INTEGER PRIMARY KEY AUTOINCREMENT,
    wizard_id INTEGER REFERENCES wizards(wizard_id),
    price REAL,
    species TEXT,
    size TEXT,
    color TEXT,
    pattern TEXT,
    personality TEXT,
    rarity TEXT,
    typing TEXT
);

CREATE TABLE IF NOT EXISTS customers (
    customer_id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER REFERENCES groups(group_id),
    name TEXT NOT NULL,
    image TEXT,
    email TEXT,
    username TEXT,
    password TEXT,
    role TEXT
);

CREATE TABLE IF NOT EXISTS familiars (
    familiar_id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER REFERENCES groups(group_id),
    name TEXT NOT NULL,
    image TEXT,
    species TEXT,
    size TEXT,
    color TEXT,
    pattern TEXT,
    personality TEXT,
    rarity TEXT,
    typing TEXT
);

CREATE TABLE IF NOT EXISTS contracts (
    contract_id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customers(customer_id),
    familiar_id INTEGER NOT NULL REFERENCES familiars(familiar_id),
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One active contract per customer; one live claim per familiar. The
-- application checks these before inserting, but only these indexes hold
-- under concurrent requests.
CREATE UNIQUE INDEX IF NOT EXISTS idx_contracts_customer_active
    ON contracts (customer_id) WHERE status = 'active';
CREATE UNIQUE INDEX IF NOT EXISTS idx_contracts_familiar_claimed
    ON contracts (familiar_id) WHERE status != 'rejected';

CREATE INDEX IF NOT EXISTS idx_contracts_customer ON contracts (customer_id);
CREATE INDEX IF NOT EXISTS idx_contracts_familiar ON contracts (familiar_id);
CREATE INDEX IF NOT EXISTS idx_groups_wizard ON groups (wizard_id);
CREATE INDEX IF NOT EXISTS idx_familiars_group ON familiars (group_id);
CREATE INDEX IF NOT EXISTS idx_customers_group ON customers (group_id);
";

/// RFC 3339 timestamp for created_at/updated_at columns.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('wizards', 'groups', 'customers', 'familiars', 'contracts')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // Contract pointing at rows that don't exist must be refused.
        let result = conn.execute(
            "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
             VALUES (999, 999, 'active', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_customer_active_uniqueness_backstop() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        conn.execute("INSERT INTO customers (name) VALUES ('Marcus Hale')", [])
            .unwrap();
        conn.execute("INSERT INTO familiars (name) VALUES ('Smaug')", [])
            .unwrap();
        conn.execute("INSERT INTO familiars (name) VALUES ('Nyx')", [])
            .unwrap();

        conn.execute(
            "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
             VALUES (1, 1, 'active', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        // Second active contract for the same customer hits the partial index.
        let result = conn.execute(
            "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
             VALUES (1, 2, 'active', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());

        // A rejected row for the same customer is fine.
        conn.execute(
            "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
             VALUES (1, 2, 'rejected', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_familiar_claim_uniqueness_backstop() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        conn.execute("INSERT INTO customers (name) VALUES ('Marcus Hale')", [])
            .unwrap();
        conn.execute("INSERT INTO customers (name) VALUES ('Elara Sunwood')", [])
            .unwrap();
        conn.execute("INSERT INTO familiars (name) VALUES ('Smaug')", [])
            .unwrap();

        conn.execute(
            "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
             VALUES (1, 1, 'pending', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        // Pending counts as a claim: a second customer cannot take the familiar.
        let result = conn.execute(
            "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
             VALUES (2, 1, 'active', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
