//! SQLite journal of finished deliveries

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::config::Settings;
use crate::storage::models::{Delivery, DeliveryOutcome};
use crate::{ParcelcamError, Result};

/// Delivery journal
pub struct Journal {
    conn: Connection,
}

const CURRENT_SCHEMA_VERSION: i64 = 1;

impl Journal {
    /// Open or create the journal
    pub fn open(settings: &Settings) -> Result<Self> {
        let db_path = settings.database_path();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::open_path(&db_path)
    }

    /// Open the journal at a specific path
    pub fn open_path(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        let journal = Self { conn };
        journal.initialize()?;

        Ok(journal)
    }

    /// Open an in-memory journal
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let journal = Self { conn };
        journal.initialize()?;
        Ok(journal)
    }

    fn initialize(&self) -> Result<()> {
        let current_version = self.schema_version()?;
        if current_version > CURRENT_SCHEMA_VERSION {
            return Err(ParcelcamError::Other(format!(
                "Journal schema version {} is newer than supported version {}",
                current_version, CURRENT_SCHEMA_VERSION
            )));
        }

        if current_version < 1 {
            self.migrate_to_v1()?;
            self.set_schema_version(1)?;
        }

        Ok(())
    }

    /// Current schema version tracked in PRAGMA user_version.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))?)
    }

    fn set_schema_version(&self, version: i64) -> Result<()> {
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {};", version))?;
        Ok(())
    }

    fn migrate_to_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deliveries (
                id TEXT PRIMARY KEY,
                tracking_number TEXT NOT NULL,
                outcome TEXT NOT NULL,
                destination TEXT,
                detail TEXT,
                size_bytes INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deliveries_created_at
                ON deliveries(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_deliveries_tracking
                ON deliveries(tracking_number);
            "#,
        )?;
        Ok(())
    }

    /// Record a finished cycle
    pub fn record(&self, delivery: &Delivery) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO deliveries (id, tracking_number, outcome, destination, detail, size_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                delivery.id,
                delivery.tracking_number,
                delivery.outcome.as_str(),
                delivery.destination,
                delivery.detail,
                delivery.size_bytes.map(|s| s as i64),
                delivery.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Most recent deliveries first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Delivery>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tracking_number, outcome, destination, detail, size_bytes, created_at
             FROM deliveries
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;

        let deliveries = stmt
            .query_map(params![limit as i64], Self::row_to_delivery)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(deliveries)
    }

    /// All deliveries for one tracking number, most recent first
    pub fn find_by_tracking(&self, tracking_number: &str) -> Result<Vec<Delivery>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tracking_number, outcome, destination, detail, size_bytes, created_at
             FROM deliveries
             WHERE tracking_number = ?1
             ORDER BY created_at DESC",
        )?;

        let deliveries = stmt
            .query_map(params![tracking_number], Self::row_to_delivery)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(deliveries)
    }

    fn row_to_delivery(row: &rusqlite::Row) -> rusqlite::Result<Delivery> {
        let outcome: String = row.get(2)?;
        let size_bytes: Option<i64> = row.get(5)?;
        let created_millis: i64 = row.get(6)?;

        Ok(Delivery {
            id: row.get(0)?,
            tracking_number: row.get(1)?,
            outcome: DeliveryOutcome::from_str(&outcome).unwrap_or(DeliveryOutcome::SaveFailed),
            destination: row.get(3)?,
            detail: row.get(4)?,
            size_bytes: size_bytes.map(|s| s as u64),
            created_at: Utc
                .timestamp_millis_opt(created_millis)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_journal_sets_schema_version() {
        let journal = Journal::open_memory().unwrap();
        assert_eq!(journal.schema_version().unwrap(), 1);
    }

    #[test]
    fn records_and_lists_most_recent_first() {
        let journal = Journal::open_memory().unwrap();

        let mut first = Delivery::new("SF001", DeliveryOutcome::SavedLocal);
        first.created_at = Utc.timestamp_millis_opt(1_000).unwrap();
        let mut second = Delivery::new("SF002", DeliveryOutcome::Uploaded)
            .with_destination("10.0.0.2:8080")
            .with_size(2048);
        second.created_at = Utc.timestamp_millis_opt(2_000).unwrap();

        journal.record(&first).unwrap();
        journal.record(&second).unwrap();

        let recent = journal.list_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].tracking_number, "SF002");
        assert_eq!(recent[0].outcome, DeliveryOutcome::Uploaded);
        assert_eq!(recent[0].size_bytes, Some(2048));
        assert_eq!(recent[1].tracking_number, "SF001");
    }

    #[test]
    fn finds_retakes_by_tracking_number() {
        let journal = Journal::open_memory().unwrap();
        journal
            .record(&Delivery::new("ABC 123/99", DeliveryOutcome::SaveFailed))
            .unwrap();
        journal
            .record(&Delivery::new("ABC 123/99", DeliveryOutcome::SavedLocal))
            .unwrap();
        journal
            .record(&Delivery::new("OTHER", DeliveryOutcome::Uploaded))
            .unwrap();

        assert_eq!(journal.find_by_tracking("ABC 123/99").unwrap().len(), 2);
    }
}
