//! ---
//! fu_section: "03-persistence-logging"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Event outbox table: append, read pending and delete acknowledged rows."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use rusqlite::params;

use crate::store::Store;
use crate::Result;

/// A serialized audit event waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Monotonic row id; later appends always receive larger ids.
    pub id: i64,
    /// Wire JSON of the event.
    pub json: String,
}

impl Store {
    /// Append a serialized event to the outbox and return its row id.
    pub fn append_event(&self, json: &str) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO report_events (json_string) VALUES (?1)",
            params![json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All queued events in append order.
    pub fn pending_events(&self) -> Result<Vec<StoredEvent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, json_string FROM report_events ORDER BY id ASC")?;
        let events = stmt
            .query_map([], |row| {
                Ok(StoredEvent {
                    id: row.get(0)?,
                    json: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Delete queued events with `id <= max_id`; returns how many were removed.
    ///
    /// Events appended after the caller read the queue have larger ids and survive.
    pub fn delete_events_through(&self, max_id: i64) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM report_events WHERE id <= ?1", params![max_id])?;
        Ok(removed)
    }

    /// Number of events currently queued.
    pub fn pending_event_count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM report_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
