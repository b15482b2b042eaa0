//! ---
//! fu_section: "03-persistence-logging"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Install history table backing current target lookup and start failure counts."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::{PersistenceError, Result};

const COLUMNS: &str = "id, ecu_serial, sha256, name, hashes, length, correlation_id, \
                       is_current, is_pending, was_installed, custom_meta";

/// One install attempt of a target on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledVersion {
    /// Row identifier assigned on insert; zero until stored.
    pub id: i64,
    /// Serial of the ECU the target was installed on.
    pub ecu_serial: String,
    /// Primary content hash of the target.
    pub sha256: String,
    /// Target name.
    pub name: String,
    /// Serialized hash map of the target.
    pub hashes: String,
    /// Target length in bytes as advertised by the metadata.
    pub length: i64,
    /// Correlation id of the update attempt.
    pub correlation_id: String,
    /// The device currently runs this target.
    pub is_current: bool,
    /// A Start phase for this target is in progress.
    pub is_pending: bool,
    /// The Start phase for this attempt succeeded.
    pub was_installed: bool,
    /// Opaque metadata attached by the caller.
    pub custom_meta: String,
}

impl InstalledVersion {
    /// Construct an unsaved record for the given target and attempt.
    pub fn new(
        ecu_serial: impl Into<String>,
        name: impl Into<String>,
        sha256: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            ecu_serial: ecu_serial.into(),
            sha256: sha256.into(),
            name: name.into(),
            hashes: String::new(),
            length: 0,
            correlation_id: correlation_id.into(),
            is_current: false,
            is_pending: false,
            was_installed: false,
            custom_meta: String::new(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ecu_serial: row.get(1)?,
            sha256: row.get(2)?,
            name: row.get(3)?,
            hashes: row.get(4)?,
            length: row.get(5)?,
            correlation_id: row.get(6)?,
            is_current: row.get(7)?,
            is_pending: row.get(8)?,
            was_installed: row.get(9)?,
            custom_meta: row.get(10)?,
        })
    }

    /// True when this row records a Start phase that ran and failed.
    pub fn is_failed_start(&self) -> bool {
        !self.is_pending && !self.was_installed
    }
}

impl Store {
    /// Record that a Start phase began for `record`; returns the new row id.
    ///
    /// Clears `is_pending` on every other row so at most one row is pending.
    pub fn begin_install(&self, record: &InstalledVersion) -> Result<i64> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE installed_versions SET is_pending = 0", [])?;
        tx.execute(
            "INSERT INTO installed_versions (ecu_serial, sha256, name, hashes, length, \
             correlation_id, is_current, is_pending, was_installed, custom_meta) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1, 0, ?7)",
            params![
                record.ecu_serial,
                record.sha256,
                record.name,
                record.hashes,
                record.length,
                record.correlation_id,
                record.custom_meta,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Mark the attempt `id` as successfully started and make it the current row.
    pub fn complete_install(&self, id: i64) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE installed_versions SET is_current = 0", [])?;
        let updated = tx.execute(
            "UPDATE installed_versions SET is_current = 1, is_pending = 0, was_installed = 1 \
             WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(PersistenceError::RecordNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Mark the attempt `id` as a failed start.
    pub fn fail_install(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE installed_versions SET is_pending = 0, was_installed = 0 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(PersistenceError::RecordNotFound(id));
        }
        Ok(())
    }

    /// The row flagged `is_current`, if any.
    pub fn current_install(&self) -> Result<Option<InstalledVersion>> {
        self.single_where("is_current = 1")
    }

    /// The row flagged `is_pending`, if any.
    pub fn pending_install(&self) -> Result<Option<InstalledVersion>> {
        self.single_where("is_pending = 1")
    }

    /// All rows in insertion order, optionally restricted to one target name.
    pub fn install_history(&self, name: Option<&str>) -> Result<Vec<InstalledVersion>> {
        let conn = self.connect()?;
        let rows = match name {
            Some(name) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM installed_versions WHERE name = ?1 ORDER BY id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![name], InstalledVersion::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM installed_versions ORDER BY id ASC"
                ))?;
                let rows = stmt
                    .query_map([], InstalledVersion::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Distinct target names with at least one recorded attempt.
    pub fn installed_names(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT DISTINCT name FROM installed_versions ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Number of failed starts for `name` since its last successful start.
    pub fn consecutive_start_failures(&self, name: &str) -> Result<u32> {
        let history = self.install_history(Some(name))?;
        let failures = history
            .iter()
            .rev()
            .take_while(|record| !record.was_installed)
            .filter(|record| record.is_failed_start())
            .count();
        Ok(failures as u32)
    }

    fn single_where(&self, clause: &str) -> Result<Option<InstalledVersion>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM installed_versions WHERE {clause} \
                     ORDER BY id DESC LIMIT 1"
                ),
                [],
                InstalledVersion::from_row,
            )
            .optional()?;
        Ok(record)
    }
}
