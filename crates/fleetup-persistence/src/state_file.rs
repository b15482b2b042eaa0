//! ---
//! fu_section: "03-persistence-logging"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Hashed JSON state files written atomically and durably."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{PersistenceError, Result};

/// Current state file envelope version.
pub const STATE_FILE_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateEnvelope<T> {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
    state: T,
}

/// Persist `state` to `path` inside a hashed envelope.
///
/// The file is written next to its final location, synced, and renamed into
/// place, so a reader or a reboot sees either the previous or the new content.
pub fn save_state<T: Serialize>(state: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let envelope = StateEnvelope {
        version: STATE_FILE_VERSION,
        created_at: Utc::now(),
        hash: compute_hash(state)?,
        state,
    };

    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &envelope)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_parent(path)
}

// The rename itself is durable only once the directory entry is synced.
#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}

/// Load the state stored at `path`, rejecting files whose hash does not match.
pub fn load_state<T: Serialize + DeserializeOwned>(path: &Path) -> Result<T> {
    let envelope: StateEnvelope<T> = load_envelope(path)?;
    if compute_hash(&envelope.state)? != envelope.hash {
        return Err(PersistenceError::HashMismatch);
    }
    Ok(envelope.state)
}

fn load_envelope<T: DeserializeOwned>(path: &Path) -> Result<StateEnvelope<T>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

// Hashing goes through `serde_json::Value` so a typed payload and its
// untyped reading produce the same canonical bytes.
fn compute_hash<T: Serialize + ?Sized>(state: &T) -> Result<String> {
    let value = serde_json::to_value(state)?;
    let serialized = serde_json::to_vec(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Apps {
        running: BTreeMap<String, String>,
    }

    fn sample() -> Apps {
        let mut running = BTreeMap::new();
        running.insert("shellhttpd".to_string(), "hub.example/shellhttpd@sha256:aa".to_string());
        Apps { running }
    }

    #[test]
    fn save_and_load_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runtime").join("state.json");

        save_state(&sample(), &path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded: Apps = load_state(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn load_rejects_tampered_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&sample(), &path).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["state"]["running"]["shellhttpd"] = serde_json::json!("evil");
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        let err = load_state::<Apps>(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::HashMismatch));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = load_state::<Apps>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PersistenceError::Io(_)));
    }
}
