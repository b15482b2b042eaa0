//! ---
//! fu_section: "05-networking-external-interfaces"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Target metadata sources (plain and signed)."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! Sources of the [`TargetSet`]. Both implementations read the same
//! `targets.json` document; the signed source additionally checks an ed25519
//! signature over the `signed` object before trusting it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::gateway::{DeviceGateway, GatewayError};
use crate::target::{AppRef, Target, TargetSet};

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("malformed targets document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("targets signature rejected: {0}")]
    Signature(String),
    #[error("invalid signing key: {0}")]
    Key(String),
    #[error("targets cache {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Capability to load the targets offered to this device.
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Load targets; `refresh` asks for a server round trip instead of the cache.
    async fn load_targets(&self, refresh: bool) -> Result<TargetSet, MetadataError>;
}

/// Which targets in a document apply to this device.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub hardware_id: String,
    pub tags: Vec<String>,
}

impl DeviceFilter {
    fn accepts(&self, custom: &TargetCustom) -> bool {
        if !custom.hardware_ids.iter().any(|id| id == &self.hardware_id) {
            return false;
        }
        self.tags.is_empty() || custom.tags.iter().any(|tag| self.tags.contains(tag))
    }
}

#[derive(Debug, Deserialize)]
struct TargetsDocument {
    signed: serde_json::Value,
    #[serde(default)]
    signatures: Vec<DocumentSignature>,
}

#[derive(Debug, Deserialize)]
struct DocumentSignature {
    #[serde(default)]
    keyid: String,
    sig: String,
}

#[derive(Debug, Deserialize)]
struct SignedTargets {
    #[serde(default)]
    version: i64,
    #[serde(default)]
    targets: BTreeMap<String, TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    #[serde(default)]
    hashes: BTreeMap<String, String>,
    #[serde(default)]
    length: u64,
    custom: TargetCustom,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCustom {
    version: VersionRepr,
    #[serde(default)]
    hardware_ids: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, rename = "docker_compose_apps")]
    apps: BTreeMap<String, AppEntry>,
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    uri: String,
}

// Servers emit the version either as a number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Number(i64),
    Text(String),
}

impl VersionRepr {
    fn value(&self) -> Option<i64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

fn parse_document(raw: &[u8]) -> Result<TargetsDocument, MetadataError> {
    Ok(serde_json::from_slice(raw)?)
}

fn targets_from_signed(
    signed: &serde_json::Value,
    filter: &DeviceFilter,
) -> Result<TargetSet, MetadataError> {
    let signed: SignedTargets = serde_json::from_value(signed.clone())?;
    let mut targets = Vec::new();
    for (id, entry) in signed.targets {
        if !filter.accepts(&entry.custom) {
            continue;
        }
        let Some(version) = entry.custom.version.value() else {
            warn!(target_id = %id, "skipping target with non-numeric version");
            continue;
        };
        let apps = entry
            .custom
            .apps
            .into_iter()
            .map(|(name, app)| AppRef::new(name, app.uri))
            .collect();
        let mut target = Target::new(id, version, apps);
        target.sha256 = entry.hashes.get("sha256").cloned().unwrap_or_default();
        target.length = entry.length;
        targets.push(target);
    }
    Ok(TargetSet::new(signed.version, targets))
}

/// Unsigned `targets.json` fetched through the gateway and cached on disk.
#[derive(Debug, Clone)]
pub struct PlainTargetSource {
    gateway: Arc<DeviceGateway>,
    cache_path: PathBuf,
    filter: DeviceFilter,
}

impl PlainTargetSource {
    pub fn new(gateway: Arc<DeviceGateway>, cache_path: PathBuf, filter: DeviceFilter) -> Self {
        Self {
            gateway,
            cache_path,
            filter,
        }
    }

    /// Raw document bytes, from the server when refreshing or the cache is missing.
    ///
    /// The flag is true when the bytes came from the server.
    async fn document(&self, refresh: bool) -> Result<(Vec<u8>, bool), MetadataError> {
        if !refresh {
            match read_cache(&self.cache_path).await? {
                Some(raw) => return Ok((raw, false)),
                None => debug!(path = %self.cache_path.display(), "targets cache missing"),
            }
        }
        let raw = self.gateway.fetch_targets(&self.filter.tags).await?;
        Ok((raw, true))
    }

    async fn store(&self, raw: &[u8], fetched: bool) -> Result<(), MetadataError> {
        if fetched {
            write_cache(&self.cache_path, raw).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TargetSource for PlainTargetSource {
    async fn load_targets(&self, refresh: bool) -> Result<TargetSet, MetadataError> {
        let (raw, fetched) = self.document(refresh).await?;
        let document = parse_document(&raw)?;
        let set = targets_from_signed(&document.signed, &self.filter)?;
        self.store(&raw, fetched).await?;
        info!(targets = set.len(), metadata_version = set.metadata_version, "targets loaded");
        Ok(set)
    }
}

/// `targets.json` whose `signed` object must carry a valid ed25519 signature.
#[derive(Debug, Clone)]
pub struct SignedTargetSource {
    plain: PlainTargetSource,
    key: VerifyingKey,
}

impl SignedTargetSource {
    /// `public_key` is the base64 encoded 32 byte ed25519 key.
    pub fn new(plain: PlainTargetSource, public_key: &str) -> Result<Self, MetadataError> {
        Ok(Self {
            plain,
            key: decode_key(public_key)?,
        })
    }
}

#[async_trait]
impl TargetSource for SignedTargetSource {
    async fn load_targets(&self, refresh: bool) -> Result<TargetSet, MetadataError> {
        let (raw, fetched) = self.plain.document(refresh).await?;
        let document = parse_document(&raw)?;
        verify_document(&document, &self.key)?;
        let set = targets_from_signed(&document.signed, &self.plain.filter)?;
        self.plain.store(&raw, fetched).await?;
        info!(
            targets = set.len(),
            metadata_version = set.metadata_version,
            "signed targets loaded"
        );
        Ok(set)
    }
}

fn decode_key(encoded: &str) -> Result<VerifyingKey, MetadataError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| MetadataError::Key(format!("key must be base64 encoded: {err}")))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| MetadataError::Key(format!("expected 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&array).map_err(|err| MetadataError::Key(err.to_string()))
}

/// Hex encoded sha256 of the raw public key, used as the document key id.
pub fn key_id(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Bytes covered by the signature: compact JSON of `signed` with sorted keys.
pub fn canonical_signed_bytes(signed: &serde_json::Value) -> Result<Vec<u8>, MetadataError> {
    Ok(serde_json::to_vec(signed)?)
}

fn verify_document(document: &TargetsDocument, key: &VerifyingKey) -> Result<(), MetadataError> {
    if document.signatures.is_empty() {
        return Err(MetadataError::Signature("document is unsigned".into()));
    }
    let message = canonical_signed_bytes(&document.signed)?;
    let expected_id = key_id(key);
    for entry in &document.signatures {
        if !entry.keyid.is_empty() && entry.keyid != expected_id {
            continue;
        }
        let Ok(bytes) = general_purpose::STANDARD.decode(entry.sig.trim()) else {
            continue;
        };
        let Ok(array) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            continue;
        };
        if key.verify(&message, &Signature::from_bytes(&array)).is_ok() {
            return Ok(());
        }
    }
    Err(MetadataError::Signature(
        "no signature verifies with the configured key".into(),
    ))
}

async fn read_cache(path: &Path) -> Result<Option<Vec<u8>>, MetadataError> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(MetadataError::Cache {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_cache(path: &Path, raw: &[u8]) -> Result<(), MetadataError> {
    let wrap = |source| MetadataError::Cache {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
    }
    tokio::fs::write(path, raw).await.map_err(wrap)
}
