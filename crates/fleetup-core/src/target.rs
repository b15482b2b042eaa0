//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Target model and target set lookups."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the sentinel returned when no target can be resolved.
pub const UNKNOWN_TARGET_ID: &str = "unknown";

/// A workload reference inside a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRef {
    /// Application name, unique within a target.
    pub name: String,
    /// Content-addressed URI of the workload bundle.
    pub uri: String,
}

impl AppRef {
    /// Build a reference from its name and URI.
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// A named, versioned software target offered to this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique identifier per hardware id.
    pub id: String,
    /// Monotonic version, unique across targets for one hardware id.
    pub version: i64,
    /// Primary content hash advertised by the metadata.
    #[serde(default)]
    pub sha256: String,
    /// Size advertised by the metadata.
    #[serde(default)]
    pub length: u64,
    /// Workloads that make up the target.
    #[serde(default)]
    pub apps: Vec<AppRef>,
}

impl Target {
    /// Construct a target without content metadata.
    pub fn new(id: impl Into<String>, version: i64, apps: Vec<AppRef>) -> Self {
        Self {
            id: id.into(),
            version,
            sha256: String::new(),
            length: 0,
            apps,
        }
    }

    /// The "no resolvable target" sentinel.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_TARGET_ID, -1, Vec::new())
    }

    /// True for the sentinel produced by [`Target::unknown`].
    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_TARGET_ID
    }

    /// Copy of this target restricted to apps named in `allow`.
    ///
    /// `None` keeps every app, an empty list keeps none.
    pub fn shortlist_apps(&self, allow: Option<&[String]>) -> Self {
        self.shortlist_by(allow, |app| &app.name)
    }

    /// Copy of this target restricted to apps whose URI appears in `allow`.
    pub fn shortlist_apps_by_uri(&self, allow: Option<&[String]>) -> Self {
        self.shortlist_by(allow, |app| &app.uri)
    }

    fn shortlist_by<F>(&self, allow: Option<&[String]>, key: F) -> Self
    where
        F: Fn(&AppRef) -> &String,
    {
        let Some(allow) = allow else {
            return self.clone();
        };
        let allowed: HashSet<&String> = allow.iter().collect();
        let mut copy = self.clone();
        copy.apps.retain(|app| allowed.contains(key(app)));
        copy
    }

    /// Names of the apps in declaration order.
    pub fn app_names(&self) -> Vec<String> {
        self.apps.iter().map(|app| app.name.clone()).collect()
    }

    /// URIs of the apps in declaration order.
    pub fn app_uris(&self) -> Vec<String> {
        self.apps.iter().map(|app| app.uri.clone()).collect()
    }

    /// True when both targets reference the same set of app URIs.
    pub fn same_apps(&self, other: &Target) -> bool {
        let mine: HashSet<&str> = self.apps.iter().map(|app| app.uri.as_str()).collect();
        let theirs: HashSet<&str> = other.apps.iter().map(|app| app.uri.as_str()).collect();
        mine == theirs
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.id, self.version)
    }
}

/// Targets known from the latest metadata refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSet {
    /// Version of the metadata document the set came from.
    pub metadata_version: i64,
    targets: Vec<Target>,
}

impl TargetSet {
    /// Build a set from the metadata version and its targets.
    pub fn new(metadata_version: i64, targets: Vec<Target>) -> Self {
        Self {
            metadata_version,
            targets,
        }
    }

    /// Number of targets in the set.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when no target is offered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterate over targets in metadata order.
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    /// Look a target up by identifier.
    pub fn by_id(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|target| target.id == id)
    }

    /// Look a target up by version.
    pub fn by_version(&self, version: i64) -> Option<&Target> {
        self.targets.iter().find(|target| target.version == version)
    }

    /// Target with the highest version.
    pub fn latest(&self) -> Option<&Target> {
        self.targets.iter().max_by_key(|target| target.version)
    }

    /// Targets ordered by ascending version.
    pub fn sorted(&self) -> Vec<&Target> {
        let mut sorted: Vec<&Target> = self.targets.iter().collect();
        sorted.sort_by_key(|target| target.version);
        sorted
    }
}
