//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "App-level comparison of two targets."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::target::{AppRef, Target};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppChange {
    pub name: String,
    pub from_uri: String,
    pub to_uri: String,
}

/// Apps added, removed, updated, and unchanged between two targets, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDiff {
    pub from: String,
    pub to: String,
    pub added: Vec<AppRef>,
    pub removed: Vec<AppRef>,
    pub updated: Vec<AppChange>,
    pub unchanged: Vec<AppRef>,
}

impl TargetDiff {
    pub fn between(from: &Target, to: &Target) -> Self {
        let before: BTreeMap<&str, &AppRef> =
            from.apps.iter().map(|app| (app.name.as_str(), app)).collect();
        let after: BTreeMap<&str, &AppRef> =
            to.apps.iter().map(|app| (app.name.as_str(), app)).collect();

        let mut diff = Self {
            from: from.to_string(),
            to: to.to_string(),
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
            unchanged: Vec::new(),
        };
        for (name, app) in &after {
            match before.get(name) {
                None => diff.added.push((*app).clone()),
                Some(old) if old.uri == app.uri => diff.unchanged.push((*app).clone()),
                Some(old) => diff.updated.push(AppChange {
                    name: name.to_string(),
                    from_uri: old.uri.clone(),
                    to_uri: app.uri.clone(),
                }),
            }
        }
        for (name, app) in &before {
            if !after.contains_key(name) {
                diff.removed.push((*app).clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

impl fmt::Display for TargetDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} -> {}", self.from, self.to)?;
        if self.is_empty() {
            return writeln!(f, "  no app changes");
        }
        for app in &self.added {
            writeln!(f, "  + {} {}", app.name, app.uri)?;
        }
        for app in &self.removed {
            writeln!(f, "  - {} {}", app.name, app.uri)?;
        }
        for change in &self.updated {
            writeln!(f, "  ~ {} {} -> {}", change.name, change.from_uri, change.to_uri)?;
        }
        for app in &self.unchanged {
            writeln!(f, "  = {}", app.name)?;
        }
        Ok(())
    }
}
