//! Mapping changed dataset files onto logical version tags.
//!
//! A file resolves to a version when exactly one configured marker appears
//! as a substring of its name. Zero or multiple matches leave the file
//! unresolved, which aborts the cycle before any training starts.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{RecastError, Result};

/// File names grouped by resolved version tag, plus the leftovers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Version tag -> file names, tag order.
    pub versions: BTreeMap<String, Vec<String>>,
    pub unresolved: BTreeSet<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Error out when any file failed to resolve.
    pub fn require_complete(self) -> Result<Self> {
        if self.unresolved.is_empty() {
            Ok(self)
        } else {
            let names: Vec<&str> = self.unresolved.iter().map(String::as_str).collect();
            Err(RecastError::VersionResolution(format!(
                "cannot map files to a unique version marker: {}",
                names.join(", ")
            )))
        }
    }
}

/// Resolve each file name against the configured version markers.
pub fn resolve(files: &[String], markers: &[String]) -> Resolution {
    let mut resolution = Resolution::default();
    for file in files {
        let matches: Vec<&String> = markers.iter().filter(|m| file.contains(m.as_str())).collect();
        match matches.as_slice() {
            [only] => resolution
                .versions
                .entry((*only).clone())
                .or_default()
                .push(file.clone()),
            _ => {
                resolution.unresolved.insert(file.clone());
            }
        }
    }
    resolution
}
