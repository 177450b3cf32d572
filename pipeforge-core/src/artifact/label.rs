//! Artifact addressing: `name:branch[:version]`.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user-facing label. Branch and version may be omitted; a missing branch
/// falls back to the configured default, a missing version means "latest".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactLabel {
    pub name: String,
    pub branch: Option<String>,
    pub version: Option<u32>,
}

impl ArtifactLabel {
    pub fn new(name: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch: Some(branch.into()),
            version: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Branch of this label, or `default` when none was given.
    pub fn branch_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.branch.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for ArtifactLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(branch) = &self.branch {
            write!(f, ":{branch}")?;
            if let Some(version) = self.version {
                write!(f, ":{version}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for ArtifactLabel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() > 3 {
            return Err(PipelineError::invalid_label(
                s,
                "expected name:branch[:version]",
            ));
        }
        let name = check_segment(s, parts[0], "name")?;
        let branch = match parts.get(1) {
            Some(branch) => Some(check_segment(s, branch, "branch")?),
            None => None,
        };
        let version = match parts.get(2) {
            Some(raw) => Some(parse_version(s, raw)?),
            None => None,
        };
        Ok(Self {
            name,
            branch,
            version,
        })
    }
}

/// A fully resolved artifact address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub branch: String,
    pub version: u32,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, branch: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            branch: branch.into(),
            version,
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.branch, self.version)
    }
}

impl FromStr for ArtifactRef {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let label: ArtifactLabel = s.parse()?;
        match (label.branch, label.version) {
            (Some(branch), Some(version)) => Ok(Self {
                name: label.name,
                branch,
                version,
            }),
            _ => Err(PipelineError::invalid_label(
                s,
                "a resolved reference needs name:branch:version",
            )),
        }
    }
}

impl From<&ArtifactRef> for ArtifactLabel {
    fn from(r: &ArtifactRef) -> Self {
        Self {
            name: r.name.clone(),
            branch: Some(r.branch.clone()),
            version: Some(r.version),
        }
    }
}

/// Segments double as directory names in the local store, so only a
/// conservative character set is accepted.
fn check_segment(label: &str, segment: &str, what: &str) -> Result<String> {
    if segment.is_empty() {
        return Err(PipelineError::invalid_label(label, format!("{what} is empty")));
    }
    if segment == "." || segment == ".." {
        return Err(PipelineError::invalid_label(label, format!("{what} is reserved")));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(PipelineError::invalid_label(
            label,
            format!("{what} contains invalid character '{bad}'"),
        ));
    }
    Ok(segment.to_string())
}

fn parse_version(label: &str, raw: &str) -> Result<u32> {
    match raw.parse::<u32>() {
        Ok(0) => Err(PipelineError::invalid_label(label, "versions start at 1")),
        Ok(v) => Ok(v),
        Err(_) => Err(PipelineError::invalid_label(
            label,
            format!("version '{raw}' is not a positive integer"),
        )),
    }
}
