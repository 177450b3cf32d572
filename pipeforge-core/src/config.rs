//! Configuration for pipelines and artifact storage.
//!
//! Configuration is layered with `figment`:
//! 1. Explicit overrides (passed as argument)
//! 2. Environment variables (prefixed with `PIPEFORGE_`)
//! 3. Workspace-local config (`.pipeforge/config.toml`)
//! 4. User config (`~/.config/pipeforge/config.toml`)
//! 5. Built-in defaults

use crate::artifact::{
    ArtifactLabel, ArtifactStore, DEFAULT_BRANCH, InMemoryArtifactStore, LocalArtifactStore,
};
use crate::error::{PipelineError, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory holding workspace-local state.
pub const WORKSPACE_DIR: &str = ".pipeforge";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Branch used for sink labels that do not name one.
    pub default_branch: String,
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
            store: StoreConfig::default(),
        }
    }
}

/// Where committed artifacts go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory of the local store. Defaults to
    /// `<workspace>/.pipeforge/artifacts`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Local,
    Memory,
}

impl PipelineConfig {
    /// Reject values that would produce unusable labels.
    pub fn validate(&self) -> Result<()> {
        let probe = format!("probe:{}", self.default_branch);
        let label: ArtifactLabel = probe
            .parse()
            .map_err(|e| PipelineError::Config(format!("default_branch: {e}")))?;
        if label.version.is_some() {
            return Err(PipelineError::Config(format!(
                "default_branch '{}' is not a branch name",
                self.default_branch
            )));
        }
        Ok(())
    }

    /// Root directory for the local store.
    pub fn artifact_root(&self, workspace: Option<&Path>) -> PathBuf {
        if let Some(root) = &self.store.root {
            return match workspace {
                Some(ws) if root.is_relative() => ws.join(root),
                _ => root.clone(),
            };
        }
        match workspace {
            Some(ws) => ws.join(WORKSPACE_DIR).join("artifacts"),
            None => PathBuf::from(WORKSPACE_DIR).join("artifacts"),
        }
    }

    /// Instantiate the configured store.
    pub fn build_store(&self, workspace: Option<&Path>) -> Arc<dyn ArtifactStore> {
        match self.store.backend {
            StoreBackend::Local => Arc::new(LocalArtifactStore::new(self.artifact_root(workspace))),
            StoreBackend::Memory => Arc::new(InMemoryArtifactStore::new()),
        }
    }
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "pipeforge", "pipeforge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join("config.toml")
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&PipelineConfig>,
) -> Result<PipelineConfig> {
    let config: PipelineConfig = figment(user_config_path().as_deref(), workspace, overrides)
        .extract()
        .map_err(|e| PipelineError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

fn figment(
    user_config: Option<&Path>,
    workspace: Option<&Path>,
    overrides: Option<&PipelineConfig>,
) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(user_config) = user_config {
        if user_config.exists() {
            figment = figment.merge(Toml::file(user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(ws_config));
        }
    }

    // PIPEFORGE_DEFAULT_BRANCH, PIPEFORGE_STORE__BACKEND, ...
    figment = figment.merge(Env::prefixed("PIPEFORGE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
}
