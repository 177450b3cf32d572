//! CLI subcommand handlers.

use crate::ArtifactAction;
use crate::Commands;
use crate::ConfigAction;
use pipeforge_core::config::{WORKSPACE_DIR, workspace_config_path};
use pipeforge_core::{
    Artifact, ArtifactLabel, ArtifactRef, ArtifactStore, ArtifactVersioner, PipelineConfig,
    StoreBackend,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Artifacts { action } => handle_artifacts(action, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load_config(workspace: &Path) -> anyhow::Result<PipelineConfig> {
    pipeforge_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn handle_artifacts(action: ArtifactAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(workspace)?;
    if config.store.backend == StoreBackend::Memory {
        tracing::warn!("Store backend is 'memory'; nothing outlives a pipeline process");
    }
    let store = config.build_store(Some(workspace));
    tracing::debug!(root = %config.artifact_root(Some(workspace)).display(), "Using artifact store");

    match action {
        ArtifactAction::List { filter } => {
            let filter = filter.map(|f| f.parse::<ArtifactLabel>()).transpose()?;
            print!("{}", render_list(store.as_ref(), filter.as_ref())?);
            Ok(())
        }
        ArtifactAction::Show { label, payload } => {
            let artifact = fetch(store, &config, &label)?;
            print!("{}", render_artifact(&artifact, payload)?);
            Ok(())
        }
        ArtifactAction::Verify { label } => {
            let artifact = fetch(store, &config, &label)?;
            if artifact.verify_integrity() {
                println!("{}: ok ({})", artifact.reference(), artifact.content_hash());
                Ok(())
            } else {
                anyhow::bail!(
                    "{}: payload does not match recorded hash {}",
                    artifact.reference(),
                    artifact.content_hash()
                )
            }
        }
    }
}

fn fetch(
    store: Arc<dyn ArtifactStore>,
    config: &PipelineConfig,
    label: &str,
) -> anyhow::Result<Artifact> {
    let label: ArtifactLabel = label.parse()?;
    let versioner = ArtifactVersioner::new(store).with_default_branch(&config.default_branch);
    Ok(versioner.get(&label)?)
}

/// One line per committed version: reference, kind, creation time, short hash.
fn render_list(store: &dyn ArtifactStore, filter: Option<&ArtifactLabel>) -> anyhow::Result<String> {
    let labels: Vec<(String, String)> = store
        .labels()?
        .into_iter()
        .filter(|(name, branch)| match filter {
            Some(f) => f.name == *name && f.branch.as_ref().is_none_or(|b| b == branch),
            None => true,
        })
        .collect();

    let mut out = String::new();
    if labels.is_empty() {
        writeln!(out, "No artifacts found.")?;
        return Ok(out);
    }
    for (name, branch) in labels {
        for version in store.versions(&name, &branch)? {
            let reference = ArtifactRef::new(&name, &branch, version);
            match store.load(&reference) {
                Ok(Some(artifact)) => writeln!(
                    out,
                    "{:<32} {:<8} {}  {}",
                    reference.to_string(),
                    artifact.kind().to_string(),
                    artifact.created_at().format("%Y-%m-%d %H:%M:%S"),
                    &artifact.content_hash()[..12.min(artifact.content_hash().len())]
                )?,
                Ok(None) => writeln!(out, "{:<32} (unreadable)", reference.to_string())?,
                Err(e) => {
                    tracing::warn!(artifact = %reference, error = %e, "Skipping unreadable artifact");
                    writeln!(out, "{:<32} (unreadable)", reference.to_string())?
                }
            }
        }
    }
    Ok(out)
}

fn render_artifact(artifact: &Artifact, with_payload: bool) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Artifact:   {}", artifact.reference())?;
    writeln!(out, "Kind:       {}", artifact.kind())?;
    writeln!(out, "Created:    {}", artifact.created_at().to_rfc3339())?;
    if let Some(run_id) = artifact.run_id() {
        writeln!(out, "Run:        {run_id}")?;
    }
    writeln!(out, "Hash:       {}", artifact.content_hash())?;
    if !artifact.lineage().is_empty() {
        writeln!(out, "Lineage:    {}", artifact.lineage().join(" -> "))?;
    }
    if !artifact.metrics().is_empty() {
        writeln!(out, "Metrics:")?;
        for (key, value) in artifact.metrics() {
            writeln!(out, "  {key} = {}", serde_json::to_string(value)?)?;
        }
    }
    if !artifact.params().is_empty() {
        writeln!(out, "Params:")?;
        for (key, value) in artifact.params() {
            writeln!(out, "  {key} = {}", serde_json::to_string(value)?)?;
        }
    }
    if with_payload {
        writeln!(out, "Payload:")?;
        writeln!(out, "{}", serde_json::to_string_pretty(artifact.payload())?)?;
    }
    Ok(out)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            std::fs::create_dir_all(workspace.join(WORKSPACE_DIR))?;

            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&PipelineConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
