//! Run settings document.
//!
//! The on-disk (JSON) counterpart of a `RunRequest`: what the CLI parses
//! before handing the run to the controller. Workspace and partition
//! count can be overridden from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use stormpipe_topology::{PerspectiveRequest, ProgramSet, RunRequest};

#[derive(Debug, Deserialize)]
pub struct RunSettings {
  pub partitions: u32,
  pub perspectives: Vec<PerspectiveRequest>,
  #[serde(default)]
  pub workspace: Option<PathBuf>,
  #[serde(default)]
  pub programs: Option<ProgramSet>,
}

impl RunSettings {
  pub fn parse(content: &str) -> Result<Self> {
    serde_json::from_str(content).context("failed to parse run settings")
  }

  pub fn into_request(
    self,
    workspace_override: Option<PathBuf>,
    partitions_override: Option<u32>,
  ) -> Result<RunRequest> {
    let Some(workspace) = workspace_override.or(self.workspace) else {
      bail!("no workspace root: set \"workspace\" in the settings file or pass --workspace");
    };
    Ok(RunRequest {
      partitions: partitions_override.unwrap_or(self.partitions),
      perspectives: self.perspectives,
      workspace,
      programs: self.programs.unwrap_or_default(),
    })
  }
}
