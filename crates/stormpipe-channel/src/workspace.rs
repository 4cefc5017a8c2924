//! Run workspace lifecycle.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AllocationError;

/// Filesystem namespace for one run: `work/` holds materialized
/// intermediates and persistence sinks, `output/` holds reports. Nothing
/// outside those two subtrees is ever touched.
#[derive(Debug, Clone)]
pub struct Workspace {
  root: PathBuf,
}

impl Workspace {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn work_dir(&self) -> PathBuf {
    self.root.join("work")
  }

  pub fn output_dir(&self) -> PathBuf {
    self.root.join("output")
  }

  pub fn work_file(&self, name: &str) -> PathBuf {
    self.work_dir().join(name)
  }

  pub fn output_file(&self, name: &str) -> PathBuf {
    self.output_dir().join(name)
  }

  /// Remove residue from a previous run and recreate the namespaces.
  ///
  /// Idempotent: running it twice yields the same pair of empty
  /// directories. A pre-existing non-directory at either path is a
  /// collision, not something to silently delete.
  pub async fn prepare(&self) -> Result<(), AllocationError> {
    for dir in [self.work_dir(), self.output_dir()] {
      match tokio::fs::metadata(&dir).await {
        Ok(meta) if meta.is_dir() => {
          tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|source| AllocationError::Workspace {
              path: dir.clone(),
              source,
            })?;
        }
        Ok(_) => {
          return Err(AllocationError::PathCollision { path: dir });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
          return Err(AllocationError::Workspace {
            path: dir.clone(),
            source,
          });
        }
      }
      tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| AllocationError::Workspace {
          path: dir.clone(),
          source,
        })?;
    }
    debug!(root = %self.root.display(), "workspace prepared");
    Ok(())
  }
}
