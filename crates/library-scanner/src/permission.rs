//! Permission collaborator.
//!
//! The registry re-checks grant state through this trait; platform storage
//! frameworks and cloud providers each supply their own probe.

use anyhow::Result;
use async_trait::async_trait;
use shared::models::{LibraryRoot, PermissionState, RootSource};
use std::path::Path;
use tracing::debug;

/// Reports the current grant state for a root.
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn check(&self, root: &LibraryRoot) -> Result<PermissionState>;
}

/// Probe for local filesystem roots: readable directory means granted.
pub struct LocalPermissionProbe;

#[async_trait]
impl PermissionProbe for LocalPermissionProbe {
    async fn check(&self, root: &LibraryRoot) -> Result<PermissionState> {
        if root.source != RootSource::Local {
            return Ok(PermissionState::Unknown);
        }

        let path = root.uri.clone();
        let state = tokio::task::spawn_blocking(move || {
            let path = Path::new(&path);
            if path.is_dir() && std::fs::read_dir(path).is_ok() {
                PermissionState::Granted
            } else {
                PermissionState::Revoked
            }
        })
        .await?;

        debug!(root_id = root.id, state = %state, "Probed root permission");
        Ok(state)
    }
}
