//! Picks a deployment strategy for the current environment.
//!
//! Order under [`StrategyPreference::Auto`]:
//!
//! 1. Typed client (in-cluster service account or local kubeconfig).
//! 2. `kubectl` found on `PATH` (or at `KUBECTL_PATH`).
//!
//! Running inside a cluster without a working typed client is treated as a
//! broken deployment rather than a reason to fall back, because the CLI would
//! be talking to whatever kubeconfig happens to be mounted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{SidecarConfig, StrategyPreference};
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::kube_api::KubeStrategy;
use crate::sidecar::kubectl::KubectlStrategy;
use crate::sidecar::ports::PortAllocator;
use crate::sidecar::strategy::DeploymentStrategy;

/// Both variables are injected into every pod by the cluster.
pub fn in_cluster() -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
        && std::env::var_os("KUBERNETES_SERVICE_PORT").is_some()
}

/// Resolve the kubectl binary, accepting either a bare name or a path.
pub async fn find_kubectl(configured: &Path) -> Option<PathBuf> {
    if configured.components().count() > 1 {
        let is_file = tokio::fs::metadata(configured)
            .await
            .is_ok_and(|meta| meta.is_file());
        return is_file.then(|| configured.to_path_buf());
    }

    #[cfg(unix)]
    let lookup = "which";
    #[cfg(windows)]
    let lookup = "where";

    let output = tokio::process::Command::new(lookup)
        .arg(configured)
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .await
        .ok()
        .filter(|o| o.status.success())?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Select a strategy according to `config`.
///
/// Returns `Ok(None)` when sidecars are unavailable but not required; the
/// caller then rejects sidecar adapters at registration time.
pub async fn select_strategy(
    config: &SidecarConfig,
) -> Result<Option<Arc<dyn DeploymentStrategy>>> {
    let chosen = match config.strategy {
        StrategyPreference::Disabled => {
            tracing::info!("Sidecar support disabled");
            Ok(None)
        }
        StrategyPreference::Kube => KubeStrategy::connect()
            .await
            .map(|s| Some(Arc::new(s) as Arc<dyn DeploymentStrategy>)),
        StrategyPreference::Kubectl => kubectl_strategy(config)
            .await
            .map(|s| Some(Arc::new(s) as Arc<dyn DeploymentStrategy>)),
        StrategyPreference::Auto => auto_select(config).await,
    };

    match chosen {
        Ok(Some(strategy)) => {
            tracing::info!(strategy = strategy.name(), "Sidecar strategy selected");
            Ok(Some(strategy))
        }
        Ok(None) if config.required && config.enabled() => Err(SidecarError::NoStrategy {
            reason: "no cluster client and no kubectl available".to_string(),
        }),
        Ok(None) => Ok(None),
        Err(e) if config.required => Err(e),
        Err(e @ SidecarError::InClusterClientUnavailable { .. }) => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "Sidecar support unavailable");
            Ok(None)
        }
    }
}

async fn auto_select(config: &SidecarConfig) -> Result<Option<Arc<dyn DeploymentStrategy>>> {
    match KubeStrategy::connect().await {
        Ok(strategy) => return Ok(Some(Arc::new(strategy))),
        Err(e) if in_cluster() => {
            return Err(SidecarError::InClusterClientUnavailable {
                reason: e.to_string(),
            });
        }
        Err(e) => tracing::debug!(error = %e, "Typed cluster client unavailable, trying kubectl"),
    }

    match kubectl_strategy(config).await {
        Ok(strategy) => Ok(Some(Arc::new(strategy))),
        Err(e) => {
            tracing::debug!(error = %e, "kubectl unavailable");
            Ok(None)
        }
    }
}

async fn kubectl_strategy(config: &SidecarConfig) -> Result<KubectlStrategy> {
    let binary = find_kubectl(&config.kubectl_path).await.ok_or_else(|| SidecarError::NoStrategy {
        reason: format!("'{}' not found", config.kubectl_path.display()),
    })?;
    let strategy = KubectlStrategy::new(binary, PortAllocator::new(config.forward_ports.clone()));
    strategy.check_binary().await?;
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_yields_none() {
        let config = SidecarConfig {
            strategy: StrategyPreference::Disabled,
            required: true,
            ..Default::default()
        };
        assert!(select_strategy(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_required_kubectl_missing_is_fatal() {
        let config = SidecarConfig {
            strategy: StrategyPreference::Kubectl,
            required: true,
            kubectl_path: PathBuf::from("/nonexistent/kubectl-for-tests"),
            ..Default::default()
        };
        let err = select_strategy(&config).await.err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigurationFatal);
    }

    #[tokio::test]
    async fn test_optional_kubectl_missing_is_none() {
        let config = SidecarConfig {
            strategy: StrategyPreference::Kubectl,
            required: false,
            kubectl_path: PathBuf::from("/nonexistent/kubectl-for-tests"),
            ..Default::default()
        };
        assert!(select_strategy(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_kubectl_missing() {
        assert!(find_kubectl(Path::new("/nonexistent/kubectl-for-tests")).await.is_none());
        assert!(find_kubectl(Path::new("kubectl-for-tests-not-on-path")).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_find_kubectl_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubectl");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        assert_eq!(find_kubectl(&path).await, Some(path.clone()));
        assert!(find_kubectl(dir.path()).await.is_none());
    }
}
