//! Container launch commands and their structured form.
//!
//! Operators configure sidecars with a single-line `docker run ...` command.
//! That string is parsed exactly once, at the adapter registration boundary,
//! into an immutable [`LaunchSpec`]. Nothing deeper in the gateway looks at
//! the raw string again.

mod parser;
pub mod translate;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::ErrorKind;

pub use parser::{DEFAULT_CONTAINER_PORT, parse, parse_with_default_port};
pub use translate::{ResourceLimits, ServiceSpec, Translator, WorkloadSpec, resource_name};

/// Parsed form of a container-run command.
///
/// Equality is structural, so two parses of the same command compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    /// Image reference, e.g. `ghcr.io/example/server:latest`.
    pub image: String,
    /// Environment from `-e`/`--env` flags, duplicates resolved last-wins.
    pub env: BTreeMap<String, String>,
    /// Container port the server listens on.
    pub port: u16,
    /// Arguments after the image, passed to the container entrypoint.
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Merge adapter-level overrides on top of the command's environment.
    pub fn merged_env(&self, overrides: &HashMap<String, String>) -> BTreeMap<String, String> {
        merge_env(&self.env, overrides)
    }
}

/// Merge two environment maps; keys in `overrides` beat same-named keys in `base`.
pub fn merge_env(
    base: &BTreeMap<String, String>,
    overrides: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Errors produced while parsing a launch command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("Malformed launch command: {reason}")]
    MalformedCommand { reason: String },

    #[error("No image reference found in launch command")]
    ImageNotFound,

    #[error("Invalid port '{value}' in launch command")]
    InvalidPort { value: String },
}

impl LaunchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedCommand { .. } | Self::InvalidPort { .. } => ErrorKind::MalformedCommand,
            Self::ImageNotFound => ErrorKind::ImageNotFound,
        }
    }
}
