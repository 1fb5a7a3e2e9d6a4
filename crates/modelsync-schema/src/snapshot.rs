//! Persisted model snapshots.
//!
//! After every successful build the registered model, its naming
//! convention, and a caller-chosen version label are serialized and stored
//! through the backend's metadata channel. The next build reads the
//! snapshot back to learn what the storage was built from: upgrade hints
//! resolve against the snapshot's layout, and the version label feeds the
//! upgrade handler's compatibility gate. A missing snapshot means a first
//! build.

use modelsync_core::{Error, Layout, ModelRegistry, NamingConvention, Result};
use serde::{Deserialize, Serialize};

/// The model a storage was last built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Caller-chosen version label, e.g. `"2.1"`.
    pub version: String,
    /// The registered model at build time.
    pub registry: ModelRegistry,
    /// The naming convention the physical names were derived with.
    pub naming: NamingConvention,
}

impl ModelSnapshot {
    /// Captures a snapshot of the given model under `version`.
    pub fn new(
        version: impl Into<String>,
        registry: ModelRegistry,
        naming: NamingConvention,
    ) -> Self {
        Self {
            version: version.into(),
            registry,
            naming,
        }
    }

    /// Serializes the snapshot for the backend's metadata channel.
    #[allow(clippy::result_large_err)]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::snapshot(format!("cannot serialize model snapshot: {e}")))
    }

    /// Parses a snapshot previously produced by [`ModelSnapshot::to_json`].
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::snapshot(format!("cannot parse model snapshot: {e}")))
    }

    /// Rebuilds the physical layout the snapshot's model mapped to.
    #[allow(clippy::result_large_err)]
    pub fn layout(&self) -> Result<Layout> {
        Layout::build(&self.registry, &self.naming)
    }
}
