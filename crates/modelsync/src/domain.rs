//! One-call domain assembly.
//!
//! [`Domain::build`] ties the layers together: it validates the model's
//! physical layout, synchronizes the backend schema through an
//! [`UpgradeRunner`], and hands back a handle that mints prefetch
//! managers over the synchronized model.
//!
//! # Example
//!
//! ```ignore
//! let domain = Domain::build(&cx, &store, registry, DomainConfig::default(), &handler).await?;
//! let mut prefetch = domain.prefetch();
//! ```

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use modelsync_core::{Error, Layout, ModelRegistry, NamingConvention};
use modelsync_schema::{SchemaStore, UpgradeConfig, UpgradeHandler, UpgradeReport, UpgradeRunner};
use modelsync_session::{PrefetchConfig, PrefetchManager};

/// Configuration for [`Domain::build`].
#[derive(Debug, Clone, Default)]
pub struct DomainConfig {
    /// Rules mapping model names onto storage names.
    pub naming: NamingConvention,
    /// What the schema build may do.
    pub upgrade: UpgradeConfig,
    /// Prefetch tuning.
    pub prefetch: PrefetchConfig,
}

/// A registered model bound to storage whose schema matches it.
///
/// Building the domain is the only step that writes to the backend; the
/// handle itself only reads and can be shared freely afterwards.
#[derive(Debug)]
pub struct Domain {
    registry: Arc<ModelRegistry>,
    layout: Arc<Layout>,
    naming: NamingConvention,
    prefetch: PrefetchConfig,
    report: UpgradeReport,
}

impl Domain {
    /// Builds the domain: validates the layout, synchronizes the backend
    /// schema, and returns the bound handle.
    ///
    /// Nothing is committed when any step fails; the backend keeps the
    /// schema it had.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn build<S, H>(
        cx: &Cx,
        store: &S,
        registry: ModelRegistry,
        config: DomainConfig,
        handler: &H,
    ) -> Outcome<Self, Error>
    where
        S: SchemaStore,
        H: UpgradeHandler + ?Sized,
    {
        let layout = match Layout::build(&registry, &config.naming) {
            Ok(layout) => layout,
            Err(e) => return Outcome::Err(e),
        };
        let runner = UpgradeRunner::new(config.upgrade, handler);
        let report = match runner.run(cx, store, &registry, &config.naming).await {
            Outcome::Ok(report) => report,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::info!(
            types = registry.types().count(),
            tables = layout.tables().count(),
            applied = report.applied,
            "domain bound to storage"
        );
        Outcome::Ok(Self {
            registry: Arc::new(registry),
            layout: Arc::new(layout),
            naming: config.naming,
            prefetch: config.prefetch,
            report,
        })
    }

    /// The registered model.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The model's physical layout.
    #[must_use]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// The naming convention the schema was built under.
    #[must_use]
    pub fn naming(&self) -> &NamingConvention {
        &self.naming
    }

    /// What the schema build found and did.
    #[must_use]
    pub fn upgrade_report(&self) -> &UpgradeReport {
        &self.report
    }

    /// Creates a prefetch manager over this domain's model.
    ///
    /// Managers are independent; each tracks its own containers and
    /// fetched state.
    #[must_use]
    pub fn prefetch(&self) -> PrefetchManager {
        PrefetchManager::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.layout),
            self.prefetch.clone(),
        )
    }
}
