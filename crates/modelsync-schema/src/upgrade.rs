//! The upgrade runner.
//!
//! [`UpgradeRunner::run`] is the build entry point: it introspects the
//! backend, loads the previous model snapshot, consults the
//! [`UpgradeHandler`] (compatibility gate, then hints), plans the schema
//! changes, and applies the whole plan plus the new snapshot in a single
//! backend transaction. Nothing is committed on any failure.

use asupersync::{Cx, Outcome};
use modelsync_core::{Error, ModelRegistry, NamingConvention};

use crate::backend::{SchemaStore, SchemaTransaction};
use crate::diff::{recreate_plan, DiffWarning, SchemaComparer, UpgradePlan};
use crate::hints::{HintSet, InertHint};
use crate::snapshot::ModelSnapshot;
use crate::table::StorageSchema;

/// What a build is allowed to do to the storage schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeMode {
    /// Check only: fail unless storage already matches the model exactly.
    Validate,
    /// Plan and apply changes, gated by hints for anything destructive.
    #[default]
    Perform,
    /// Drop everything and build the expected schema from scratch.
    Recreate,
}

impl UpgradeMode {
    /// Short lowercase label used in log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            UpgradeMode::Validate => "validate",
            UpgradeMode::Perform => "perform",
            UpgradeMode::Recreate => "recreate",
        }
    }
}

/// Build configuration.
#[derive(Debug, Clone, Default)]
pub struct UpgradeConfig {
    /// What the build may do.
    pub mode: UpgradeMode,
    /// Version label stored in the snapshot and fed to the next build's
    /// compatibility gate.
    pub version: String,
    /// Fail the build when a hint resolves to nothing.
    pub strict_hints: bool,
}

impl UpgradeConfig {
    /// Creates a configuration for the given mode.
    pub fn new(mode: UpgradeMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Sets the model version label.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Makes inert hints fail the build.
    #[must_use]
    pub const fn strict_hints(mut self, strict: bool) -> Self {
        self.strict_hints = strict;
        self
    }
}

/// Application-provided upgrade policy.
///
/// The runner calls [`UpgradeHandler::can_upgrade_from`] when a previous
/// snapshot exists, and collects hints through
/// [`UpgradeHandler::add_upgrade_hints`] before planning.
pub trait UpgradeHandler: Send + Sync {
    /// Returns `true` if the running model can upgrade a storage last
    /// built under `old_version`. The default accepts every version.
    fn can_upgrade_from(&self, old_version: &str) -> bool {
        let _ = old_version;
        true
    }

    /// Contributes upgrade hints. The default contributes none.
    fn add_upgrade_hints(&self, hints: &mut HintSet) {
        let _ = hints;
    }
}

/// A handler that accepts every version and contributes no hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUpgradeHandler;

impl UpgradeHandler for DefaultUpgradeHandler {}

/// Handlers compose: a version is accepted only when every member accepts
/// it, and each member contributes its hints in order.
impl UpgradeHandler for Vec<Box<dyn UpgradeHandler>> {
    fn can_upgrade_from(&self, old_version: &str) -> bool {
        self.iter()
            .all(|handler| handler.can_upgrade_from(old_version))
    }

    fn add_upgrade_hints(&self, hints: &mut HintSet) {
        for handler in self {
            handler.add_upgrade_hints(hints);
        }
    }
}

/// The outcome of a completed build.
#[derive(Debug, Clone)]
pub struct UpgradeReport {
    /// Version label of the snapshot found in storage, if any.
    pub previous_version: Option<String>,
    /// Number of schema operations applied.
    pub applied: usize,
    /// Planning notes.
    pub warnings: Vec<DiffWarning>,
    /// Hints that resolved to nothing.
    pub inert_hints: Vec<InertHint>,
}

/// Drives a schema build against one backend.
pub struct UpgradeRunner<'h, H: UpgradeHandler + ?Sized> {
    config: UpgradeConfig,
    handler: &'h H,
}

impl<'h, H: UpgradeHandler + ?Sized> UpgradeRunner<'h, H> {
    /// Creates a runner for the given configuration and handler.
    pub fn new(config: UpgradeConfig, handler: &'h H) -> Self {
        Self { config, handler }
    }

    /// Runs the build: introspect, gate, plan, apply, commit.
    #[tracing::instrument(level = "info", skip_all, fields(mode = self.config.mode.as_str()))]
    pub async fn run<S: SchemaStore>(
        &self,
        cx: &Cx,
        store: &S,
        registry: &ModelRegistry,
        naming: &NamingConvention,
    ) -> Outcome<UpgradeReport, Error> {
        let actual = match store.introspect(cx).await {
            Outcome::Ok(schema) => schema,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let previous = match store.load_model_meta(cx).await {
            Outcome::Ok(Some(json)) => match ModelSnapshot::from_json(&json) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => return Outcome::Err(e),
            },
            Outcome::Ok(None) => None,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::info!(
            tables = actual.len(),
            previous_version = previous.as_ref().map(|s| s.version.as_str()),
            "storage introspected"
        );

        if self.config.mode != UpgradeMode::Recreate {
            if let Some(snapshot) = &previous {
                if !self.handler.can_upgrade_from(&snapshot.version) {
                    return Outcome::Err(Error::synchronization(
                        format!(
                            "upgrade handler rejects upgrading from version '{}'",
                            snapshot.version
                        ),
                        Vec::new(),
                    ));
                }
            }
        }

        let plan = match self.plan(previous.as_ref(), registry, naming, &actual) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        if self.config.mode == UpgradeMode::Validate {
            if !plan.is_noop() {
                return Outcome::Err(Error::synchronization(
                    "storage schema does not match the model",
                    plan.operation_summaries(),
                ));
            }
            tracing::info!("storage schema matches the model");
            return Outcome::Ok(UpgradeReport {
                previous_version: previous.map(|s| s.version),
                applied: 0,
                warnings: plan.warnings,
                inert_hints: plan.inert_hints,
            });
        }
        for warning in &plan.warnings {
            tracing::warn!(severity = ?warning.severity, "{}", warning.message);
        }

        let mut tx = match store.begin(cx).await {
            Outcome::Ok(tx) => tx,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        for op in &plan.operations {
            tracing::debug!(op = %op, "applying schema operation");
            match tx.apply(cx, op).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        let snapshot =
            ModelSnapshot::new(self.config.version.clone(), registry.clone(), naming.clone());
        let json = match snapshot.to_json() {
            Ok(json) => json,
            Err(e) => return Outcome::Err(e),
        };
        match tx.store_model_meta(cx, &json).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match tx.commit(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        tracing::info!(
            applied = plan.operations.len(),
            version = %self.config.version,
            "schema upgrade committed"
        );
        Outcome::Ok(UpgradeReport {
            previous_version: previous.map(|s| s.version),
            applied: plan.operations.len(),
            warnings: plan.warnings,
            inert_hints: plan.inert_hints,
        })
    }

    #[allow(clippy::result_large_err)]
    fn plan(
        &self,
        previous: Option<&ModelSnapshot>,
        registry: &ModelRegistry,
        naming: &NamingConvention,
        actual: &StorageSchema,
    ) -> Result<UpgradePlan, Error> {
        if self.config.mode == UpgradeMode::Recreate {
            return recreate_plan(registry, naming, actual);
        }
        let mut hints = HintSet::new();
        self.handler.add_upgrade_hints(&mut hints);
        SchemaComparer::new()
            .strict_hints(self.config.strict_hints)
            .compare(previous, registry, naming, actual, &hints)
    }
}

#[cfg(test)]
mod tests {
    use modelsync_core::{FieldDef, HierarchyDef, InheritanceSchema, TypeDef, ValueType};

    use super::*;
    use crate::expected::expected_schema;

    #[test]
    fn config_defaults_to_perform_with_lenient_hints() {
        let config = UpgradeConfig::default();
        assert_eq!(config.mode, UpgradeMode::Perform);
        assert!(!config.strict_hints);

        let config = UpgradeConfig::new(UpgradeMode::Validate)
            .version("2.0")
            .strict_hints(true);
        assert_eq!(config.mode, UpgradeMode::Validate);
        assert_eq!(config.version, "2.0");
        assert!(config.strict_hints);
    }

    #[test]
    fn default_handler_accepts_everything_and_adds_nothing() {
        let handler = DefaultUpgradeHandler;
        assert!(handler.can_upgrade_from("0.0.1"));
        let mut hints = HintSet::new();
        handler.add_upgrade_hints(&mut hints);
        assert!(hints.is_empty());
    }

    #[test]
    fn handler_lists_gate_jointly_and_pool_their_hints() {
        use crate::hints::UpgradeHint;

        struct Refuses(&'static str);
        impl UpgradeHandler for Refuses {
            fn can_upgrade_from(&self, old_version: &str) -> bool {
                old_version != self.0
            }

            fn add_upgrade_hints(&self, hints: &mut HintSet) {
                hints.add(UpgradeHint::RemoveField {
                    type_name: "app.Person".to_string(),
                    field: "nickname".to_string(),
                });
            }
        }

        let handlers: Vec<Box<dyn UpgradeHandler>> =
            vec![Box::new(DefaultUpgradeHandler), Box::new(Refuses("0.1"))];
        assert!(handlers.can_upgrade_from("0.2"));
        assert!(!handlers.can_upgrade_from("0.1"));

        let mut hints = HintSet::new();
        handlers.add_upgrade_hints(&mut hints);
        assert_eq!(hints.len(), 1);
    }

    #[test]
    fn recreate_plan_drops_children_before_creating_parents_first() {
        let registry = modelsync_core::ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text)),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap();
        let naming = NamingConvention::new();
        let actual = {
            let layout = modelsync_core::Layout::build(&registry, &naming).unwrap();
            expected_schema(&layout)
        };

        let plan = recreate_plan(&registry, &naming, &actual).unwrap();
        let summaries = plan.operation_summaries();
        assert_eq!(
            summaries,
            [
                "drop table app_Employee",
                "drop table app_Person",
                "create table app_Person",
                "create table app_Employee"
            ]
        );

        let empty = recreate_plan(&registry, &naming, &StorageSchema::new()).unwrap();
        assert_eq!(empty.operations.len(), 2);
        assert!(empty.warnings.is_empty());
    }
}
