//! Entity state cache and prefetch manager for modelsync.
//!
//! `modelsync-session` is the **read-side session layer**. It batches entity
//! and field loads so the query layer can announce what it will need and pay
//! for one round of storage reads instead of one read per entity.
//!
//! # Role In The Architecture
//!
//! - **Entity keys**: address rows by `(hierarchy root, id)`, with the
//!   concrete type carried as a refinable annotation.
//! - **State cache**: fetched values accumulate per entity; entity-set loads
//!   keep a side record of how much of each set is known.
//! - **Prefetch manager**: merges repeated requests per key, partitions
//!   reads into per-table batches, resolves foreign keys in a second phase,
//!   and fires fixup callbacks as values become known.
//!
//! # Design Philosophy
//!
//! - **Announce, then execute**: `invoke_prefetch` is pure bookkeeping; all
//!   storage work happens in `execute_tasks`.
//! - **Validate at request time**: a field a type cannot reach fails when
//!   requested, never mid-batch.
//! - **Cancel-correct**: all async operations use `Cx` + `Outcome` via
//!   `modelsync-core`.
//!
//! # Example
//!
//! ```ignore
//! let mut prefetch = PrefetchManager::new(registry, layout, PrefetchConfig::default());
//!
//! // Announce upcoming needs; no I/O yet.
//! prefetch.invoke_prefetch(
//!     EntityKey::new("app.Person", 1_i64),
//!     Some("app.Person"),
//!     &[PrefetchFieldDescriptor::new("employer").eagerly_load()],
//! )?;
//!
//! // One batched round of reads.
//! let stats = prefetch.execute_tasks(&cx, &store).await?;
//! let employer = prefetch.state().field(&key, "employer");
//! ```

pub mod key;
pub mod prefetch;
pub mod state;

pub use key::EntityKey;
pub use prefetch::{
    ContainerState, FetchedCallback, GraphContainer, PrefetchConfig, PrefetchFieldDescriptor,
    PrefetchManager, PrefetchStats, DEFAULT_MAX_BATCH_SIZE,
};
pub use state::{EntitySetState, EntityState, EntityStateCache};
