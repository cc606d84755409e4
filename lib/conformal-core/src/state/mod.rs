//! Persistent-store observation.
//!
//! The engine never talks to a database directly: callers inject a
//! [`StateSource`] for their backing store, and the [`StateSampler`] turns it
//! into comparable [`StateSnapshot`]s. Entity kinds are plain values, so one
//! small adapter per storage backend is all an integration needs.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::ConformalError;

mod checksum;
pub(crate) use self::checksum::checksum_rows;

mod snapshot;
pub use self::snapshot::{EntityChange, EntitySample, StateDiff, StateSnapshot};

mod sampler;
pub use self::sampler::StateSampler;

/// A named collection in the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKindDescriptor {
    /// Collection name, e.g. `Users`.
    pub name: String,
    /// Name of the primary-key field within a record.
    pub key_field_name: String,
    /// Opaque backend type identifier; never interpreted by the engine.
    pub type_id: Option<String>,
}

/// Read access to the persistent store backing the service under test.
///
/// Implementations must be safe for concurrent reads; the engine issues
/// parallel queries bounded by [`StateTrackingConfig::max_parallelism`].
#[async_trait]
pub trait StateSource: Send + Sync {
    /// The entity kinds the store exposes.
    async fn entity_kinds(&self) -> Result<Vec<EntityKindDescriptor>, ConformalError>;

    /// Number of records currently stored for a kind.
    async fn count(&self, kind: &str) -> Result<u64, ConformalError>;

    /// All records of a kind, stably ordered by key.
    async fn list_all(&self, kind: &str) -> Result<Vec<serde_json::Value>, ConformalError>;

    /// A key of some existing record of the kind, if any exist.
    async fn random_key(&self, kind: &str) -> Result<Option<serde_json::Value>, ConformalError>;
}

/// Which entity kinds get sampled, and how.
#[derive(Debug, Clone)]
pub struct StateTrackingConfig {
    /// Sample per-kind record counts.
    pub track_entity_counts: bool,
    /// Also checksum record contents. Expensive: materializes every row.
    pub track_entity_checksums: bool,
    /// When non-empty, only these kinds are tracked (wins over `exclude`).
    pub include_only: BTreeSet<String>,
    /// Kinds never tracked.
    pub exclude: BTreeSet<String>,
    /// Upper bound on concurrent per-kind queries.
    pub max_parallelism: usize,
    /// Budget for one per-kind sample query.
    pub sample_timeout: Duration,
}

impl Default for StateTrackingConfig {
    fn default() -> Self {
        let max_parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            track_entity_counts: true,
            track_entity_checksums: false,
            include_only: BTreeSet::new(),
            exclude: BTreeSet::new(),
            max_parallelism,
            sample_timeout: Duration::from_secs(30),
        }
    }
}

impl StateTrackingConfig {
    /// Returns whether a kind participates in snapshots.
    pub fn is_tracked(&self, kind: &str) -> bool {
        if self.include_only.is_empty() {
            !self.exclude.contains(kind)
        } else {
            self.include_only.contains(kind)
        }
    }
}
