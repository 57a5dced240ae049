use crate::model::{default_notice_types, default_offices, Parameters};
use crate::relay::topic::{NOTICE_TYPES_PATH, OFFICES_PATH, PARAMS_PATH};
use crate::store::{SnapshotStore, StoreError, StorePath};
use serde::Serialize;
use tracing::{info, warn};

/// Which sub-trees `ensure_defaults` had to create
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub params: bool,
    pub notice_types: bool,
    pub offices: bool,
}

/// Write default parameters, notice types and offices wherever the store
/// has none. Existing sub-trees are never touched, so calling this on every
/// start is safe.
pub async fn ensure_defaults(store: &dyn SnapshotStore) -> SeedReport {
    let report = SeedReport {
        params: seed_if_absent(store, PARAMS_PATH, &Parameters::default()).await,
        notice_types: seed_if_absent(store, NOTICE_TYPES_PATH, &default_notice_types()).await,
        offices: seed_if_absent(store, OFFICES_PATH, &default_offices()).await,
    };
    info!(
        params = report.params,
        notice_types = report.notice_types,
        offices = report.offices,
        "Store defaults checked"
    );
    report
}

async fn seed_if_absent<T: Serialize>(
    store: &dyn SnapshotStore,
    path: &'static str,
    defaults: &T,
) -> bool {
    match try_seed(store, StorePath::from_static(path), defaults).await {
        Ok(seeded) => seeded,
        Err(e) => {
            warn!(path = path, error = %e, "Failed to seed defaults");
            false
        }
    }
}

async fn try_seed<T: Serialize>(
    store: &dyn SnapshotStore,
    path: StorePath,
    defaults: &T,
) -> Result<bool, StoreError> {
    if store.get(&path).await?.is_some() {
        return Ok(false);
    }
    store.set(&path, serde_json::to_value(defaults)?).await?;
    Ok(true)
}
