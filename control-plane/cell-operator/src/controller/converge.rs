//! Create-or-overwrite for a single managed object.

use tracing::debug;

use super::ReconcileErr;
use super::pass::Pass;
use crate::store::{ClusterStore, Fetched, ManagedObject};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

impl Upserted {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upserted::Created => "created",
            Upserted::Updated => "updated",
        }
    }
}

/// Reads the object at `desired`'s identity. Absent: create it. Present:
/// overwrite its labels, name and payload with `desired` and update it at
/// the read `resourceVersion`. Always writes, even if nothing changed.
pub async fn upsert(
    store: &dyn ClusterStore,
    pass: &Pass,
    desired: &ManagedObject,
) -> Result<Upserted, ReconcileErr> {
    let key = desired.key();
    let outcome = match pass.run(store.fetch(&key)).await? {
        Fetched::NotFound => {
            pass.run(store.create(desired))
                .await?
                .map_err(|source| ReconcileErr::Create {
                    key: key.clone(),
                    source,
                })?;
            Upserted::Created
        }
        Fetched::Found(current) => {
            let merged = desired
                .converge_onto(current)
                .map_err(|source| ReconcileErr::Update {
                    key: key.clone(),
                    source,
                })?;
            pass.run(store.update(&merged))
                .await?
                .map_err(|source| ReconcileErr::Update {
                    key: key.clone(),
                    source,
                })?;
            Upserted::Updated
        }
        Fetched::Failed(source) => return Err(ReconcileErr::Fetch { key, source }),
    };
    debug!(
        kind = %key.kind,
        namespace = key.namespace.as_deref().unwrap_or(""),
        name = %key.name,
        outcome = outcome.as_str(),
        "upserted"
    );
    Ok(outcome)
}
