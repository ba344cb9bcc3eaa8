use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::warn;

use crate::crd::Cell;

pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_READY: &str = "Ready";
pub const REASON_CLEANUP: &str = "Cleanup";

/// Publishes a Normal event on `cell`. Failures are logged and dropped.
pub async fn emit_event(recorder: Option<&Recorder>, cell: &Cell, reason: &str, action: &str, note: Option<String>) {
    let Some(recorder) = recorder else {
        return;
    };
    let event = Event {
        type_: EventType::Normal,
        reason: reason.into(),
        note,
        action: action.into(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(&event, &cell.object_ref(&())).await {
        warn!(reason, error = %e, "failed to publish event");
    }
}
