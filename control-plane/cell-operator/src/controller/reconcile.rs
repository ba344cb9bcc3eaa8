use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{info, instrument, warn};

use super::events::{REASON_CLEANUP, REASON_READY, REASON_RECONCILED, emit_event};
use super::engine::PassOutcome;
use super::{ControllerContext, ReconcileErr, status};
use crate::config::CellOperatorConfig;
use crate::crd::Cell;

pub const FINALIZER: &str = "monitoring.gitpod.io/cell-cleanup";

fn cell_key(cell: &Cell) -> String {
    format!("{}/{}", cell.namespace().unwrap_or_default(), cell.name_any())
}

fn has_finalizer(cell: &Cell) -> bool {
    cell.finalizers().iter().any(|f| f == FINALIZER)
}

/// Events a finished pass publishes: `Reconciled` when it created
/// objects, `Ready` on the transition into readiness.
pub fn pass_events(outcome: &PassOutcome, was_ready: bool) -> Vec<(&'static str, Option<String>)> {
    let mut events = Vec::new();
    if outcome.created > 0 {
        events.push((REASON_RECONCILED, Some(format!("Created {} objects", outcome.created))));
    }
    if outcome.ready && !was_ready {
        events.push((REASON_READY, None));
    }
    events
}

/// Ready cells wait for the next change; anything else is re-checked soon.
pub fn next_action(ready: bool, cfg: &CellOperatorConfig) -> Action {
    if ready {
        Action::await_change()
    } else {
        Action::requeue(cfg.requeue())
    }
}

#[instrument(skip_all, fields(ns = %cell.namespace().unwrap_or_default(), name = %cell.name_any()))]
pub async fn reconcile(cell: Arc<Cell>, ctx: Arc<ControllerContext>) -> Result<Action, ReconcileErr> {
    let key = cell_key(&cell);
    let pass = ctx.new_pass();
    let store = ctx.engine.store();

    if cell.meta().deletion_timestamp.is_some() {
        if has_finalizer(&cell) {
            info!("deletion requested; cleaning up");
            let deleted = ctx.engine.cleanup(&cell, &pass).await?;
            emit_event(
                ctx.recorder.as_ref(),
                &cell,
                REASON_CLEANUP,
                "Delete",
                Some(format!("Deleted {deleted} cluster-scoped or cross-namespace objects")),
            )
            .await;
            let finals = cell
                .finalizers()
                .iter()
                .filter(|f| *f != FINALIZER)
                .cloned()
                .collect::<Vec<_>>();
            pass.run(store.set_cell_finalizers(&cell, finals))
                .await?
                .map_err(ReconcileErr::Finalizer)?;
        }
        ctx.failures.reset(&key);
        return Ok(Action::await_change());
    }

    let cell = if has_finalizer(&cell) {
        cell
    } else {
        let mut finals = cell.finalizers().to_vec();
        finals.push(FINALIZER.to_string());
        let updated = pass
            .run(store.set_cell_finalizers(&cell, finals))
            .await?
            .map_err(ReconcileErr::Finalizer)?;
        Arc::new(updated)
    };

    let was_ready = cell.status.as_ref().is_some_and(status::is_cell_ready);
    let outcome = ctx.engine.run_pass(&cell, &pass).await?;
    ctx.failures.reset(&key);
    info!(
        created = outcome.created,
        updated = outcome.updated,
        ready = outcome.ready,
        "pass finished"
    );

    for (reason, note) in pass_events(&outcome, was_ready) {
        emit_event(ctx.recorder.as_ref(), &cell, reason, "Converge", note).await;
    }
    Ok(next_action(outcome.ready, &ctx.cfg))
}

pub fn error_policy(cell: Arc<Cell>, err: &ReconcileErr, ctx: Arc<ControllerContext>) -> Action {
    let key = cell_key(&cell);
    if !err.is_retryable() {
        warn!(cell = %key, error = %err, "reconcile failed; waiting for a change");
        return Action::await_change();
    }
    let failures = ctx.failures.record_failure(&key);
    let delay = ctx.cfg.error_backoff(failures);
    warn!(cell = %key, error = %err, failures, ?delay, "reconcile failed; retrying");
    Action::requeue(delay)
}
