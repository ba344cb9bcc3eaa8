use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ReconcileErr;

/// Bounds for one reconciliation pass. Every store and probe call in the
/// pass is raced against cancellation and the deadline.
#[derive(Clone, Debug)]
pub struct Pass {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Pass {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| (Instant::now() + t, t)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn check(&self) -> Result<(), ReconcileErr> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileErr::Cancelled);
        }
        match self.deadline {
            Some((at, limit)) if Instant::now() >= at => Err(ReconcileErr::DeadlineExceeded(limit)),
            _ => Ok(()),
        }
    }

    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ReconcileErr> {
        self.check()?;
        let expired = async {
            match self.deadline {
                Some((at, limit)) => {
                    tokio::time::sleep_until(at).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReconcileErr::Cancelled),
            limit = expired => Err(ReconcileErr::DeadlineExceeded(limit)),
            out = fut => Ok(out),
        }
    }
}
