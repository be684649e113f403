use tokio::sync::mpsc;
use tracing::warn;

use crate::types::LockedJob;

/// The return leg of the pipeline: an unbounded multi-producer FIFO of
/// finished jobs waiting for the locker to release their advisory locks.
/// Unbounded is fine here, the buffer already applies backpressure upstream.
pub fn result_queue() -> (ResultSender, ResultReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResultSender(tx), ResultReceiver(rx))
}

#[derive(Clone)]
pub struct ResultSender(mpsc::UnboundedSender<LockedJob>);

impl ResultSender {
    /// Hand a finished job back to the locker. Only fails if the locker is
    /// gone, at which point its session (and the lock) die with it anyway.
    pub fn push(&self, job: LockedJob) {
        if let Err(error) = self.0.send(job) {
            warn!(job_id = error.0.key.job_id, "result queue receiver dropped");
        }
    }
}

pub struct ResultReceiver(mpsc::UnboundedReceiver<LockedJob>);

impl ResultReceiver {
    /// Pop the next finished job without waiting. The locker calls this in a
    /// loop until the queue is momentarily empty.
    pub fn try_pop(&mut self) -> Option<LockedJob> {
        self.0.try_recv().ok()
    }
}
