//! 🎬 *[the queue fills up. nobody calls flush. the clock on the wall reads 2:47am.]*
//! *[somewhere, a worker wakes up on a timer and does what had to be done.]*
//!
//! 🚽 The FlushWorker flushes the write queue on a fixed interval, and right away when
//! someone pulls the [`FlushTrigger`]. When every trigger is dropped, it flushes one last
//! time and goes home.

use std::time::Duration;

use anyhow::Result;
use async_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::Worker;
use crate::backends::{Store, StoreBackend};
use crate::queue::{FlushReport, WriteQueue};

/// 🔔 Ask the worker for a flush now instead of at the next tick.
#[derive(Debug, Clone)]
pub struct FlushTrigger {
    tx: Sender<()>,
}

impl FlushTrigger {
    /// Returns `false` once the worker is gone. A full channel already means "flush soon".
    pub fn request_flush(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

#[derive(Debug)]
pub struct FlushWorker<S: Store = StoreBackend> {
    queue: WriteQueue<S>,
    rx: Receiver<()>,
    interval: Duration,
}

impl<S: Store + 'static> FlushWorker<S> {
    /// 🏗️ A worker plus the trigger that wakes it. `capacity` bounds queued wake-ups.
    pub fn new(queue: WriteQueue<S>, interval: Duration, capacity: usize) -> (Self, FlushTrigger) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        (Self { queue, rx, interval }, FlushTrigger { tx })
    }

    async fn flush_if_pending(&self, why: &str) -> Option<FlushReport> {
        if self.queue.is_empty() {
            return None;
        }
        let report = self.queue.flush_with_retries().await;
        debug!(
            "🚽 FlushWorker flushed ({}): {} succeeded, {} abandoned",
            why,
            report.succeeded,
            report.abandoned.len()
        );
        Some(report)
    }
}

impl<S: Store + 'static> Worker for FlushWorker<S> {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("⏰ FlushWorker started, flushing every {:?}", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // -- the first tick fires immediately, and there is nothing to flush yet
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.flush_if_pending("interval").await;
                    }
                    received = self.rx.recv() => match received {
                        Ok(()) => {
                            self.flush_if_pending("triggered").await;
                        }
                        Err(_) => {
                            self.flush_if_pending("shutdown").await;
                            info!("🏁 FlushWorker: every trigger is gone. Shutting down.");
                            return Ok(());
                        }
                    },
                }
            }
        })
    }
}
