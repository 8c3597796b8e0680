//! 📬 The Write Queue: pending index/delete operations, deduplicated per entity,
//! flushed as one batch, retried without duplication or loss.
//!
//! 🎬 *[a record changes three times in a second. the store hears about it once.]*
//! *[a record is deleted while its index request is still in flight. the delete wins.]*
//! *[a batch half-fails. only the failed half comes back for another round.]*
//!
//! 🧠 Knowledge graph:
//! - One `std::sync::Mutex` guards the pending index map, the pending delete set and the
//!   per-key attempt counts. It is held for map surgery only, never across an `.await`.
//! - `flush()` swaps the pending sets out, lets deletes win, submits outside the lock,
//!   then reconciles: successes are dropped, failures go back in unless a newer write for
//!   the same key arrived meanwhile.
//! - `flush_with_retries()` repeats `flush()` with backoff until nothing needs retrying.
//! - `spawn_flush()` does the same on a tokio task and walks away.
//! - Retry bookkeeping lives in [`retry`], result matching in [`reconcile`].
//!
//! Invariants: a key pending deletion never gets indexed in the same batch; after
//! reconciliation no key is both succeeded and pending retry.

mod reconcile;
pub mod retry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::backends::{Store, StoreBackend};
use crate::common::{BulkOperation, Document, EntityKey, PendingWrite};
use crate::marshall::Searchable;
use crate::schema::{MappingSchema, TypeMapping, identity_string};

pub use retry::RetryPolicy;

/// 📊 What one flush (or one retry loop) did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Flush rounds that actually submitted something.
    pub rounds: usize,
    /// Operations sent to the store.
    pub submitted: usize,
    pub succeeded: usize,
    /// Failed or unacknowledged operations that went back into the queue.
    pub requeued: usize,
    /// Index requests dropped because the same key was pending deletion.
    pub superseded: usize,
    /// Keys that ran out of attempts and were dropped, for good.
    pub abandoned: Vec<EntityKey>,
    /// Rounds in which the whole batch failed in transport.
    pub transport_failures: usize,
}

impl FlushReport {
    /// Did this round leave failed work behind that a later round should pick up?
    pub fn needs_retry(&self) -> bool {
        self.requeued > 0
    }

    fn absorb(&mut self, other: FlushReport) {
        self.rounds += other.rounds;
        self.submitted += other.submitted;
        self.succeeded += other.succeeded;
        self.requeued = other.requeued;
        self.superseded += other.superseded;
        self.abandoned.extend(other.abandoned);
        self.transport_failures += other.transport_failures;
    }
}

#[derive(Debug, Default)]
struct QueueState {
    to_index: IndexMap<EntityKey, Document>,
    to_delete: IndexSet<EntityKey>,
    attempts: HashMap<EntityKey, u32>,
}

#[derive(Debug)]
struct QueueInner<S> {
    schema: Arc<MappingSchema>,
    store: Arc<S>,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
}

/// 📬 Cheap to clone; every clone is the same queue.
#[derive(Debug)]
pub struct WriteQueue<S: Store = StoreBackend> {
    inner: Arc<QueueInner<S>>,
}

impl<S: Store> Clone for WriteQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store + 'static> WriteQueue<S> {
    /// 🏗️ An empty queue in front of `store`.
    ///
    /// It knows the schema so it can turn `Book` into `library/book`, and it knows the
    /// retry policy so it knows when to stop caring. It does not flush by itself; hand
    /// a clone to a [`FlushWorker`](crate::workers::FlushWorker) for that.
    pub fn new(schema: Arc<MappingSchema>, store: Arc<S>, policy: RetryPolicy) -> Self {
        // 📬 three empty piles and a lock. the post office of this crate.
        Self {
            inner: Arc::new(QueueInner {
                schema,
                store,
                policy,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // -- a panic elsewhere must not take the queue down with it
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn indexable_type(&self, type_name: &str) -> Result<&TypeMapping> {
        let type_mapping = self
            .inner
            .schema
            .type_mapping(type_name)
            .with_context(|| format!("💀 '{type_name}' is not a mapped type, it cannot be queued"))?;
        if !type_mapping.root {
            bail!("💀 '{type_name}' is not a root type, it only lives inside other documents");
        }
        Ok(type_mapping)
    }

    fn key_for(&self, entity: &impl Searchable) -> Result<EntityKey> {
        let type_mapping = self.indexable_type(entity.type_name())?;
        let identity = entity
            .identity()
            .with_context(|| format!("💀 a '{}' without an identity cannot be queued", type_mapping.name))?;
        normalised_key(type_mapping, identity)
    }

    /// ✍️ Queue an entity for indexing. Serialized now, once. The last writer per key wins.
    pub fn enqueue_index(&self, entity: &impl Searchable) -> Result<EntityKey> {
        let key = self.key_for(entity)?;
        let document = entity
            .to_document(&self.inner.schema)
            .with_context(|| format!("💀 could not turn {key} into a document"))?;
        let mut state = self.state();
        state.attempts.remove(&key);
        state.to_index.insert(key.clone(), document);
        trace!("✍️ queued {} for indexing", key);
        Ok(key)
    }

    /// 🗑️ Queue an entity for deletion.
    pub fn enqueue_delete(&self, entity: &impl Searchable) -> Result<EntityKey> {
        let key = self.key_for(entity)?;
        self.enqueue_delete_key(key)
    }

    /// 🗑️ Queue a deletion when all you have is the key.
    ///
    /// The id goes through the type's identity conversion first, so `"07"` and `"7"`
    /// name the same `integer` record here just like they do on the index side.
    /// Returns the key as it was queued.
    pub fn enqueue_delete_key(&self, key: EntityKey) -> Result<EntityKey> {
        let type_mapping = self.indexable_type(&key.type_name)?;
        let key = normalised_key(type_mapping, &Value::String(key.id))?;
        let mut state = self.state();
        state.attempts.remove(&key);
        trace!("🗑️ queued {} for deletion", key);
        state.to_delete.insert(key.clone());
        Ok(key)
    }

    /// (pending index requests, pending delete requests)
    pub fn pending(&self) -> (usize, usize) {
        let state = self.state();
        (state.to_index.len(), state.to_delete.len())
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state();
        state.to_index.is_empty() && state.to_delete.is_empty()
    }

    /// 🚽 One flush round: swap, dedupe, submit, reconcile.
    ///
    /// Never fails. A transport failure puts the whole batch back; a failed item puts
    /// that item back. Either way the queue keeps running.
    pub async fn flush(&self) -> FlushReport {
        // 🔄 swap the piles out. the lock is ours for two `mem::take`s and not a nanosecond more.
        // anyone enqueueing from here on lands in fresh piles for the next flush.
        let (to_index, to_delete) = {
            let mut state = self.state();
            (std::mem::take(&mut state.to_index), std::mem::take(&mut state.to_delete))
        };
        let mut report = FlushReport::default();
        if to_index.is_empty() && to_delete.is_empty() {
            return report;
        }

        // 🗑️ delete wins. a key on both piles only gets its delete sent,
        // and the index request quietly leaves through the back door.
        let mut writes = Vec::with_capacity(to_index.len() + to_delete.len());
        for (key, document) in to_index {
            if to_delete.contains(&key) {
                debug!("🗑️ {} is pending deletion, dropping its index request", key);
                report.superseded += 1;
                continue;
            }
            writes.push(PendingWrite::Index { key, document });
        }
        writes.extend(to_delete.into_iter().map(|key| PendingWrite::Delete { key }));

        let mut operations = Vec::with_capacity(writes.len());
        let mut submitted = Vec::with_capacity(writes.len());
        let mut in_flight = Vec::with_capacity(writes.len());
        for write in writes {
            match self.operation_for(&write) {
                Ok(operation) => {
                    operations.push(operation);
                    submitted.push(write.key().clone());
                    in_flight.push(write);
                }
                Err(err) => {
                    error!("💀 {:#}, dropping it", err);
                    report.abandoned.push(write.key().clone());
                }
            }
        }
        if operations.is_empty() {
            return report;
        }
        report.rounds = 1;
        report.submitted = operations.len();

        // 📡 the only `.await` in here that talks to the outside world. no lock held.
        let failed = match self.inner.store.submit_batch(&operations).await {
            Ok(results) => {
                let reconciliation = reconcile::reconcile(&self.inner.schema, &submitted, &results);
                report.succeeded = reconciliation.succeeded.len();
                for (key, reason) in &reconciliation.failed {
                    warn!("⚠️ {} failed: {}", key, reason);
                }
                let failed_keys: IndexSet<EntityKey> = reconciliation.failed.into_iter().map(|(key, _)| key).collect();
                let mut state = self.state();
                for key in &reconciliation.succeeded {
                    state.attempts.remove(key);
                }
                drop(state);
                in_flight
                    .into_iter()
                    .filter(|write| failed_keys.contains(write.key()))
                    .collect::<Vec<_>>()
            }
            Err(err) => {
                error!("💀 Batch of {} operations failed in transport, requeueing all of it: {:#}", operations.len(), err);
                report.transport_failures = 1;
                in_flight
            }
        };

        self.requeue(failed, &mut report);
        debug!(
            "📊 flush: {} submitted, {} succeeded, {} requeued, {} abandoned",
            report.submitted,
            report.succeeded,
            report.requeued,
            report.abandoned.len()
        );
        report
    }

    /// 📦 One pending write, dressed for the `_bulk` endpoint.
    ///
    /// The key speaks in mapped type names (`Book`); the store speaks in index and
    /// store type names (`library`, `book`). This is where one becomes the other.
    /// The schema is immutable, so "no mapping any more" only happens to keys queued
    /// by hand for a type that was never mapped, and those are dropped by the caller.
    fn operation_for(&self, write: &PendingWrite) -> Result<BulkOperation> {
        let key = write.key();
        let type_mapping = self
            .inner
            .schema
            .type_mapping(&key.type_name)
            .with_context(|| format!("{key} has no mapping any more"))?;
        let index = type_mapping.index_name.clone();
        let type_name = type_mapping.store_type_name.clone();
        Ok(match write {
            PendingWrite::Index { document, .. } => BulkOperation::index(index, type_name, key.id.clone(), document.clone()),
            PendingWrite::Delete { .. } => BulkOperation::delete(index, type_name, key.id.clone()),
        })
    }

    /// 🔁 Put failed writes back, unless a newer write for the key is already waiting.
    ///
    /// 🧠 While the batch was out the queue stayed open. Whatever arrived for the same
    /// key in the meantime was asked for *after* the failed write, so it outranks it:
    /// - a failed index with a newer index pending: the newer content goes out instead
    /// - a failed index with a delete pending: the delete wins at the next flush anyway
    /// - a failed delete with an index pending: the index is the latest word, keep it
    ///
    /// In all of those the retry is dropped and its attempt count starts over. Only a
    /// write nobody has overtaken burns an attempt, and it is abandoned once the
    /// [`RetryPolicy`] says so.
    fn requeue(&self, failed: Vec<PendingWrite>, report: &mut FlushReport) {
        let mut state = self.state();
        for write in failed {
            let key = write.key().clone();
            if state.to_index.contains_key(&key) || state.to_delete.contains(&key) {
                trace!("🆕 {} got a newer write while in flight, dropping the retry", key);
                state.attempts.remove(&key);
                continue;
            }
            let attempts = {
                let count = state.attempts.entry(key.clone()).or_insert(0);
                *count += 1;
                *count
            };
            if self.inner.policy.is_exhausted(attempts) {
                error!("🪦 {} failed {} times, giving up on it", key, attempts);
                state.attempts.remove(&key);
                report.abandoned.push(key);
                continue;
            }
            match write {
                PendingWrite::Index { key, document } => {
                    state.to_index.insert(key, document);
                }
                PendingWrite::Delete { key } => {
                    state.to_delete.insert(key);
                }
            }
            report.requeued += 1;
        }
    }

    /// 🔁 Flush, wait, flush again, until no failure is left to retry.
    ///
    /// With an unbounded policy a permanently failing item keeps this looping.
    pub async fn flush_with_retries(&self) -> FlushReport {
        let mut total = FlushReport::default();
        let mut round = 0;
        loop {
            let report = self.flush().await;
            let again = report.needs_retry();
            total.absorb(report);
            if !again {
                return total;
            }
            let delay = self.inner.policy.backoff(round);
            debug!("⏳ {} write(s) to retry, next flush in {:?}", total.requeued, delay);
            tokio::time::sleep(delay).await;
            round = round.saturating_add(1);
        }
    }

    /// 🚀 Fire and forget: flush with retries on a background task.
    pub fn spawn_flush(&self) -> JoinHandle<FlushReport> {
        let queue = self.clone();
        tokio::spawn(async move { queue.flush_with_retries().await })
    }
}

/// 🔑 The queue's key for one identity: converted to the type's identity type, then
/// stringified the way the store addresses it.
fn normalised_key(type_mapping: &TypeMapping, identity: &Value) -> Result<EntityKey> {
    let identity = type_mapping
        .identity_type
        .convert(identity)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("💀 '{}' has an identity the store cannot address", type_mapping.name))?;
    Ok(EntityKey::new(type_mapping.name.clone(), identity_string(&identity)))
}
