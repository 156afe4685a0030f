//! Favorite-set reconciliation.
//!
//! The backend owns the favorites list; the reconciler keeps a shadow copy of
//! the last list it processed and turns each new list into the minimal work:
//! removals are pruned locally, only additions are enriched over the network.
//!
//! Runs are serialized through a single slot. A reconcile request that arrives
//! while another run is in flight is parked (latest request wins) and executed
//! by the running task once it finishes, so the shadow copy and the displayed
//! collection never see overlapping writers.
//!
//! Clearing the reconciler bumps a session generation. A run that started
//! under an older generation drops its results instead of writing them, so a
//! logout in the middle of an enrichment stays a logout.

use market_core::{CatalogEntry, EnrichedStock, MarketBackend, SyncError, SyncResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

use crate::cache::{CacheManager, Clock, ResourceKind};
use crate::pipeline::FetchPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Idle,
    Diffing,
    Pruning,
    Enriching,
    Settled,
}

/// Symbols that entered and left the favorites set since the last run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteDelta {
    /// In the order of the current list
    pub added: Vec<String>,
    /// In the order of the previous list
    pub removed: Vec<String>,
}

impl FavoriteDelta {
    pub fn between(previous: &[String], current: &[String]) -> Self {
        let prev: HashSet<&str> = previous.iter().map(String::as_str).collect();
        let curr: HashSet<&str> = current.iter().map(String::as_str).collect();

        Self {
            added: current
                .iter()
                .filter(|s| !prev.contains(s.as_str()))
                .cloned()
                .collect(),
            removed: previous
                .iter()
                .filter(|s| !curr.contains(s.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Trim, uppercase and de-duplicate a favorites list, keeping first occurrences.
pub fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Same set as last time, nothing fetched
    Unchanged,
    /// Only removals, applied without a network call
    Pruned,
    /// Additions were enriched (some may have failed, see `failed`)
    Enriched,
    /// Every favorite was re-priced
    Refreshed,
    /// Favorites became empty; stocks and cache timestamps were dropped
    Cleared,
    /// Another run was in flight; this request runs right after it
    Coalesced,
    /// Nothing to do: cooldown window, fresh cache or a busy slot
    Skipped,
    /// The favorites list itself could not be fetched
    FavoritesUnavailable,
    /// The session was cleared mid-run; nothing was applied
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub enriched: Vec<String>,
    pub failed: Vec<String>,
    /// Favorites with no catalog row; never priced
    pub unknown: Vec<String>,
}

impl ReconcileReport {
    pub fn new(outcome: ReconcileOutcome) -> Self {
        Self {
            outcome,
            added: Vec::new(),
            removed: Vec::new(),
            enriched: Vec::new(),
            failed: Vec::new(),
            unknown: Vec::new(),
        }
    }
}

enum Job {
    Reconcile { favorites: Vec<String>, token: String },
    RefreshAll { token: String, skip: Vec<String> },
}

#[derive(Default)]
struct Slot {
    running: bool,
    pending: Option<Job>,
}

/// Releases the slot if the running future is dropped mid-run.
struct SlotClaim<'a> {
    slot: &'a Mutex<Slot>,
    armed: bool,
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = lock(self.slot);
            slot.running = false;
            slot.pending = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a run does to the stocks cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StocksEntry {
    Keep,
    MarkFresh,
    /// Some symbol failed; the next trigger must retry it
    Invalidate,
}

struct Commit<'a> {
    order: &'a [String],
    removed: &'a [String],
    fresh: Vec<EnrichedStock>,
    shadow: Option<Vec<String>>,
    stocks: StocksEntry,
}

struct Enrichment {
    stocks: Vec<EnrichedStock>,
    failed: Vec<String>,
    unknown: Vec<String>,
}

pub struct FavoriteReconciler {
    backend: Arc<dyn MarketBackend>,
    pipeline: FetchPipeline,
    cache: Arc<CacheManager>,
    clock: Arc<dyn Clock>,
    /// Last processed favorites list
    shadow: RwLock<Vec<String>>,
    /// Replaced whole, never patched in place
    displayed: RwLock<Arc<Vec<EnrichedStock>>>,
    phase: Mutex<ReconcilePhase>,
    slot: Mutex<Slot>,
    /// Bumped by [`FavoriteReconciler::clear`]
    generation: AtomicU64,
}

impl FavoriteReconciler {
    pub fn new(
        backend: Arc<dyn MarketBackend>,
        pipeline: FetchPipeline,
        cache: Arc<CacheManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            pipeline,
            cache,
            clock,
            shadow: RwLock::new(Vec::new()),
            displayed: RwLock::new(Arc::new(Vec::new())),
            phase: Mutex::new(ReconcilePhase::Idle),
            slot: Mutex::new(Slot::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> ReconcilePhase {
        *lock(&self.phase)
    }

    pub async fn displayed(&self) -> Arc<Vec<EnrichedStock>> {
        self.displayed.read().await.clone()
    }

    pub async fn shadow(&self) -> Vec<String> {
        self.shadow.read().await.clone()
    }

    /// Bring the displayed collection in line with `current`.
    pub async fn reconcile(&self, current: &[String], token: &str) -> SyncResult<ReconcileReport> {
        self.run_serialized(Job::Reconcile {
            favorites: current.to_vec(),
            token: token.to_string(),
        })
        .await
    }

    /// Re-price every favorite in the shadow copy except `skip`, which the
    /// caller has just priced. Skipped while a reconciliation holds the slot.
    pub async fn refresh_all(&self, token: &str, skip: &[String]) -> SyncResult<ReconcileReport> {
        self.run_serialized(Job::RefreshAll {
            token: token.to_string(),
            skip: skip.to_vec(),
        })
        .await
    }

    /// Drop the shadow copy, the displayed collection and any parked request.
    ///
    /// A run still in flight finishes its requests but applies nothing.
    pub async fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.slot).pending = None;

        let mut displayed = self.displayed.write().await;
        *displayed = Arc::new(Vec::new());
        self.shadow.write().await.clear();
        self.set_phase(ReconcilePhase::Idle);
    }

    async fn run_serialized(&self, job: Job) -> SyncResult<ReconcileReport> {
        {
            let mut slot = lock(&self.slot);
            if slot.running {
                if matches!(job, Job::RefreshAll { .. }) {
                    tracing::debug!("Price refresh skipped, reconciliation in flight");
                    return Ok(ReconcileReport::new(ReconcileOutcome::Skipped));
                }
                tracing::debug!("Reconciliation in flight, coalescing request");
                slot.pending = Some(job);
                return Ok(ReconcileReport::new(ReconcileOutcome::Coalesced));
            }
            slot.running = true;
        }

        let mut claim = SlotClaim {
            slot: &self.slot,
            armed: true,
        };
        let mut job = job;

        loop {
            let result = match &job {
                Job::Reconcile { favorites, token } => self.run_reconcile(favorites, token).await,
                Job::RefreshAll { token, skip } => self.run_refresh(token, skip).await,
            };
            if let Err(e) = &result {
                tracing::warn!("Reconciliation aborted: {}", e);
                self.set_phase(ReconcilePhase::Idle);
            }

            let next = {
                let mut slot = lock(&self.slot);
                let next = slot.pending.take();
                if next.is_none() {
                    slot.running = false;
                }
                next
            };

            match next {
                Some(pending) => job = pending,
                None => {
                    claim.armed = false;
                    return result;
                }
            }
        }
    }

    async fn run_reconcile(&self, favorites: &[String], token: &str) -> SyncResult<ReconcileReport> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.set_phase(ReconcilePhase::Diffing);

        let current = normalize_symbols(favorites);
        let previous = self.shadow().await;
        let delta = FavoriteDelta::between(&previous, &current);
        tracing::debug!(
            "Favorites diff: {} added, {} removed",
            delta.added.len(),
            delta.removed.len()
        );

        if delta.is_empty() {
            self.set_phase(ReconcilePhase::Settled);
            return Ok(ReconcileReport::new(ReconcileOutcome::Unchanged));
        }

        if current.is_empty() {
            *self.displayed.write().await = Arc::new(Vec::new());
            self.shadow.write().await.clear();
            self.cache.clear();
            self.set_phase(ReconcilePhase::Settled);

            tracing::info!("Favorites empty, cleared {} stocks", delta.removed.len());
            let mut report = ReconcileReport::new(ReconcileOutcome::Cleared);
            report.removed = delta.removed;
            return Ok(report);
        }

        let mut report = ReconcileReport::new(ReconcileOutcome::Pruned);
        let mut fresh = Vec::new();
        let mut stocks = StocksEntry::Keep;

        if delta.added.is_empty() {
            self.set_phase(ReconcilePhase::Pruning);
        } else {
            self.set_phase(ReconcilePhase::Enriching);
            let enrichment = self.enrich(&delta.added, token).await?;

            let covers_all = delta.added.len() == current.len();
            stocks = if !enrichment.failed.is_empty() {
                StocksEntry::Invalidate
            } else if covers_all && !enrichment.stocks.is_empty() {
                StocksEntry::MarkFresh
            } else {
                StocksEntry::Keep
            };

            report.outcome = ReconcileOutcome::Enriched;
            report.enriched = enrichment.stocks.iter().map(|s| s.symbol.clone()).collect();
            report.failed = enrichment.failed;
            report.unknown = enrichment.unknown;
            fresh = enrichment.stocks;
        }

        let applied = self
            .commit(
                generation,
                Commit {
                    order: &current,
                    removed: &delta.removed,
                    fresh,
                    shadow: Some(current.clone()),
                    stocks,
                },
            )
            .await;
        if !applied {
            tracing::info!("Session cleared mid-run, dropping favorites update");
            return Ok(ReconcileReport::new(ReconcileOutcome::Discarded));
        }
        self.set_phase(ReconcilePhase::Settled);

        report.added = delta.added;
        report.removed = delta.removed;
        tracing::info!(
            "Reconciled favorites: +{} -{} ({} enriched, {} failed)",
            report.added.len(),
            report.removed.len(),
            report.enriched.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn run_refresh(&self, token: &str, skip: &[String]) -> SyncResult<ReconcileReport> {
        let generation = self.generation.load(Ordering::SeqCst);
        let symbols = self.shadow().await;
        if symbols.is_empty() {
            return Ok(ReconcileReport::new(ReconcileOutcome::Unchanged));
        }

        let skip: HashSet<&str> = skip.iter().map(String::as_str).collect();
        let targets: Vec<String> = symbols
            .iter()
            .filter(|symbol| !skip.contains(symbol.as_str()))
            .cloned()
            .collect();

        if targets.is_empty() {
            // Everything was priced by the run that just finished
            let commit = Commit {
                order: &symbols,
                removed: &[],
                fresh: Vec::new(),
                shadow: None,
                stocks: StocksEntry::MarkFresh,
            };
            self.commit(generation, commit).await;
            return Ok(ReconcileReport::new(ReconcileOutcome::Unchanged));
        }

        self.set_phase(ReconcilePhase::Enriching);
        let enrichment = self.enrich(&targets, token).await?;

        let stocks = if !enrichment.failed.is_empty() {
            StocksEntry::Invalidate
        } else if enrichment.stocks.is_empty() {
            StocksEntry::Keep
        } else {
            StocksEntry::MarkFresh
        };
        if enrichment.stocks.is_empty() {
            tracing::warn!("Price refresh got no quotes, keeping previous records");
        }

        let mut report = ReconcileReport::new(ReconcileOutcome::Refreshed);
        report.enriched = enrichment.stocks.iter().map(|s| s.symbol.clone()).collect();
        report.failed = enrichment.failed;
        report.unknown = enrichment.unknown;

        let commit = Commit {
            order: &symbols,
            removed: &[],
            fresh: enrichment.stocks,
            shadow: None,
            stocks,
        };
        if !self.commit(generation, commit).await {
            tracing::info!("Session cleared mid-run, dropping price refresh");
            return Ok(ReconcileReport::new(ReconcileOutcome::Discarded));
        }
        self.set_phase(ReconcilePhase::Settled);
        Ok(report)
    }

    /// Catalog lookup plus rate-limited price fetches for `symbols`.
    ///
    /// Only a missing session is an error. A failed catalog fetch marks every
    /// symbol as failed so that pruning can still go ahead.
    async fn enrich(&self, symbols: &[String], token: &str) -> SyncResult<Enrichment> {
        let catalog = match self.backend.fetch_catalog(token).await {
            Ok(rows) => rows,
            Err(SyncError::Unauthenticated) => return Err(SyncError::Unauthenticated),
            Err(e) => {
                tracing::warn!("Catalog fetch failed, {} symbols left unpriced: {}", symbols.len(), e);
                return Ok(Enrichment {
                    stocks: Vec::new(),
                    failed: symbols.to_vec(),
                    unknown: Vec::new(),
                });
            }
        };

        let by_symbol: HashMap<String, CatalogEntry> = catalog
            .into_iter()
            .map(|entry| (entry.symbol.trim().to_uppercase(), entry))
            .collect();

        let (targets, unknown): (Vec<String>, Vec<String>) = symbols
            .iter()
            .cloned()
            .partition(|symbol| by_symbol.contains_key(symbol));
        if !unknown.is_empty() {
            tracing::warn!("No catalog entry for {:?}, skipping", unknown);
        }

        let backend = &self.backend;
        let catalog = &by_symbol;
        let batch = self
            .pipeline
            .enrich_sequential(&targets, move |symbol| async move {
                let quote = backend.fetch_price(&symbol).await?;
                if !quote.price.is_finite() || quote.price <= 0.0 {
                    return Err(SyncError::InvalidResponse(format!(
                        "{} quoted at {}",
                        symbol, quote.price
                    )));
                }
                let entry = catalog.get(&symbol).ok_or_else(|| {
                    SyncError::InvalidResponse(format!("no catalog entry for {}", symbol))
                })?;

                let mut stock = EnrichedStock::from_parts(entry, &quote);
                stock.symbol = symbol;
                Ok(stock)
            })
            .await;

        Ok(Enrichment {
            stocks: batch.succeeded,
            failed: batch.failed,
            unknown,
        })
    }

    /// Apply a run's results unless the session was cleared since `generation`.
    ///
    /// Drops `removed`, upserts `fresh` by symbol and orders the collection
    /// like `order`. The displayed lock is held throughout, so a concurrent
    /// [`FavoriteReconciler::clear`] lands either before (and the commit is
    /// refused) or after (and wipes it).
    async fn commit(&self, generation: u64, commit: Commit<'_>) -> bool {
        let mut displayed = self.displayed.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }

        let removed: HashSet<&str> = commit.removed.iter().map(String::as_str).collect();
        let mut by_symbol: HashMap<String, EnrichedStock> = displayed
            .iter()
            .filter(|stock| !removed.contains(stock.symbol.as_str()))
            .map(|stock| (stock.symbol.clone(), stock.clone()))
            .collect();
        for stock in commit.fresh {
            by_symbol.insert(stock.symbol.clone(), stock);
        }

        let merged: Vec<EnrichedStock> = commit
            .order
            .iter()
            .filter_map(|symbol| by_symbol.remove(symbol))
            .collect();
        *displayed = Arc::new(merged);

        if let Some(shadow) = commit.shadow {
            *self.shadow.write().await = shadow;
        }
        match commit.stocks {
            StocksEntry::Keep => {}
            StocksEntry::MarkFresh => self
                .cache
                .mark_refreshed(ResourceKind::Stocks, self.clock.now_millis()),
            StocksEntry::Invalidate => self.cache.invalidate(ResourceKind::Stocks),
        }
        true
    }

    fn set_phase(&self, phase: ReconcilePhase) {
        let mut current = lock(&self.phase);
        if *current != phase {
            tracing::debug!("Reconciler phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_delta_between_sets() {
        let delta = FavoriteDelta::between(&symbols(&["A", "B", "C"]), &symbols(&["B", "C", "D"]));
        assert_eq!(delta.added, symbols(&["D"]));
        assert_eq!(delta.removed, symbols(&["A"]));
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_delta_ignores_order() {
        let delta = FavoriteDelta::between(&symbols(&["A", "B"]), &symbols(&["B", "A"]));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_from_empty() {
        let delta = FavoriteDelta::between(&[], &symbols(&["GGAL", "YPFD"]));
        assert_eq!(delta.added, symbols(&["GGAL", "YPFD"]));
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_normalize_symbols() {
        let normalized = normalize_symbols(&symbols(&[" ypfd", "GGAL", "YPFD", "", "  "]));
        assert_eq!(normalized, symbols(&["YPFD", "GGAL"]));
    }
}
