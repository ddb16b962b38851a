// Currency rate cache shared by every page that shows a price.
// One context is built when the application starts and handed to consumers explicitly.

use crate::config::CurrencyConfig;
use crate::currency::{is_supported, CurrencyInfo, RateTable, BASE_CURRENCY};
use crate::rate_source::{ErApiRateSource, RateSource, RateSourceError, RemoteRates};
use crate::storage::{load_selected_code, save_selected_code, CacheRecord, RateStorage};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("Unsupported currency code: {0}")]
    Unsupported(String),
}

// What a call to `initialize` or `refresh` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    // Persisted rates were young enough, no request was made
    CacheFresh,
    Updated { rejected: usize },
    // Request failed; the previously active rates are still in use
    Failed,
    // Another refresh was already running
    InFlight,
    AlreadyInitialized,
}

#[derive(Debug, Default)]
pub(crate) struct CurrencyStats {
    pub refresh_attempts: AtomicUsize,
    pub refresh_succeeded: AtomicUsize,
    pub refresh_failed: AtomicUsize,
    pub refresh_skipped: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub rejected_rates: AtomicUsize,
    pub rejected_selections: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CurrencyStatsReport {
    pub refresh_attempts: usize,
    pub refresh_succeeded: usize,
    pub refresh_failed: usize,
    pub refresh_skipped: usize,
    pub cache_hits: usize,
    pub rejected_rates: usize,
    pub rejected_selections: usize,
}

struct ActiveState {
    code: String,
    rates: RateTable,
    last_updated: Option<DateTime<Utc>>,
}

// Holds the busy flag for the lifetime of one refresh, including when the
// refresh future is dropped part way through.
struct LoadingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// Claims the one-time startup. Dropping it before `finish` hands the claim
// back, so a startup cancelled mid-fetch can be run again.
struct InitGuard<'a> {
    flag: &'a AtomicBool,
    finished: bool,
}

impl<'a> InitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                flag,
                finished: false,
            })
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.flag.store(false, Ordering::SeqCst);
        }
    }
}

/// Process-wide view of the active display currency and the rate table.
///
/// Readers never wait on the network: until a refresh lands they see the
/// persisted rates, or the built-in defaults when nothing usable was stored.
/// Refresh failures are logged and counted but never surfaced to the caller
/// as an error.
pub struct CurrencyContext {
    config: CurrencyConfig,
    source: Arc<dyn RateSource>,
    storage: Arc<dyn RateStorage>,
    state: RwLock<ActiveState>,
    loading: AtomicBool,
    initialized: AtomicBool,
    stats: CurrencyStats,
}

impl CurrencyContext {
    pub fn new(
        config: CurrencyConfig,
        source: Arc<dyn RateSource>,
        storage: Arc<dyn RateStorage>,
    ) -> Self {
        let state = ActiveState {
            code: BASE_CURRENCY.to_string(),
            rates: RateTable::defaults(),
            last_updated: None,
        };

        Self {
            config,
            source,
            storage,
            state: RwLock::new(state),
            loading: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            stats: CurrencyStats::default(),
        }
    }

    // Context that fetches from the configured HTTP endpoint
    pub fn with_http_source(
        config: CurrencyConfig,
        storage: Arc<dyn RateStorage>,
    ) -> Result<Self, RateSourceError> {
        let source = Arc::new(ErApiRateSource::new(&config)?);
        Ok(Self::new(config, source, storage))
    }

    pub fn config(&self) -> &CurrencyConfig {
        &self.config
    }

    /// Restores the visitor's selection and the persisted rates, then refreshes
    /// from the rate source only if the persisted rates are missing or stale.
    ///
    /// Runs once per context; later calls return
    /// [`RefreshOutcome::AlreadyInitialized`] without touching anything. A call
    /// that is dropped before it completes does not count.
    pub async fn initialize(&self) -> RefreshOutcome {
        let Some(guard) = InitGuard::acquire(&self.initialized) else {
            return RefreshOutcome::AlreadyInitialized;
        };

        let outcome = self.startup().await;
        guard.finish();
        outcome
    }

    async fn startup(&self) -> RefreshOutcome {
        if let Some(code) = load_selected_code(self.storage.as_ref(), &self.config) {
            if is_supported(&code) {
                self.state.write().code = code;
            } else {
                debug!(code = %code, "Ignoring unsupported saved currency");
            }
        }

        let Some(record) = CacheRecord::load(self.storage.as_ref(), &self.config) else {
            debug!("No cached currency rates");
            return self.refresh().await;
        };

        let age = record.age(Utc::now());
        {
            let mut state = self.state.write();
            state.rates = record.rates;
            state.last_updated = Some(record.fetched_at);
        }

        // A timestamp from the future means the clock moved; don't trust it
        let fresh = chrono::Duration::from_std(self.config.freshness_threshold)
            .map(|threshold| age >= chrono::Duration::zero() && age < threshold)
            .unwrap_or(false);

        if fresh {
            self.stats.cache_hits.fetch_add(1, Ordering::SeqCst);
            debug!(age_secs = age.num_seconds(), "Using cached currency rates");
            return RefreshOutcome::CacheFresh;
        }

        debug!(age_secs = age.num_seconds(), "Cached currency rates are stale");
        self.refresh().await
    }

    /// Fetches the latest rates and, on success, makes them active and persists
    /// them. At most one refresh runs at a time; a call made while another is in
    /// flight returns [`RefreshOutcome::InFlight`] straight away.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = LoadingGuard::acquire(&self.loading) else {
            self.stats.refresh_skipped.fetch_add(1, Ordering::SeqCst);
            debug!("Currency refresh already in flight");
            return RefreshOutcome::InFlight;
        };
        self.stats.refresh_attempts.fetch_add(1, Ordering::SeqCst);

        let base = BASE_CURRENCY;
        debug!(base, "Refreshing currency rates");

        let fetched = match tokio::time::timeout(
            self.config.request_timeout,
            self.source.fetch_rates(base),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RateSourceError::Timeout(
                self.config.request_timeout.as_millis() as u64,
            )),
        };

        let remote = match fetched.and_then(RemoteRates::into_rates) {
            Ok(remote) => remote,
            Err(err) => {
                self.stats.refresh_failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    base,
                    error = %err,
                    "Currency rate refresh failed, keeping current rates"
                );
                return RefreshOutcome::Failed;
            }
        };

        let (table, rejected) = RateTable::with_remote_rates(&remote);
        if rejected > 0 {
            self.stats
                .rejected_rates
                .fetch_add(rejected, Ordering::SeqCst);
            warn!(rejected, "Ignored unusable rates from rate source");
        }

        let fetched_at = Utc::now();
        {
            let mut state = self.state.write();
            state.rates = table.clone();
            state.last_updated = Some(fetched_at);
        }

        let record = CacheRecord::new(table, fetched_at);
        if let Err(err) = record.save(self.storage.as_ref(), &self.config) {
            warn!(error = %err, "Failed to persist currency rates");
        }

        self.stats.refresh_succeeded.fetch_add(1, Ordering::SeqCst);
        info!(rejected, "Currency rates refreshed");
        RefreshOutcome::Updated { rejected }
    }

    /// Switches the display currency and remembers it for future sessions.
    ///
    /// Codes outside the supported set are rejected and leave the current
    /// selection in place.
    pub fn set_currency_code(&self, code: &str) -> Result<(), SelectionError> {
        if !is_supported(code) {
            self.stats
                .rejected_selections
                .fetch_add(1, Ordering::SeqCst);
            warn!(code, "Rejected unsupported currency selection");
            return Err(SelectionError::Unsupported(code.to_string()));
        }

        self.state.write().code = code.to_string();

        if let Err(err) = save_selected_code(self.storage.as_ref(), &self.config, code) {
            warn!(code, error = %err, "Failed to persist currency selection");
        }
        Ok(())
    }

    pub fn currency(&self) -> CurrencyInfo {
        let state = self.state.read();
        state
            .rates
            .get(&state.code)
            .unwrap_or_else(|| state.rates.base())
            .clone()
    }

    pub fn currency_code(&self) -> String {
        self.state.read().code.clone()
    }

    pub fn rates(&self) -> RateTable {
        self.state.read().rates.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_updated
    }

    pub fn convert(&self, amount: f64) -> f64 {
        self.currency().convert(amount)
    }

    pub fn display_amount(&self, amount: f64) -> i64 {
        self.currency().display_amount(amount)
    }

    pub fn format_price(&self, amount: f64) -> String {
        self.currency().format_price(amount)
    }

    pub fn stats(&self) -> CurrencyStatsReport {
        CurrencyStatsReport {
            refresh_attempts: self.stats.refresh_attempts.load(Ordering::SeqCst),
            refresh_succeeded: self.stats.refresh_succeeded.load(Ordering::SeqCst),
            refresh_failed: self.stats.refresh_failed.load(Ordering::SeqCst),
            refresh_skipped: self.stats.refresh_skipped.load(Ordering::SeqCst),
            cache_hits: self.stats.cache_hits.load(Ordering::SeqCst),
            rejected_rates: self.stats.rejected_rates.load(Ordering::SeqCst),
            rejected_selections: self.stats.rejected_selections.load(Ordering::SeqCst),
        }
    }
}
