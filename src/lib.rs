// Currency handling for the Treescape and Mountainview resort sites

// Modules, from the pure rate table up to the shared context
pub mod availability;
pub mod config;
pub mod context;
pub mod currency;
pub mod rate_source;
pub mod storage;

// Re-export key types for convenience
pub use availability::{AvailabilityProvider, ChecksumAvailability, DayAvailability};
pub use config::{ConfigError, CurrencyConfig};
pub use context::{CurrencyContext, CurrencyStatsReport, RefreshOutcome, SelectionError};
pub use currency::{CurrencyInfo, RateTable, BASE_CURRENCY};
pub use rate_source::{ErApiRateSource, RateSource, RateSourceError, RemoteRates};
pub use storage::{CacheRecord, FileStorage, MemoryStorage, RateStorage, StorageError};
