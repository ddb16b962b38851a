// Supported display currencies and their conversion rates relative to the Thai Baht.
// All resort prices are authored in the base currency and converted only for display.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Currency in which every static price is authored
pub const BASE_CURRENCY: &str = "THB";

// Built-in rates used until (and whenever) a remote refresh is unavailable.
// The order here is the order offered to visitors in a currency selector.
const DEFAULT_CURRENCIES: [(&str, &str, f64); 9] = [
    ("THB", "฿", 1.0),
    ("USD", "$", 0.027),
    ("EUR", "€", 0.025),
    ("GBP", "£", 0.021),
    ("JPY", "¥", 4.3),
    ("AUD", "A$", 0.041),
    ("CAD", "C$", 0.037),
    ("CNY", "¥", 0.19),
    ("INR", "₹", 2.2),
];

// One supported currency. `rate` multiplies a base-currency amount into this currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub symbol: String,
    pub rate: f64,
}

impl CurrencyInfo {
    pub fn new(code: &str, symbol: &str, rate: f64) -> Self {
        Self {
            code: code.to_string(),
            symbol: symbol.to_string(),
            rate,
        }
    }

    pub fn convert(&self, amount: f64) -> f64 {
        amount * self.rate
    }

    // Converted amount rounded to whole units, half away from zero.
    // The cast saturates at the i64 bounds and maps NaN to 0.
    pub fn display_amount(&self, amount: f64) -> i64 {
        self.convert(amount).round() as i64
    }

    // e.g. "฿2,800" or "$76"
    pub fn format_price(&self, amount: f64) -> String {
        format!(
            "{}{}",
            self.symbol,
            group_thousands(self.display_amount(amount))
        )
    }
}

pub fn is_supported(code: &str) -> bool {
    DEFAULT_CURRENCIES.iter().any(|(supported, _, _)| *supported == code)
}

// Returns true for rates that may be used for conversion
pub fn is_usable_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Mapping from currency code to [`CurrencyInfo`], always covering exactly the
/// supported set of codes.
///
/// Serializes as a plain JSON object keyed by code, which is the shape kept in
/// durable storage. Deserializing goes through [`RateTable::from`], so a table
/// read back from storage satisfies the same invariants as the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, CurrencyInfo>")]
pub struct RateTable(HashMap<String, CurrencyInfo>);

impl Default for RateTable {
    fn default() -> Self {
        Self::defaults()
    }
}

impl RateTable {
    pub fn defaults() -> Self {
        let currencies = DEFAULT_CURRENCIES
            .iter()
            .map(|(code, symbol, rate)| {
                (code.to_string(), CurrencyInfo::new(code, symbol, *rate))
            })
            .collect();
        Self(currencies)
    }

    pub fn get(&self, code: &str) -> Option<&CurrencyInfo> {
        self.0.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Supported codes in selector order
    pub fn codes() -> impl Iterator<Item = &'static str> {
        DEFAULT_CURRENCIES.iter().map(|(code, _, _)| *code)
    }

    // Entries in selector order
    pub fn iter(&self) -> impl Iterator<Item = &CurrencyInfo> + '_ {
        Self::codes().filter_map(move |code| self.0.get(code))
    }

    // The base currency's entry. Present by construction.
    pub fn base(&self) -> &CurrencyInfo {
        &self.0[BASE_CURRENCY]
    }

    /// Builds a fresh table from the built-in defaults, overwriting the rate of
    /// every supported code present in `remote`.
    ///
    /// Codes missing from `remote` keep their default rate. Rates that are zero,
    /// negative or not finite are rejected and counted in the returned total.
    /// The base currency stays at exactly 1 regardless of what `remote` says.
    pub fn with_remote_rates(remote: &HashMap<String, f64>) -> (Self, usize) {
        let mut table = Self::defaults();
        let mut rejected = 0;

        for (code, info) in table.0.iter_mut() {
            if code == BASE_CURRENCY {
                continue;
            }
            if let Some(&rate) = remote.get(code) {
                if is_usable_rate(rate) {
                    info.rate = rate;
                } else {
                    rejected += 1;
                }
            }
        }

        (table, rejected)
    }
}

// Restores the table invariants on a snapshot read back from storage: unknown
// codes are dropped, missing or unusable entries fall back to the defaults and
// symbols always come from the built-in table.
impl From<HashMap<String, CurrencyInfo>> for RateTable {
    fn from(stored: HashMap<String, CurrencyInfo>) -> Self {
        let mut table = Self::defaults();
        for (code, info) in table.0.iter_mut() {
            if code == BASE_CURRENCY {
                continue;
            }
            if let Some(entry) = stored.get(code) {
                if is_usable_rate(entry.rate) {
                    info.rate = entry.rate;
                }
            }
        }
        table
    }
}
