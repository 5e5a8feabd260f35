//! Keyword policy mapping parameter names to categories.

use super::{InferredType, ParameterCategory};

/// Infrastructure tokens. Checked before trading tokens.
pub const CONFIGURATION_TOKENS: &[&str] = &[
    "api", "key", "token", "secret", "url", "uri", "endpoint", "host", "port", "timeout",
    "retry", "retries", "date", "start", "end", "path", "dir", "file", "workers", "concurrency",
    "batch", "page", "delay", "sleep", "seed", "verbose", "debug", "cache", "limit", "interval",
];

/// Domain tokens of market filters.
pub const TRADING_TOKENS: &[&str] = &[
    "volatility", "vol", "volume", "atr", "gap", "pct", "percent", "change", "threshold", "min",
    "max", "ratio", "rsi", "macd", "sma", "ema", "ma", "price", "close", "open", "high", "low",
    "range", "window", "period", "lookback", "length", "multiplier", "mult", "std", "sigma",
    "zscore", "score", "momentum", "breakout", "float", "cap", "adv", "dollar", "spread",
    "return", "returns", "drop", "rise", "surge", "level", "strength", "filter",
];

/// Keyword arguments that are plumbing, never tunables.
pub const IGNORED_KEYWORDS: &[&str] = &[
    "axis", "inplace", "ignore_index", "decimals", "ndigits", "indent", "n", "errors", "copy",
    "ddof", "verbose", "maxsplit", "base", "sep", "index", "header",
];

/// Maps parameter names to categories by token.
#[derive(Debug, Clone)]
pub struct ParameterPolicy {
    configuration: Vec<String>,
    trading: Vec<String>,
}

impl Default for ParameterPolicy {
    fn default() -> Self {
        Self {
            configuration: CONFIGURATION_TOKENS.iter().map(|t| (*t).to_string()).collect(),
            trading: TRADING_TOKENS.iter().map(|t| (*t).to_string()).collect(),
        }
    }
}

impl ParameterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token mapped to `Configuration`.
    pub fn with_configuration_token(mut self, token: impl Into<String>) -> Self {
        self.configuration.push(token.into().to_ascii_lowercase());
        self
    }

    /// Add a token mapped to `TradingFilter`.
    pub fn with_trading_token(mut self, token: impl Into<String>) -> Self {
        self.trading.push(token.into().to_ascii_lowercase());
        self
    }

    /// Categorize a parameter by name and literal type.
    ///
    /// Unmatched numerics are trading filters; unmatched strings and
    /// booleans are `Unknown`.
    pub fn categorize(&self, name: &str, inferred: InferredType) -> ParameterCategory {
        let tokens = tokenize(name);
        let has = |set: &[String]| tokens.iter().any(|t| set.iter().any(|s| s == t));

        if has(&self.configuration) {
            ParameterCategory::Configuration
        } else if has(&self.trading) || inferred.is_numeric() {
            ParameterCategory::TradingFilter
        } else {
            ParameterCategory::Unknown
        }
    }

    pub fn is_ignored_keyword(&self, keyword: &str) -> bool {
        IGNORED_KEYWORDS.contains(&keyword)
    }
}

/// Split `MIN_GAP_PCT`, `minGapPct` or `scan.gap_min` into lowercase tokens.
pub fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
