//! Symbol universe for Enhanced mode.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::rate_limiter::SharedRateLimiter;

/// Supplies the symbol list substituted into Enhanced-mode executions.
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    /// Provider name for diagnostics (e.g., "static")
    fn name(&self) -> &str;

    /// Current universe, deduplicated, in provider order.
    async fn universe(&self) -> Result<Vec<String>>;
}

/// A fixed universe, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    symbols: Vec<String>,
}

impl StaticUniverse {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.into().trim().to_uppercase();
            if !symbol.is_empty() && !unique.contains(&symbol) {
                unique.push(symbol);
            }
        }
        Self { symbols: unique }
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[async_trait]
impl UniverseProvider for StaticUniverse {
    fn name(&self) -> &str {
        "static"
    }

    async fn universe(&self) -> Result<Vec<String>> {
        Ok(self.symbols.clone())
    }
}

/// Wraps a provider so every lookup takes a token from the shared limiter.
pub struct RateLimitedUniverse<P> {
    inner: P,
    limiter: SharedRateLimiter,
}

impl<P: UniverseProvider> RateLimitedUniverse<P> {
    pub fn new(inner: P, limiter: SharedRateLimiter) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<P: UniverseProvider> UniverseProvider for RateLimitedUniverse<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn universe(&self) -> Result<Vec<String>> {
        self.limiter.acquire().await;
        let symbols = self.inner.universe().await?;
        debug!(
            provider = self.inner.name(),
            limiter = self.limiter.name(),
            symbols = symbols.len(),
            "Fetched universe"
        );
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::shared_limiter;

    #[tokio::test]
    async fn test_static_universe_normalizes() {
        let provider = StaticUniverse::new(["aapl", " MSFT ", "AAPL", ""]);
        assert_eq!(provider.universe().await.unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_rate_limited_universe_consumes_tokens() {
        let limiter = shared_limiter("universe", 60);
        let provider = RateLimitedUniverse::new(StaticUniverse::new(["SPY"]), limiter.clone());
        assert_eq!(provider.universe().await.unwrap(), vec!["SPY"]);
        assert!(!limiter.try_acquire());
        assert_eq!(provider.name(), "static");
    }
}
