//! Boundary to the external data fetchers (filings, prices, search). The
//! engine only needs a company snapshot for the valuation bridge and source
//! documents per hypothesis; the concrete connectors live outside this core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use research_core::agents::SourceDocument;
use research_core::error::ResearchError;
use research_core::types::Hypothesis;

/// Fundamentals needed to anchor the DCF and the recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanySnapshot {
    pub name: String,
    pub current_price: f64,
    pub base_revenue: f64,
    pub net_debt: f64,
    pub cash: f64,
    pub shares_outstanding: f64,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn company_snapshot(&self, ticker: &str) -> Result<CompanySnapshot, ResearchError>;

    /// Source documents relevant to one hypothesis. Failures here degrade to
    /// an empty source list; they never abort the iteration.
    async fn sources_for(
        &self,
        ticker: &str,
        hypothesis: &Hypothesis,
    ) -> Result<Vec<SourceDocument>, ResearchError>;
}

/// Canned provider for tests and offline runs.
pub struct StaticMarketData {
    snapshot: CompanySnapshot,
    sources: Vec<SourceDocument>,
}

impl StaticMarketData {
    pub fn new(snapshot: CompanySnapshot) -> Self {
        Self {
            snapshot,
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceDocument>) -> Self {
        self.sources = sources;
        self
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn company_snapshot(&self, _ticker: &str) -> Result<CompanySnapshot, ResearchError> {
        Ok(self.snapshot.clone())
    }

    async fn sources_for(
        &self,
        _ticker: &str,
        _hypothesis: &Hypothesis,
    ) -> Result<Vec<SourceDocument>, ResearchError> {
        Ok(self.sources.clone())
    }
}
