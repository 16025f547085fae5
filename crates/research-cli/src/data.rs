//! HTTP connector to the external market-data service: company snapshot for
//! the valuation bridge, source documents per hypothesis for deep research.

use std::env;
use std::time::Duration;

use async_trait::async_trait;

use research_core::agents::SourceDocument;
use research_core::error::ResearchError;
use research_core::types::Hypothesis;
use research_orchestrator::{CompanySnapshot, MarketDataProvider};

pub struct GatewayMarketData {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayMarketData {
    pub fn from_env() -> Result<Self, ResearchError> {
        let base_url = env::var("MARKET_DATA_URL")
            .unwrap_or_else(|_| "http://localhost:8300".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResearchError::DataFetch(e.to_string()))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl MarketDataProvider for GatewayMarketData {
    async fn company_snapshot(&self, ticker: &str) -> Result<CompanySnapshot, ResearchError> {
        let response = self
            .client
            .get(format!("{}/snapshot/{ticker}", self.base_url))
            .send()
            .await
            .map_err(|e| ResearchError::DataFetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResearchError::DataFetch(format!(
                "snapshot for {ticker} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ResearchError::DataFetch(e.to_string()))
    }

    async fn sources_for(
        &self,
        ticker: &str,
        hypothesis: &Hypothesis,
    ) -> Result<Vec<SourceDocument>, ResearchError> {
        let response = self
            .client
            .get(format!("{}/sources/{ticker}", self.base_url))
            .query(&[("query", hypothesis.evidence_needed.join(" "))])
            .send()
            .await
            .map_err(|e| ResearchError::DataFetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResearchError::DataFetch(format!(
                "sources for {ticker} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ResearchError::DataFetch(e.to_string()))
    }
}
