//! Read-only semantic + metadata retrieval over three shared collections:
//! past analyses, personal notes, and curated trusted sources. A running
//! analysis only reads; archival writes happen in a post-run step outside
//! this crate.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use research_core::agents::EnrichedContext;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// The three retrievable collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    AnalysisMemory,
    PersonalKnowledge,
    TrustedSources,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::AnalysisMemory => "analysis_memory",
            MemorySource::PersonalKnowledge => "personal_knowledge",
            MemorySource::TrustedSources => "trusted_sources",
        }
    }

    pub const ALL: [MemorySource; 3] = [
        MemorySource::AnalysisMemory,
        MemorySource::PersonalKnowledge,
        MemorySource::TrustedSources,
    ];
}

/// One retrieved record with its metadata and similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub score: f64,
}

#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// Embedding-plus-metadata query across the requested collections.
    async fn query(
        &self,
        text: &str,
        filters: &HashMap<String, String>,
        sources: &[MemorySource],
        n: usize,
    ) -> MemoryResult<HashMap<MemorySource, Vec<MemoryRecord>>>;

    fn backend_name(&self) -> &'static str;
}

/// HTTP-backed retriever against the external memory service.
pub struct HttpMemoryRetriever {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMemoryRetriever {
    pub fn new(base_url: String) -> MemoryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_env() -> MemoryResult<Self> {
        let base_url = env::var("MEMORY_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8200".to_string());
        Self::new(base_url)
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    filters: &'a HashMap<String, String>,
    sources: Vec<&'static str>,
    n: usize,
}

#[async_trait]
impl MemoryRetriever for HttpMemoryRetriever {
    async fn query(
        &self,
        text: &str,
        filters: &HashMap<String, String>,
        sources: &[MemorySource],
        n: usize,
    ) -> MemoryResult<HashMap<MemorySource, Vec<MemoryRecord>>> {
        let body = QueryRequest {
            text,
            filters,
            sources: sources.iter().map(|s| s.as_str()).collect(),
            n,
        };
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MemoryError::InvalidResponse(format!(
                "memory service returned {}",
                response.status()
            )));
        }

        let by_name: HashMap<String, Vec<MemoryRecord>> = response.json().await?;
        let mut results = HashMap::new();
        for source in sources {
            if let Some(records) = by_name.get(source.as_str()) {
                results.insert(*source, records.clone());
            }
        }
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

/// In-memory retriever: substring match over seeded records. Used by tests
/// and by runs without a memory service configured.
#[derive(Default)]
pub struct InMemoryRetriever {
    records: HashMap<MemorySource, Vec<MemoryRecord>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, source: MemorySource, record: MemoryRecord) {
        self.records.entry(source).or_default().push(record);
    }
}

#[async_trait]
impl MemoryRetriever for InMemoryRetriever {
    async fn query(
        &self,
        text: &str,
        filters: &HashMap<String, String>,
        sources: &[MemorySource],
        n: usize,
    ) -> MemoryResult<HashMap<MemorySource, Vec<MemoryRecord>>> {
        let needle = text.to_lowercase();
        let mut results = HashMap::new();
        for source in sources {
            let matched: Vec<MemoryRecord> = self
                .records
                .get(source)
                .into_iter()
                .flatten()
                .filter(|r| {
                    let text_hit = needle
                        .split_whitespace()
                        .any(|word| r.text.to_lowercase().contains(word));
                    let filter_hit = filters
                        .iter()
                        .all(|(k, v)| r.metadata.get(k).map(|m| m == v).unwrap_or(false));
                    text_hit && filter_hit
                })
                .take(n)
                .cloned()
                .collect();
            results.insert(*source, matched);
        }
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Collapse query results into prompt-ready enriched context. Retrieval
/// failures upstream degrade to an empty context rather than aborting.
pub fn to_enriched_context(
    results: &HashMap<MemorySource, Vec<MemoryRecord>>,
) -> EnrichedContext {
    let texts = |source: MemorySource| -> Vec<String> {
        results
            .get(&source)
            .into_iter()
            .flatten()
            .map(|r| r.text.clone())
            .collect()
    };
    EnrichedContext {
        prior_analyses: texts(MemorySource::AnalysisMemory),
        personal_notes: texts(MemorySource::PersonalKnowledge),
        trusted_insights: texts(MemorySource::TrustedSources),
    }
}
