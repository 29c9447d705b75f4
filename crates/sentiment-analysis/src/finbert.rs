use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{SentimentError, SentimentResult};
use crate::{Polarity, SentimentScorer, SentimentSignal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSentimentResponse {
    pub overall_sentiment: String,
    pub confidence: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub article_count: usize,
    #[serde(default)]
    pub processing_time_ms: f64,
}

impl NewsSentimentResponse {
    pub fn to_signal(&self) -> SentimentSignal {
        SentimentSignal::new(self.confidence, Polarity::from_label(&self.overall_sentiment))
    }
}

#[derive(Debug, Clone, Serialize)]
struct NewsSentimentRequest<'a> {
    headlines: &'a [String],
    symbol: Option<&'a str>,
}

/// Client for the FinBERT headline-sentiment service.
///
/// The service scores all headlines together and answers with the winning
/// label and its softmax probability.
#[derive(Clone)]
pub struct FinBertClient {
    client: reqwest::Client,
    base_url: String,
    symbol: Option<String>,
}

impl FinBertClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SentimentResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbol: None,
        })
    }

    /// Tag requests with the traded symbol (used by the service for caching)
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Score a batch of headlines as one reading
    pub async fn analyze_news(&self, headlines: &[String]) -> SentimentResult<NewsSentimentResponse> {
        let request = NewsSentimentRequest {
            headlines,
            symbol: self.symbol.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/analyze-news", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SentimentError::ServiceUnavailable(format!(
                "Status: {}",
                response.status()
            )));
        }

        let result = response.json::<NewsSentimentResponse>().await?;
        if !result.confidence.is_finite() {
            return Err(SentimentError::InvalidResponse(format!(
                "confidence {} is not a number",
                result.confidence
            )));
        }
        Ok(result)
    }

    /// Check service health
    pub async fn health(&self) -> SentimentResult<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl SentimentScorer for FinBertClient {
    async fn score(&self, headlines: &[String]) -> Result<SentimentSignal> {
        // Nothing to score: answer locally, same as the model does for no input
        if headlines.is_empty() {
            return Ok(SentimentSignal::neutral());
        }

        let response = self.analyze_news(headlines).await?;
        tracing::debug!(
            "FinBERT scored {} headlines: {} ({:.4}) in {:.0}ms",
            headlines.len(),
            response.overall_sentiment,
            response.confidence,
            response.processing_time_ms
        );
        Ok(response.to_signal())
    }

    fn scorer_name(&self) -> &str {
        "finbert"
    }
}
