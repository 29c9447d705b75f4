use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod finbert;
pub mod keyword;

pub use error::{SentimentError, SentimentResult};
pub use finbert::FinBertClient;
pub use keyword::KeywordScorer;

/// Direction of a sentiment reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl Polarity {
    /// Parse a model label. Anything other than positive/negative is neutral.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "positive" => Polarity::Positive,
            "negative" => Polarity::Negative,
            _ => Polarity::Neutral,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "positive"),
            Polarity::Negative => write!(f, "negative"),
            Polarity::Neutral => write!(f, "neutral"),
        }
    }
}

/// (probability, polarity) pair scored from a set of headlines
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentSignal {
    /// Confidence in `polarity`, always within [0, 1]
    pub probability: f64,
    pub polarity: Polarity,
}

impl SentimentSignal {
    pub fn new(probability: f64, polarity: Polarity) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self {
            probability,
            polarity,
        }
    }

    /// Reading for "no headlines"
    pub fn neutral() -> Self {
        Self::new(0.0, Polarity::Neutral)
    }
}

/// Scores a set of headlines as one reading.
///
/// An empty slice is valid input and must not fail on its own.
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, headlines: &[String]) -> Result<SentimentSignal>;

    /// Scorer name for logging
    fn scorer_name(&self) -> &str;
}

#[async_trait]
impl<T: SentimentScorer + ?Sized> SentimentScorer for Box<T> {
    async fn score(&self, headlines: &[String]) -> Result<SentimentSignal> {
        (**self).score(headlines).await
    }

    fn scorer_name(&self) -> &str {
        (**self).scorer_name()
    }
}
