use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub mod window;

pub use window::{NewsWindow, TRAILING_DAYS};

/// Source of news headlines for a symbol over a calendar-date range.
///
/// Both bounds are inclusive. An empty result is a valid answer.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn get_headlines(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>>;

    /// Source name for logging
    fn source_name(&self) -> &str;
}

#[async_trait]
impl<T: NewsSource + ?Sized> NewsSource for Box<T> {
    async fn get_headlines(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>> {
        (**self).get_headlines(symbol, start, end).await
    }

    fn source_name(&self) -> &str {
        (**self).source_name()
    }
}

#[async_trait]
impl<T: NewsSource + ?Sized> NewsSource for Arc<T> {
    async fn get_headlines(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>> {
        (**self).get_headlines(symbol, start, end).await
    }

    fn source_name(&self) -> &str {
        (**self).source_name()
    }
}

/// One stored headline, the on-disk format of [`FileNewsSource`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineRecord {
    pub symbol: String,
    pub published: DateTime<Utc>,
    pub headline: String,
}

/// Historical headlines loaded up front, for offline backtests.
#[derive(Debug, Clone, Default)]
pub struct FileNewsSource {
    records: Vec<HeadlineRecord>,
}

impl FileNewsSource {
    pub fn new(mut records: Vec<HeadlineRecord>) -> Self {
        records.sort_by(|a, b| a.published.cmp(&b.published));
        Self { records }
    }

    /// Load a JSON array of [`HeadlineRecord`]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read news file {}", path.display()))?;
        let records: Vec<HeadlineRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid news file {}", path.display()))?;

        tracing::info!("Loaded {} headlines from {}", records.len(), path.display());
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl NewsSource for FileNewsSource {
    async fn get_headlines(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>> {
        let from = start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let until = end.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc() + Duration::days(1);

        Ok(self
            .records
            .iter()
            .filter(|r| r.symbol.eq_ignore_ascii_case(symbol))
            .filter(|r| r.published >= from && r.published < until)
            .map(|r| r.headline.clone())
            .collect())
    }

    fn source_name(&self) -> &str {
        "file"
    }
}
