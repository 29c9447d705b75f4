use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::{Polarity, SentimentScorer, SentimentSignal};

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "aren't",
    "wasn't", "weren't", "won't", "wouldn't", "couldn't", "shouldn't", "hardly",
    "barely", "neither", "nor", "without",
];

const NEGATION_WINDOW: usize = 3;

const POSITIVE_WORDS: &[&str] = &[
    "bullish", "rally", "rallies", "surge", "surges", "gain", "gains", "profit",
    "growth", "beat", "beats", "upgrade", "upgraded", "outperform", "strong",
    "rise", "rises", "record", "soar", "soars", "rebound", "recovery", "robust",
    "accelerating", "exceed", "exceeds", "optimistic", "buyback", "dividend",
    "upside", "tailwind", "raised", "breakthrough",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bearish", "decline", "declines", "loss", "losses", "fall", "falls",
    "plunge", "plunges", "crash", "crashes", "miss", "misses", "downgrade",
    "downgraded", "underperform", "weak", "drop", "drops", "slump", "warning",
    "pessimistic", "fear", "fears", "recession", "lawsuit", "investigation", "default",
    "bankruptcy", "layoff", "layoffs", "downside", "headwind", "lowered",
];

/// Lexicon scorer used when no FinBERT service is configured.
///
/// Counts positive and negative words across all headlines, flipping a word
/// when a negation appears up to three words before it. The probability is
/// the winning side's share with one neutral pseudo-count added, so it stays
/// strictly below 1 and only approaches it with a lot of one-sided evidence.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
    negation: HashSet<&'static str>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordScorer {
    pub fn new() -> Self {
        Self {
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
            negation: NEGATION_WORDS.iter().copied().collect(),
        }
    }

    /// (positive hits, negative hits) for one text
    fn count(&self, text: &str) -> (u32, u32) {
        let text_lower = text.to_lowercase();
        let words: Vec<&str> = text_lower
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '.' | '!' | '?' | ':' | '"'))
            .filter(|w| !w.is_empty())
            .collect();

        let negation_positions: Vec<usize> = words
            .iter()
            .enumerate()
            .filter(|(_, w)| self.negation.contains(*w))
            .map(|(i, _)| i)
            .collect();

        let mut positive = 0;
        let mut negative = 0;

        for (i, word) in words.iter().enumerate() {
            let is_positive = self.positive.contains(*word);
            let is_negative = self.negative.contains(*word);
            if !is_positive && !is_negative {
                continue;
            }

            let negated = negation_positions
                .iter()
                .any(|&neg_pos| neg_pos < i && (i - neg_pos) <= NEGATION_WINDOW);

            if is_positive != negated {
                positive += 1;
            } else {
                negative += 1;
            }
        }

        (positive, negative)
    }

    pub fn score_headlines(&self, headlines: &[String]) -> SentimentSignal {
        let (positive, negative) = headlines
            .iter()
            .map(|h| self.count(h))
            .fold((0u32, 0u32), |(p, n), (hp, hn)| (p + hp, n + hn));

        let total = (positive + negative + 1) as f64;
        if positive > negative {
            SentimentSignal::new(positive as f64 / total, Polarity::Positive)
        } else if negative > positive {
            SentimentSignal::new(negative as f64 / total, Polarity::Negative)
        } else {
            SentimentSignal::new(1.0 - (positive + negative) as f64 / total, Polarity::Neutral)
        }
    }
}

#[async_trait]
impl SentimentScorer for KeywordScorer {
    async fn score(&self, headlines: &[String]) -> Result<SentimentSignal> {
        Ok(self.score_headlines(headlines))
    }

    fn scorer_name(&self) -> &str {
        "keyword"
    }
}
