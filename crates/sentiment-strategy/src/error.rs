use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// The external service a failed call went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Broker,
    News,
    Sentiment,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collaborator::Broker => write!(f, "broker"),
            Collaborator::News => write!(f, "news source"),
            Collaborator::Sentiment => write!(f, "sentiment scorer"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Invalid price for {symbol}: {price}")]
    InvalidPrice { symbol: String, price: Decimal },

    #[error("{collaborator} unavailable")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        #[source]
        source: anyhow::Error,
    },

    /// Broker reported cash/price too large to size a whole-share quantity
    #[error("Position size for {symbol} overflows (cash {cash}, price {last_price})")]
    SizingOverflow {
        symbol: String,
        cash: Decimal,
        last_price: Decimal,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StrategyError {
    pub fn broker(source: anyhow::Error) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: Collaborator::Broker,
            source,
        }
    }

    pub fn news(source: anyhow::Error) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: Collaborator::News,
            source,
        }
    }

    pub fn sentiment(source: anyhow::Error) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: Collaborator::Sentiment,
            source,
        }
    }

    /// Which collaborator failed, if this is a collaborator failure
    pub fn collaborator(&self) -> Option<Collaborator> {
        match self {
            Self::CollaboratorUnavailable { collaborator, .. } => Some(*collaborator),
            _ => None,
        }
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;
