pub mod broker;
pub mod clock;
pub mod engine;
pub mod models;

pub use broker::SimulatedBroker;
pub use clock::SimClock;
pub use engine::{load_bars, BacktestEngine};
pub use models::*;

#[cfg(test)]
mod tests;
