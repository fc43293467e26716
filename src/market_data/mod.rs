pub mod candle;
pub mod candle_store;
pub mod snapshot;
pub mod source;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::{Candle, CandleRow, CandleTuple};
pub use candle_store::{InMemoryCandleStore, SeriesKey};
pub use snapshot::SnapshotDirectory;
pub use source::{CandleSource, FallbackSource};
