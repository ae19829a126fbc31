//! Pair Discovery Module
//!
//! Finds cointegrated trading pairs in a price universe and maintains the
//! atomically published set of pairs the tick path trades.
//!
//! # Example
//!
//! ```ignore
//! use statarb::discovery::{DiscoveryConfig, PairDiscoveryEngine, PriceUniverse};
//!
//! let engine = PairDiscoveryEngine::new(DiscoveryConfig::default())?;
//! let (ranked, stats) = engine.scan(&universe)?;
//! ```

pub mod active_set;
pub mod config;
pub mod engine;
pub mod error;
pub mod johansen;
pub mod stat_test;
pub mod stats;

pub use active_set::{ActivePair, ActivePairSet, ActiveSetPublisher, Handoff, PairStatus};
pub use config::{CointegrationMethod, CorrelationBasis, DiscoveryConfig, ScoreWeights};
pub use engine::{DiscoveryCycle, PairCandidate, PairDiscoveryEngine, PriceUniverse, ScanStats};
pub use error::DiscoveryError;
pub use stat_test::{
    AugmentedDickeyFuller, CointegrationTest, EngleGranger, JohansenTrace, StationarityTest,
    StatisticalTest, TestOutcome,
};
