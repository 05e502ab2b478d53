pub mod aggregator;
pub mod metrics;
