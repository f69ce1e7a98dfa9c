pub mod clients;
pub mod metrics;
