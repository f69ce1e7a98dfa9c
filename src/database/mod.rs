pub mod manager;

pub use manager::{Connector, PgConnector, PoolError, PoolManager};
