pub mod config;
pub mod dashboard;
pub mod distribution;
pub mod error;
pub mod notify;
pub mod shutdown;
pub mod store;
pub mod transport;
