pub mod config;
pub mod desk;
pub mod grouping;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod store;
pub mod wal;
