pub mod config;
pub mod detector;
pub mod deviation;
pub mod error;
pub mod pipelines;
pub mod reconcile;
pub mod schema;
