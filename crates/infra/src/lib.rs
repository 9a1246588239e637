//! Infrastructure layer: job store and import worker, product catalog,
//! webhook delivery, and the Postgres adapters behind them.

pub mod catalog;
pub mod import;
pub mod jobs;
pub mod postgres;
pub mod webhooks;
