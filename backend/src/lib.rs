//! Payment-gated private aggregation exchange.
//!
//! A requestor buys an aggregate statistic computed over several providers' private records.
//! Providers are queried concurrently, their answers are combined (optionally under Paillier
//! encryption so no single provider's figure is ever revealed), the result is perturbed with
//! Laplace noise, and only providers whose data was used get paid.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod dataset;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod noise;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod settlement;
pub mod state;

pub use errors::ExchangeError;
