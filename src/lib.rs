//! SACCO Risk API Library
//!
//! Loan-portfolio risk scoring and repayment ledger for a savings and credit
//! cooperative, served over HTTP with a PostgreSQL or in-memory record store.
//!
//! # Modules
//!
//! - `api`: HTTP layer.
//! - `core`: Ledger, scoring and portfolio logic.
//! - `data`: Record store contract and implementations.
//! - `integrations`: Clients for remote scoring instances.
//! - `config`: Configuration management.
//! - `db`: Database connection pool and schema.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and routes.
//! - `intake`: Client registration and validation.
//! - `ledger`: Repayment ledger updater.
//! - `loans`: Disbursement, guarantors and loan lookups.
//! - `memory_store`: In-process record store.
//! - `models`: Core data models.
//! - `pg_store`: PostgreSQL record store.
//! - `portfolio`: Dashboard totals and arrears watchlist.
//! - `scoring`: Risk scorer.
//! - `scoring_client`: HTTP client for the risk scoring boundary.
//! - `store`: Record store trait.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod intake;
pub mod ledger;
pub mod loans;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod portfolio;
pub mod scoring;
pub mod scoring_client;
pub mod store;
