//! # OPMS Sync Library
//!
//! Bidirectional synchronization between the OPMS catalog and the NetSuite
//! ERP: the inbound pricing webhook, the outbound work queue and its
//! dispatcher, job auditing, dry runs and the operator API.

pub mod auth;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod erp;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod models;
pub mod queue;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
