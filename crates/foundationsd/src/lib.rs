//! foundationsd - Identity Foundations backend
//!
//! Stores assessments, analyses and progress per user, runs the prompt
//! admin console and proxies LLM calls while recording A/B impressions.

pub mod admin;
pub mod config;
pub mod db;
pub mod error;
pub mod idempotency;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod server;
