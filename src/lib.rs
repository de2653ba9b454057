//! # bec-alerts
//!
//! Error-alerting pipeline: a processor drains forwarded error events from a
//! queue into deduplicated issues, and a watcher periodically evaluates
//! triggers over recently changed issues and sends alerts.

pub mod alerts;
pub mod aws;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod processor;
pub mod queue;
pub mod repositories;
pub mod telemetry;
pub mod triggers;
pub mod watcher;
pub use migration;
