//! Library crate for homepage-scan-rs: discovers web services on a home
//! network and reconciles them into a curated, persistent catalog.
pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod icons;
pub mod netdetect;
pub mod orchestrator;
pub mod prober;
pub mod reconcile;
pub mod server;
pub mod status;
pub mod types;
