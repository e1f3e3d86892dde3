#![doc = "relctl-core: release engineering logic for relctl."]

//! This crate holds every business rule of the release tooling: version
//! arithmetic, the OLM upgrade graph, the supported-version window, CSV and
//! package manifest edits, channel promotion, batch imports into reporting
//! sinks, report archiving, Prometheus report queries and cloud resource
//! sweeping.
//!
//! Remote systems are reached only through the traits in [`contract`]. The
//! `relctl` binary crate provides the concrete clients.

pub mod archive;
pub mod config;
pub mod contract;
pub mod error;
pub mod git;
pub mod graph;
pub mod import;
pub mod manifest;
pub mod promote;
pub mod query;
pub mod runner;
pub mod selector;
pub mod sweep;
pub mod version;
