//! HTTP plumbing shared by the live data source.

pub mod client;
pub mod upload;
