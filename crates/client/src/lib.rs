//! Network client for outpost.
//!
//! This crate provides the reqwest-backed [`Fetcher`](outpost_core::Fetcher)
//! the agent uses to reach origin servers.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig};
