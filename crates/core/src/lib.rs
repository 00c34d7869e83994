//! Core engine of outpost, an offline-caching agent.
//!
//! This crate provides:
//! - Manifest model and content hashing
//! - Storage contracts with SQLite and in-memory backends
//! - Asset groups, data groups and app versions
//! - The driver state machine and its host contract
//! - Unified error types and configuration

pub mod adapter;
pub mod assets;
pub mod cache;
pub mod config;
pub mod context;
pub mod data;
pub mod debug;
pub mod driver;
pub mod error;
pub mod idle;
pub mod lru;
pub mod manifest;
pub mod net;
pub mod scope;
pub mod version;

pub use adapter::{Adapter, Clock, ManualClock, SystemClock};
pub use cache::{MemoryStorage, SqliteStorage, Storage};
pub use config::{AgentConfig, ConfigError};
pub use context::{Background, FetchContext};
pub use driver::{Clients, Driver, FetchOutcome, InboundMessage, OutboundMessage, ReadyState};
pub use error::Error;
pub use manifest::Manifest;
pub use net::{Fetcher, Request, Response};
pub use scope::Scope;
