pub mod accounting;
pub mod audit;
pub mod config;
pub mod console;
pub mod contact;
pub mod cycle;
pub mod db;
pub mod downtime;
pub mod error;
pub mod expireddeletion;
pub mod gc;
pub mod identity;
pub mod lifecycle;
pub mod mail;
pub mod memory;
pub mod metainfo;
pub mod metrics;
pub mod orders;
pub mod overlay;
pub mod peer;
pub mod repair;
pub mod revocation;
pub mod server;
pub mod time;
pub mod version;
pub mod web;

pub use config::Config;
pub use error::{Result, SatelliteError};
pub use identity::{FullIdentity, NodeId, NodeUrl};
pub use lifecycle::Service;
