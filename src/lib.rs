//! Persistence and query layer for a web change monitoring service.
//!
//! Three stores share one [`db::Store`] handle:
//! [`db::UserStore`] answers who follows what and who is due a reminder,
//! [`db::FingerprintStore`] keeps the latest checksum per monitored url, and
//! [`db::CountryScoreStore`] keeps OBI score history per country.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{CountryScoreStore, FingerprintStore, Store, UserStore};
pub use error::{AppError, Result};
