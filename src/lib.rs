pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;

pub use amount::{Amount, Percent};
pub use config::{ConfigError, LedgerConfig, SettingsSource};
pub use engine::{Engine, LedgerError, SharedEngine};
pub use model::{Command, UserId};
