//! Configuration loading.
//!
//! Only one file exists: `config.toml` in the gateway data directory. See
//! [`global`] for locations and format, and
//! [`UpdateConfig`](crate::update::config::UpdateConfig) for every key of the
//! `[update]` table.

pub mod global;

pub use global::{GlobalConfig, HOME_ENV, home_dir, update_paths};
