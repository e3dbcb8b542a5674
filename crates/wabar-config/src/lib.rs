//! Configuration parsing for wabar
//!
//! This crate handles parsing the KDL configuration file that tells the
//! bar IPC bridge which bar to drive and how modifier-based hiding behaves.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
