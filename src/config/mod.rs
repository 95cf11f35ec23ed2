pub mod display;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod validate;

pub use display::display_config;
pub use parser::{ConfigError, ConfigParser};
pub use types::{CgiConfig, RouteConfig, ServerConfig};
pub use validate::validate_configs;

use std::path::Path;

use crate::error::{AppError, AppResult};

/// Reads, parses, and validates a configuration file, returning the
/// surviving server blocks. Empty if every block was dropped by validation
/// (the caller turns that into `AppError::NoValidServers`).
pub fn load(path: &Path) -> AppResult<Vec<ServerConfig>> {
    let servers = ConfigParser::parse_file(path)?;
    Ok(validate_configs(servers))
}
