//! Default paths for turnstiled components
//!
//! Provides centralized path defaults that all crates can use.
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/turnstiled/turnstiled.sock` or `/tmp/turnstiled-$USER/turnstiled.sock`
//! - Data: `$XDG_DATA_HOME/turnstiled` or `~/.local/share/turnstiled`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const TURNSTILE_SOCKET_ENV: &str = "TURNSTILE_SOCKET";

/// Environment variable for overriding the data directory
pub const TURNSTILE_DATA_DIR_ENV: &str = "TURNSTILE_DATA_DIR";

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "turnstiled.sock";

/// Application subdirectory name
const APP_DIR: &str = "turnstiled";

/// Catalog filename within the config directory
const CATALOG_FILENAME: &str = "catalog.toml";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$TURNSTILE_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/turnstiled/turnstiled.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/turnstiled-$USER/turnstiled.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(TURNSTILE_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking TURNSTILE_SOCKET env var.
/// Used for default values in configs where the env var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$TURNSTILE_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/turnstiled` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/turnstiled` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(TURNSTILE_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking TURNSTILE_DATA_DIR env var.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default catalog config path.
///
/// `$XDG_CONFIG_HOME/turnstiled/catalog.toml` or `~/.config/turnstiled/catalog.toml`.
pub fn default_catalog_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CATALOG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CATALOG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CATALOG_FILENAME)
}
