//! nio configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use nio_core::config::NioConfig;
//!
//! // Defaults with env overrides
//! let config = NioConfig::from_env();
//!
//! // Or customize programmatically
//! let config = NioConfig::from_env()
//!     .read_chunk(64 * 1024)
//!     .tcp_nodelay(false);
//! ```

use std::str::FromStr;

/// Library defaults, used when the matching environment variable is unset.
pub mod defaults {
    /// Largest single native read a channel issues.
    pub const READ_CHUNK: usize = 8192;
    pub const LISTEN_BACKLOG: i32 = 4096;
    pub const TCP_NODELAY: bool = true;
    pub const REUSE_ADDRESS: bool = true;
    /// Readiness events drained per poll call.
    pub const SELECT_BATCH: usize = 256;
}

/// Channel and selector configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NioConfig {
    /// Max bytes moved by one `SocketChannel::read`
    pub read_chunk: usize,
    /// `listen(2)` backlog for server channels
    pub listen_backlog: i32,
    /// Set TCP_NODELAY on connected and accepted sockets
    pub tcp_nodelay: bool,
    /// Set SO_REUSEADDR before bind
    pub reuse_address: bool,
    /// Readiness events per poll
    pub select_batch: usize,
}

impl Default for NioConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NioConfig {
    /// Library defaults, ignoring the environment.
    pub fn defaults() -> Self {
        Self {
            read_chunk: defaults::READ_CHUNK,
            listen_backlog: defaults::LISTEN_BACKLOG,
            tcp_nodelay: defaults::TCP_NODELAY,
            reuse_address: defaults::REUSE_ADDRESS,
            select_batch: defaults::SELECT_BATCH,
        }
    }

    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NIO_READ_CHUNK` - Max bytes per channel read
    /// - `NIO_LISTEN_BACKLOG` - Server socket backlog
    /// - `NIO_TCP_NODELAY` - Disable Nagle (0/1)
    /// - `NIO_REUSE_ADDRESS` - SO_REUSEADDR on bind (0/1)
    /// - `NIO_SELECT_BATCH` - Readiness events per poll
    pub fn from_env() -> Self {
        Self {
            read_chunk: env_get("NIO_READ_CHUNK", defaults::READ_CHUNK).max(1),
            listen_backlog: env_get("NIO_LISTEN_BACKLOG", defaults::LISTEN_BACKLOG),
            tcp_nodelay: env_get_bool("NIO_TCP_NODELAY", defaults::TCP_NODELAY),
            reuse_address: env_get_bool("NIO_REUSE_ADDRESS", defaults::REUSE_ADDRESS),
            select_batch: env_get("NIO_SELECT_BATCH", defaults::SELECT_BATCH).max(1),
        }
    }

    pub fn read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = n.max(1);
        self
    }

    pub fn listen_backlog(mut self, n: i32) -> Self {
        self.listen_backlog = n;
        self
    }

    pub fn tcp_nodelay(mut self, on: bool) -> Self {
        self.tcp_nodelay = on;
        self
    }

    pub fn reuse_address(mut self, on: bool) -> Self {
        self.reuse_address = on;
        self
    }

    pub fn select_batch(mut self, n: usize) -> Self {
        self.select_batch = n.max(1);
        self
    }
}

/// Get environment variable parsed as `T`, or `default` when unset or unparsable.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean variable: "1", "true", "yes", "on" (any case) are true,
/// "0", "false", "no", "off" are false, anything else yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__NIO_TEST_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__NIO_TEST_UNSET_VAR__", true));
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("__NIO_TEST_NUM__", " 123 ");
        let val: usize = env_get("__NIO_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::set_var("__NIO_TEST_NUM__", "nope");
        let val: usize = env_get("__NIO_TEST_NUM__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__NIO_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__NIO_TEST_BOOL__", "ON");
        assert!(env_get_bool("__NIO_TEST_BOOL__", false));
        std::env::set_var("__NIO_TEST_BOOL__", "off");
        assert!(!env_get_bool("__NIO_TEST_BOOL__", true));
        std::env::set_var("__NIO_TEST_BOOL__", "garbage");
        assert!(env_get_bool("__NIO_TEST_BOOL__", true));
        std::env::remove_var("__NIO_TEST_BOOL__");
    }

    #[test]
    fn test_builder() {
        let cfg = NioConfig::defaults().read_chunk(0).select_batch(16).tcp_nodelay(false);
        assert_eq!(cfg.read_chunk, 1);
        assert_eq!(cfg.select_batch, 16);
        assert!(!cfg.tcp_nodelay);
        assert_eq!(cfg.listen_backlog, defaults::LISTEN_BACKLOG);
    }
}
