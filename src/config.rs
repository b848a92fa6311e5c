//! Bridge configuration.
//!
//! Defaults cover the common case; a handful of plus-args on the simulator
//! command line override them:
//!
//! ```text
//! +bridge_mode+drain        keep serving inside one callback until the controller yields
//! +bridge_max_frame+65536   maximum frame payload in bytes
//! +bridge_quiet             suppress informational console lines
//! ```

use std::fmt;
use std::str::FromStr;

use crate::args::InvocationArgs;
use crate::error::ConfigurationError;
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;

/// Option naming the controller's socket path.
pub const SOCKET_OPTION: &str = "socket";

/// System task the design calls to pump another dispatch cycle.
pub const SERVICE_TASK: &str = "$hdl_bridge_service";

/// Prefix on every console line the bridge prints.
pub const LOG_PREFIX: &str = "[hdl-bridge]";

const MODE_OPTION: &str = "bridge_mode";
const MAX_FRAME_OPTION: &str = "bridge_max_frame";
const QUIET_FLAG: &str = "bridge_quiet";

/// Smallest accepted frame limit; every command fits well within it.
const MIN_FRAME_BYTES: usize = 256;

/// How many messages one host invocation may consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Exactly one message exchange per invocation.
    #[default]
    Single,
    /// Keep exchanging messages until the controller advances time,
    /// finishes, or the connection closes.
    ///
    /// This blocks the simulator's scheduler for the whole stretch and is
    /// only meant for testbenches that never call the service task.
    Drain,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "drain" => Ok(Self::Drain),
            other => Err(format!("expected 'single' or 'drain', got '{other}'")),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Drain => write!(f, "drain"),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Option name holding the socket path.
    pub socket_option: String,
    /// System task bound to the service entry point.
    pub service_task: String,
    pub dispatch_mode: DispatchMode,
    /// Maximum JSON payload per frame, both directions.
    pub max_frame_bytes: usize,
    pub log_prefix: String,
    /// Suppress non-fatal console output.
    pub quiet: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_option: SOCKET_OPTION.to_string(),
            service_task: SERVICE_TASK.to_string(),
            dispatch_mode: DispatchMode::Single,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_prefix: LOG_PREFIX.to_string(),
            quiet: false,
        }
    }
}

impl BridgeConfig {
    /// Builds a configuration from defaults plus invocation overrides.
    ///
    /// # Errors
    /// `ConfigurationError::InvalidOption` for an unparsable override.
    pub fn from_args(args: &InvocationArgs) -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Some(mode) = args.resolve(MODE_OPTION) {
            config.dispatch_mode = mode.parse().map_err(|reason| ConfigurationError::InvalidOption {
                option: MODE_OPTION.to_string(),
                value: mode.to_string(),
                reason,
            })?;
        }

        if let Some(raw) = args.resolve(MAX_FRAME_OPTION) {
            let invalid = |reason: String| ConfigurationError::InvalidOption {
                option: MAX_FRAME_OPTION.to_string(),
                value: raw.to_string(),
                reason,
            };
            let bytes: usize = raw.trim().parse().map_err(|e| invalid(format!("{e}")))?;
            if bytes < MIN_FRAME_BYTES || bytes > u32::MAX as usize {
                return Err(invalid(format!("must be between {MIN_FRAME_BYTES} and {}", u32::MAX)));
            }
            config.max_frame_bytes = bytes;
        }

        config.quiet = args.flag(QUIET_FLAG);
        Ok(config)
    }

    /// Resolves the controller socket path from the invocation vector.
    #[must_use]
    pub fn socket_path<'a>(&self, args: &'a InvocationArgs) -> Option<&'a str> {
        args.resolve(&self.socket_option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_args(&InvocationArgs::default()).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.dispatch_mode, DispatchMode::Single);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(!config.quiet);
    }

    #[test]
    fn test_overrides_from_plus_args() {
        let args = InvocationArgs::new(["+bridge_mode+drain", "+bridge_max_frame+4096", "+bridge_quiet"]);
        let config = BridgeConfig::from_args(&args).unwrap();
        assert_eq!(config.dispatch_mode, DispatchMode::Drain);
        assert_eq!(config.max_frame_bytes, 4096);
        assert!(config.quiet);
    }

    #[test]
    fn test_invalid_mode_is_reported() {
        let args = InvocationArgs::new(["-bridge_mode", "turbo"]);
        let err = BridgeConfig::from_args(&args).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidOption { ref option, .. } if option == "bridge_mode"));
        assert!(err.to_string().contains("turbo"));
    }

    #[test]
    fn test_frame_limit_bounds() {
        for bad in ["+bridge_max_frame+12", "+bridge_max_frame+lots"] {
            let args = InvocationArgs::new([bad]);
            assert!(BridgeConfig::from_args(&args).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_socket_path_uses_configured_option() {
        let args = InvocationArgs::new(["+ctl+/tmp/ctl.sock", "-socket", "/tmp/sim.sock"]);
        let mut config = BridgeConfig::default();
        assert_eq!(config.socket_path(&args), Some("/tmp/sim.sock"));
        config.socket_option = "ctl".to_string();
        assert_eq!(config.socket_path(&args), Some("/tmp/ctl.sock"));
    }
}
