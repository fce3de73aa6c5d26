use std::net::SocketAddr;
use std::path::Path;

use facegate_core::config::ConfigError;
use facegate_core::Settings;

/// Listen address used when `FACEGATE_BIND` is unset or invalid.
pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// Daemon configuration: shared settings plus the HTTP listen address.
pub struct DaemonConfig {
    pub settings: Settings,
    pub bind: SocketAddr,
}

impl DaemonConfig {
    /// Load settings (file named by `FACEGATE_CONFIG`, then `FACEGATE_*`) and `FACEGATE_BIND`.
    pub fn from_env(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = Settings::load(config_file)?;
        let bind = parse_bind(std::env::var("FACEGATE_BIND").ok().as_deref());
        Ok(Self { settings, bind })
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// Parse a listen address. A bare `:port` binds every interface.
fn parse_bind(value: Option<&str>) -> SocketAddr {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return default_bind();
    };
    let addr = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    match addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::warn!(
                value = raw,
                error = %err,
                default = DEFAULT_BIND,
                "ignoring FACEGATE_BIND"
            );
            default_bind()
        }
    }
}
