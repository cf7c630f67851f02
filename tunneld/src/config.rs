//! Runtime configuration (ambient, ungrounded in spec.md but carried
//! the way the teacher carries its own `Conf`/`ConfHandle` pair: a
//! small, serde-deserializable struct behind a cheaply-cloneable
//! handle, loaded once at startup from an optional JSON file).

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7070";
const DEFAULT_SESSION_CAPACITY: usize = 30;
const DEFAULT_HEARTBEAT_SECS: u64 = 15;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

fn default_id() -> Uuid {
    Uuid::new_v4()
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

/// The subsystem's own construction-time identity, reported back to the
/// operator via `/host_details` (spec.md §6). The host process is free to
/// override both fields from its own configuration file; when it doesn't,
/// a fresh id is minted and the OS hostname is used, mirroring the
/// teacher's own `Conf::id`/`Conf::hostname` defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Conf {
    pub bind_addr: SocketAddr,
    pub connector_id: Uuid,
    pub hostname: String,
    pub session_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.parse().expect("valid default bind address"),
            connector_id: default_id(),
            hostname: default_hostname(),
            session_capacity: DEFAULT_SESSION_CAPACITY,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Conf {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Cheaply-cloneable handle to the loaded configuration. A thin wrapper
/// today, but it keeps the door open to hot-reload without changing the
/// call sites that read it.
#[derive(Debug, Clone)]
pub struct ConfHandle(Arc<Conf>);

impl ConfHandle {
    /// Loads configuration from the file named by `TUNNELD_CONFIG`, if
    /// set, falling back to defaults otherwise.
    pub fn init() -> anyhow::Result<Self> {
        let conf = match env::var_os("TUNNELD_CONFIG") {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.to_string_lossy()))?;
                serde_json::from_str(&raw)?
            }
            None => Conf::default(),
        };
        Ok(Self(Arc::new(conf)))
    }

    pub fn get_conf(&self) -> Arc<Conf> {
        Arc::clone(&self.0)
    }

    /// Builds a handle directly from a JSON config fragment, bypassing
    /// `TUNNELD_CONFIG`. Exists for tests that need to override a single
    /// field (e.g. a short `idle_timeout_secs`) without touching the
    /// environment.
    #[doc(hidden)]
    pub fn mock(json_config: &str) -> anyhow::Result<Self> {
        let conf: Conf = serde_json::from_str(json_config)?;
        Ok(Self(Arc::new(conf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let conf = Conf::default();
        assert_eq!(conf.session_capacity, DEFAULT_SESSION_CAPACITY);
        assert_eq!(conf.heartbeat_interval(), Duration::from_secs(DEFAULT_HEARTBEAT_SECS));
        assert_eq!(conf.idle_timeout(), Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS));
    }
}
