//! # Bridge Configuration
//!
//! Ports, timeouts, and the environment contract handed to launched script
//! processes. Defaults mirror the protocol's deadlines: a handler gets one
//! second to veto an event, a batch gets a tenth of that collectively, and
//! a script gets ten seconds to acknowledge shutdown before it is killed.

use std::time::Duration;

use uuid::Uuid;

/// Environment variable telling a launched script where to connect.
pub const ENV_PORT: &str = "TICKBRIDGE_PORT";
/// Environment variable carrying the per-run auth token.
pub const ENV_TOKEN: &str = "TICKBRIDGE_TOKEN";
/// Environment variable overriding the script runtime executable.
pub const ENV_RUNTIME: &str = "TICKBRIDGE_RUNTIME";
/// Environment variable naming the script a runtime should run.
pub const ENV_SCRIPT: &str = "TICKBRIDGE_SCRIPT";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port to listen on. Zero picks an ephemeral port.
    pub port: u16,
    /// How long a launched script gets to connect and authenticate before
    /// its token is withdrawn and the process is stopped.
    pub connect_timeout: Duration,
    /// How long a fresh connection gets to authenticate.
    pub handshake_timeout: Duration,
    /// How long one event waits for handlers before proceeding.
    pub event_wait: Duration,
    /// Collective wait for all items of a batched event.
    pub batch_event_wait: Duration,
    /// How long shutdown waits for a script's acknowledgement.
    pub shutdown_ack_timeout: Duration,
    /// Grace between asking a process to stop and killing it.
    pub kill_grace: Duration,
    /// Executable used to run scripts, unless `TICKBRIDGE_RUNTIME` overrides.
    pub runtime: String,
    /// File extension scripts are discovered by.
    pub script_extension: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 0,
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            event_wait: Duration::from_millis(1000),
            batch_event_wait: Duration::from_millis(100),
            shutdown_ack_timeout: Duration::from_secs(10),
            kill_grace: Duration::from_secs(2),
            runtime: "python3".to_string(),
            script_extension: "py".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, then environment overrides for port and runtime.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = std::env::var(ENV_PORT).ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(runtime) = std::env::var(ENV_RUNTIME) {
            config.runtime = runtime;
        }
        config
    }
}

/// Unguessable per-session token.
pub fn fresh_token() -> String {
    Uuid::new_v4().to_string()
}
