use std::time::Duration;

/// Policy applied when a user opens a second connection while one is already
/// registered for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiLoginPolicy {
    /// The new connection takes over the presence entry; the old one stays
    /// open but no longer receives user-targeted pushes.
    Replace,
    /// The new connection takes over and the old one is closed so its client
    /// can fall back to the reconnect path.
    ForceClose,
}

impl MultiLoginPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "replace" => Some(Self::Replace),
            "force_close" => Some(Self::ForceClose),
            _ => None,
        }
    }
}

/// Realtime service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secret used to verify the `authToken` session JWT.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Interval between server liveness probes.
    pub heartbeat_interval: Duration,
    /// What happens to an existing connection when the same user logs in again.
    pub multi_login: MultiLoginPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("JWT_SECRET"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
            heartbeat_interval: Duration::from_secs(
                std::env::var("HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            multi_login: std::env::var("MULTI_LOGIN_POLICY")
                .ok()
                .and_then(|v| MultiLoginPolicy::parse(&v))
                .unwrap_or(MultiLoginPolicy::Replace),
        }
    }

    /// How long a connection may go without any inbound traffic before the
    /// server closes it. Must exceed the probe interval by a safety margin.
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
