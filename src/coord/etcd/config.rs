use std::time::Duration;

/// Runtime configuration describing how to reach etcd.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    /// Base URL of the gateway, e.g. `http://127.0.0.1:2379`.
    pub endpoint: String,
    /// Lease time-to-live; ephemeral entries vanish this long after the last heartbeat.
    pub session_timeout: Duration,
}

impl EtcdConfig {
    /// Construct a configuration from an endpoint and a session timeout.
    pub fn new(endpoint: impl Into<String>, session_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_timeout,
        }
    }

    /// Lease TTL in whole seconds, never below the one second etcd accepts.
    pub(crate) fn ttl_secs(&self) -> i64 {
        self.session_timeout.as_secs().max(1) as i64
    }

    /// Period between two lease heartbeats.
    pub(crate) fn keepalive_interval(&self) -> Duration {
        (self.session_timeout / 3).max(Duration::from_millis(200))
    }
}
