use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_volume")]
    pub max_volume: u16,
    /// Volume used when a requester has no stored preference.
    #[serde(default = "default_volume")]
    pub default_volume: u16,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Missed heartbeats before a peer is considered dead.
    #[serde(default = "default_heartbeat_grace")]
    pub heartbeat_grace: u32,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_enqueue_delay_ms")]
    pub enqueue_delay_ms: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Entries shown either side of the cursor in queue displays.
    #[serde(default = "default_queue_window")]
    pub queue_window: usize,
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_volume: default_max_volume(),
            default_volume: default_volume(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_grace: default_heartbeat_grace(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            enqueue_delay_ms: default_enqueue_delay_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            queue_window: default_queue_window(),
            message_ttl_secs: default_message_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// How long a peer may go without a successful heartbeat.
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_grace.max(1)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn enqueue_delay(&self) -> Duration {
        Duration::from_millis(self.enqueue_delay_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }
}

fn default_max_volume() -> u16 {
    100
}

fn default_volume() -> u16 {
    100
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    5
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_heartbeat_grace() -> u32 {
    3
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

fn default_enqueue_delay_ms() -> u64 {
    100
}

fn default_progress_interval_ms() -> u64 {
    2000
}

fn default_queue_window() -> usize {
    5
}

fn default_message_ttl_secs() -> u64 {
    30
}
