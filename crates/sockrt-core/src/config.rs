//! Centralized Configuration Management
//!
//! Configuration structures shared by the runtime and its hosts. Every struct
//! deserializes with defaults for missing fields so partial TOML files work.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Loop Configuration
// ----------------------------------------------------------------------------

/// Configuration for the reactor thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Upper bound on a single reactor wait
    pub poll_timeout_ms: u64,
    /// Name given to the reactor thread
    pub thread_name: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 32,
            thread_name: "sockrt-loop".to_string(),
        }
    }
}

impl LoopConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Data Configuration
// ----------------------------------------------------------------------------

/// Configuration for stored payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Lifetime of a stored payload
    pub ttl_ms: u64,
    /// Cadence of the expiry sweep
    pub expire_interval_ms: u64,
    /// Delay between serving a payload and removing it
    pub fetch_grace_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 32768,
            expire_interval_ms: 1024,
            fetch_grace_ms: 16,
        }
    }
}

impl DataConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn expire_interval(&self) -> Duration {
        Duration::from_millis(self.expire_interval_ms)
    }

    pub fn fetch_grace(&self) -> Duration {
        Duration::from_millis(self.fetch_grace_ms)
    }
}

// ----------------------------------------------------------------------------
// Descriptor Configuration
// ----------------------------------------------------------------------------

const DEFAULT_MAX_READ_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for open file and directory handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Cadence of the stale descriptor sweep
    pub gc_interval_ms: u64,
    /// Cap on entries returned by a single readdir
    pub max_readdir_entries: usize,
    /// Largest `size` a single read may request
    pub max_read_size: usize,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            gc_interval_ms: 1024,
            max_readdir_entries: 256,
            max_read_size: DEFAULT_MAX_READ_SIZE,
        }
    }
}

impl DescriptorConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Router Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// URI scheme of IPC requests
    pub scheme: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            scheme: crate::message::DEFAULT_SCHEME.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Runtime Configuration
// ----------------------------------------------------------------------------

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "loop")]
    pub event_loop: LoopConfig,
    pub data: DataConfig,
    pub descriptors: DescriptorConfig,
    pub router: RouterConfig,
}

impl RuntimeConfig {
    /// Short intervals for deterministic tests
    pub fn testing() -> Self {
        Self {
            event_loop: LoopConfig {
                poll_timeout_ms: 4,
                thread_name: "sockrt-loop-test".to_string(),
            },
            data: DataConfig {
                ttl_ms: 200,
                expire_interval_ms: 20,
                fetch_grace_ms: 16,
            },
            descriptors: DescriptorConfig {
                gc_interval_ms: 20,
                max_readdir_entries: 256,
                max_read_size: 64 * 1024,
            },
            router: RouterConfig::default(),
        }
    }

    /// Validate values that would otherwise stall timers
    pub fn validate(&self) -> crate::RuntimeResult<()> {
        if self.data.expire_interval_ms == 0 {
            return Err(crate::RuntimeError::config_error(
                "data.expire_interval_ms must be greater than zero",
            ));
        }
        if self.descriptors.gc_interval_ms == 0 {
            return Err(crate::RuntimeError::config_error(
                "descriptors.gc_interval_ms must be greater than zero",
            ));
        }
        if self.descriptors.max_read_size == 0 {
            return Err(crate::RuntimeError::config_error(
                "descriptors.max_read_size must be greater than zero",
            ));
        }
        if self.router.scheme.is_empty() {
            return Err(crate::RuntimeError::config_error("router.scheme must not be empty"));
        }
        Ok(())
    }
}
