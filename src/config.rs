//! Session configuration loaded from JSON.
//!
//! ```json
//! {
//!   "filter": "outbound and tcp.DstPort == 443",
//!   "layer": "network",
//!   "priority": 100,
//!   "flags": ["sniff", "recv_only"],
//!   "queue_length": 8192
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::driver::Binding;
use crate::error::{DivertError, Result};
use crate::handle::Handle;
use crate::types::{
    Flags, Layer, Param, PRIORITY_DEFAULT, QUEUE_LENGTH_DEFAULT, QUEUE_SIZE_DEFAULT,
    QUEUE_TIME_DEFAULT,
};

/// How to open a session and tune its queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub filter: String,
    pub layer: Layer,
    pub priority: i16,
    /// Flag names: sniff, drop, recv_only, send_only, no_install, fragments.
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<u64>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<u64>,
    /// Bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter: "true".to_string(),
            layer: Layer::Network,
            priority: PRIORITY_DEFAULT,
            flags: Vec::new(),
            queue_length: None,
            queue_time: None,
            queue_size: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DivertError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DivertError::Config(e.to_string()))
    }

    /// Combined open flags. Unknown names are an error.
    pub fn open_flags(&self) -> Result<Flags> {
        self.flags.iter().try_fold(Flags::DEFAULT, |acc, name| {
            Flags::from_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| DivertError::Config(format!("unknown flag '{}'", name)))
        })
    }

    /// Queue length the session runs with once opened.
    pub fn effective_queue_length(&self) -> u64 {
        self.queue_length.unwrap_or(QUEUE_LENGTH_DEFAULT)
    }

    pub fn effective_queue_time(&self) -> u64 {
        self.queue_time.unwrap_or(QUEUE_TIME_DEFAULT)
    }

    pub fn effective_queue_size(&self) -> u64 {
        self.queue_size.unwrap_or(QUEUE_SIZE_DEFAULT)
    }

    fn queue_params(&self) -> impl Iterator<Item = (Param, u64)> {
        [
            (Param::QueueLength, self.queue_length),
            (Param::QueueTime, self.queue_time),
            (Param::QueueSize, self.queue_size),
        ]
        .into_iter()
        .filter_map(|(param, value)| value.map(|v| (param, v)))
    }
}

impl Binding {
    /// Open a session as described by `config`, then apply its queue
    /// parameters. The handle is closed if a parameter is rejected.
    pub fn open_config(&self, config: &SessionConfig) -> Result<Handle> {
        let flags = config.open_flags()?;
        let handle = self.open(&config.filter, config.layer, config.priority, flags)?;
        for (param, value) in config.queue_params() {
            if let Err(e) = handle.set_param(param, value) {
                log::error!("Rejected {} = {} from session config: {}", param, value, e);
                if let Err(close_err) = handle.close() {
                    log::warn!("Failed to close rejected session: {}", close_err);
                }
                return Err(e);
            }
        }
        Ok(handle)
    }
}

/// Open a session from `config` through the process-wide binding.
pub fn open_config(config: &SessionConfig) -> Result<Handle> {
    Binding::global()?.open_config(config)
}
