//! Per-`Peer` connection lifecycle settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Per-`Peer` connection lifecycle settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Peer {
    /// How many times a failed connection with the same `Peer` is started
    /// anew before giving up on it.
    ///
    /// Defaults to `1`.
    #[default = 1]
    pub max_retries: u32,

    /// Pause before a failed connection is started anew.
    ///
    /// Defaults to `2s`.
    #[default(Duration::from_secs(2))]
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Duration a disconnected connection is given to recover before it is
    /// considered failed.
    ///
    /// Defaults to `5s`.
    #[default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub disconnect_grace_period: Duration,
}
