//! Logging settings.

use std::{borrow::Cow, str::FromStr as _};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Logging settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Log {
    /// Maximum allowed level of log entries.
    ///
    /// Defaults to `INFO`.
    #[default("INFO")]
    pub level: Cow<'static, str>,
}

impl Log {
    /// Returns the configured logging level. `None` if disabled.
    #[must_use]
    pub fn level(&self) -> Option<slog::Level> {
        slog::Level::from_str(&self.level).ok()
    }
}
