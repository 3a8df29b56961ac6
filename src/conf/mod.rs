//! Provides library configuration options.

pub mod ice;
pub mod log;
pub mod media;
pub mod peer;

use std::{collections::HashMap, env};

use config::{
    Config, ConfigError, Environment, File, FileFormat, Source, Value,
};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

#[doc(inline)]
pub use self::{ice::Ice, log::Log, media::Media, peer::Peer};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "PLAYROOM_CONF";

/// Holds all library configuration.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// Logging settings.
    pub log: Log,

    /// [ICE] servers settings.
    ///
    /// [ICE]: https://webrtcglossary.com/ice
    pub ice: Ice,

    /// Per-`Peer` connection lifecycle settings.
    pub peer: Peer,

    /// Local media capturing settings.
    pub media: Media,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from such sources and in that
    /// order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// If some of the sources cannot be read or holds an invalid value.
    pub fn parse() -> Result<Self, ConfigError> {
        let mut cfg = Config::new();

        cfg.merge(Self::default())?;

        if let Some(path) = get_conf_file_name(
            env::var(APP_CONF_PATH_ENV_VAR_NAME),
            env::args(),
        ) {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(Environment::with_prefix("PLAYROOM").separator("__"))?;

        cfg.try_into()
    }
}

impl Source for Conf {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let serialized = toml::to_string(self)
            .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        File::from_str(&serialized, FileFormat::Toml).collect()
    }
}

/// Returns the path to a configuration file, if it's set via CLI `args`
/// or environment variables.
fn get_conf_file_name<T>(
    env_var: Result<String, env::VarError>,
    cmd_args: T,
) -> Option<String>
where
    T: Iterator<Item = String>,
{
    if let Ok(path) = env_var {
        return Some(path);
    }
    let mut args = cmd_args.skip_while(|x| x != APP_CONF_PATH_CMD_ARG_NAME);
    if args.next().is_some() {
        args.next().filter(|path| !path.is_empty())
    } else {
        None
    }
}
