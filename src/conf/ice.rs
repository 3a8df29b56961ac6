//! [ICE] servers settings.
//!
//! [ICE]: https://webrtcglossary.com/ice

use std::{borrow::Cow, collections::HashMap};

use playroom_signalling_proto::IceServer;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use smart_default::SmartDefault;

/// [ICE] servers settings.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// [STUN]/[TURN] servers every `PeerConnection` is created with, keyed
    /// by an arbitrary name.
    ///
    /// Defaults to the public Google [STUN] server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[default(Ice::default_servers())]
    pub r#static: HashMap<String, Server>,
}

impl Ice {
    fn default_servers() -> HashMap<String, Server> {
        let mut servers = HashMap::new();
        drop(servers.insert(
            "google".to_owned(),
            Server {
                urls: vec!["stun:stun.l.google.com:19302".into()],
                user: None,
                pass: None,
            },
        ));
        servers
    }

    /// Returns the configured servers as [`IceServer`]s, ordered by their
    /// names.
    #[must_use]
    pub fn servers(&self) -> Vec<IceServer> {
        let mut named: Vec<_> = self.r#static.iter().collect();
        named.sort_by(|(a, _), (b, _)| a.cmp(b));
        named.into_iter().map(|(_, s)| s.into()).collect()
    }
}

/// [STUN]/[TURN] server settings.
///
/// [STUN]: https://webrtcglossary.com/stun
/// [TURN]: https://webrtcglossary.com/turn
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Server {
    /// URLs of this [STUN]/[TURN] server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[serde(deserialize_with = "Server::parse_urls")]
    pub urls: Vec<Cow<'static, str>>,

    /// Username to use during the authentication process.
    pub user: Option<Cow<'static, str>>,

    /// Credential to use when logging into the server.
    pub pass: Option<Cow<'static, str>>,
}

impl Server {
    /// Parses [`Server::urls`] from the provided [`Deserializer`] as CSV
    /// (comma-separated values) string, or a list of them.
    ///
    /// # Errors
    ///
    /// - If cannot parse CSV strings.
    /// - If parsed [`Server::urls`] is empty or contains empty values.
    fn parse_urls<'de, D>(d: D) -> Result<Vec<Cow<'static, str>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde_json as json;

        fn split(csv: &str) -> impl Iterator<Item = Cow<'static, str>> + '_ {
            csv.split(',').map(|u| u.trim().to_owned().into())
        }

        let out: Vec<Cow<'static, str>> = match json::Value::deserialize(d)? {
            json::Value::String(urls) => split(&urls).collect(),
            json::Value::Array(list) => {
                let mut out = Vec::new();
                for val in list {
                    match val {
                        json::Value::String(urls) => out.extend(split(&urls)),
                        _ => return Err(D::Error::custom("Unexpected value")),
                    }
                }
                out
            }
            _ => return Err(D::Error::custom("Unexpected value")),
        };

        if out.is_empty() || out.iter().any(|url| url.is_empty()) {
            return Err(D::Error::custom("Empty values are not allowed"));
        }

        Ok(out)
    }
}

impl From<&Server> for IceServer {
    fn from(server: &Server) -> Self {
        Self {
            urls: server.urls.iter().map(|u| u.to_string()).collect(),
            username: server.user.as_ref().map(|u| u.to_string()),
            credential: server.pass.as_ref().map(|p| p.to_string()),
        }
    }
}
