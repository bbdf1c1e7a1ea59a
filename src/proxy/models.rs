//! Link and config data models

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Supported link protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Vmess, Protocol::Vless, Protocol::Trojan];

    /// Scheme prefix including the `://` separator
    pub fn prefix(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess://",
            Protocol::Vless => "vless://",
            Protocol::Trojan => "trojan://",
        }
    }

    /// Determine the protocol of a candidate link by its prefix
    pub fn detect(link: &str) -> Option<Protocol> {
        Self::ALL.into_iter().find(|p| link.starts_with(p.prefix()))
    }

    /// Whether the text mentions any supported scheme anywhere
    pub fn mentioned_in(text: &str) -> bool {
        Self::ALL.iter().any(|p| text.contains(p.prefix()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vmess => write!(f, "vmess"),
            Protocol::Vless => write!(f, "vless"),
            Protocol::Trojan => write!(f, "trojan"),
        }
    }
}

/// VMess share-link payload (the base64 JSON object).
///
/// Every field accepts a string, number, bool or `null`, so only the JSON
/// structure itself can reject a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmessConfig {
    #[serde(deserialize_with = "lenient_string")]
    pub v: String,
    #[serde(deserialize_with = "lenient_string")]
    pub ps: String,
    #[serde(deserialize_with = "lenient_string")]
    pub add: String,
    #[serde(deserialize_with = "lenient_string")]
    pub port: String,
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub aid: String,
    #[serde(deserialize_with = "lenient_string")]
    pub net: String,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(deserialize_with = "lenient_string")]
    pub host: String,
    #[serde(deserialize_with = "lenient_string")]
    pub path: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tls: String,
    #[serde(deserialize_with = "lenient_string")]
    pub sni: String,
}

/// VLESS link parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlessConfig {
    pub id: String,
    pub add: String,
    pub port: String,
    pub encryption: String,
    pub flow: String,
    pub sni: String,
    pub path: String,
    /// Value of the `security` query parameter
    pub tls: String,
}

/// Trojan link parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrojanConfig {
    pub password: String,
    pub add: String,
    pub port: String,
    pub sni: String,
    pub tls: String,
}

/// A decoded candidate link, tagged by protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkConfig {
    Vmess(VmessConfig),
    Vless(VlessConfig),
    Trojan(TrojanConfig),
}

impl LinkConfig {
    pub fn protocol(&self) -> Protocol {
        match self {
            LinkConfig::Vmess(_) => Protocol::Vmess,
            LinkConfig::Vless(_) => Protocol::Vless,
            LinkConfig::Trojan(_) => Protocol::Trojan,
        }
    }

    /// The TLS flag as carried by the link
    pub fn tls(&self) -> &str {
        match self {
            LinkConfig::Vmess(c) => &c.tls,
            LinkConfig::Vless(c) => &c.tls,
            LinkConfig::Trojan(c) => &c.tls,
        }
    }

    /// `address:port` of the remote server
    pub fn server(&self) -> String {
        let (add, port) = match self {
            LinkConfig::Vmess(c) => (&c.add, &c.port),
            LinkConfig::Vless(c) => (&c.add, &c.port),
            LinkConfig::Trojan(c) => (&c.add, &c.port),
        };
        format!("{}:{}", add, port)
    }
}

/// Result of pushing one candidate link through decode and probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Probe passed, link was handed to the sink
    Live,
    /// Probe ran and failed
    Dead,
    /// Decoding failed
    Undecodable,
    /// Unsupported scheme, never decoded
    Skipped,
}

/// Scalar JSON value as text; `null` becomes empty
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
        Bool(bool),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
        Raw::Bool(b) => b.to_string(),
        Raw::Null => String::new(),
    })
}
