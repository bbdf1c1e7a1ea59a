//! Link decoder for vmess, vless and trojan share links

use crate::error::{DecodeError, DecodeStage};
use crate::proxy::models::{LinkConfig, Protocol, TrojanConfig, VlessConfig, VmessConfig};
use crate::Result;
use base64::engine::general_purpose;
use base64::Engine;
use std::fs;
use std::path::Path;
use url::Url;

/// Pieces shared by the URI-shaped link formats
struct UriParts {
    userinfo: String,
    address: String,
    port: String,
    url: Url,
}

impl UriParts {
    /// First value of a query parameter, empty when absent
    fn query(&self, key: &str) -> String {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }
}

/// Decoder turning raw candidate links into structured configs
pub struct LinkParser;

impl LinkParser {
    /// Decode a candidate link, dispatching on its scheme
    pub fn parse(link: &str) -> std::result::Result<LinkConfig, DecodeError> {
        match Protocol::detect(link) {
            Some(Protocol::Vmess) => Self::parse_vmess(link).map(LinkConfig::Vmess),
            Some(Protocol::Vless) => Self::parse_vless(link).map(LinkConfig::Vless),
            Some(Protocol::Trojan) => Self::parse_trojan(link).map(LinkConfig::Trojan),
            None => Err(DecodeError::new(
                DecodeStage::Scheme,
                "unsupported link scheme",
            )),
        }
    }

    /// Parse `vmess://<base64 json>`
    pub fn parse_vmess(link: &str) -> std::result::Result<VmessConfig, DecodeError> {
        let encoded = link.strip_prefix(Protocol::Vmess.prefix()).unwrap_or(link);
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DecodeError::new(DecodeStage::Base64, e.to_string()))?;

        serde_json::from_slice(&decoded)
            .map_err(|e| DecodeError::new(DecodeStage::Json, e.to_string()))
    }

    /// Parse `vless://id@address:port?encryption=..&flow=..&security=..&sni=..&path=..`
    pub fn parse_vless(link: &str) -> std::result::Result<VlessConfig, DecodeError> {
        let parts = Self::parse_uri(link)?;

        Ok(VlessConfig {
            encryption: parts.query("encryption"),
            flow: parts.query("flow"),
            tls: parts.query("security"),
            sni: parts.query("sni"),
            path: parts.query("path"),
            id: parts.userinfo,
            add: parts.address,
            port: parts.port,
        })
    }

    /// Parse `trojan://password@address:port?sni=..&tls=..`
    pub fn parse_trojan(link: &str) -> std::result::Result<TrojanConfig, DecodeError> {
        let parts = Self::parse_uri(link)?;

        Ok(TrojanConfig {
            sni: parts.query("sni"),
            tls: parts.query("tls"),
            password: parts.userinfo,
            add: parts.address,
            port: parts.port,
        })
    }

    fn parse_uri(link: &str) -> std::result::Result<UriParts, DecodeError> {
        // Split the raw authority text so bracketed IPv6 hosts are rejected
        // instead of being normalised by the URL parser.
        let host = raw_host(link);
        let pieces: Vec<&str> = host.split(':').collect();
        let bad_host = || {
            DecodeError::new(
                DecodeStage::BadHost,
                format!("invalid host format {:?}, expected address:port", host),
            )
        };

        let url = Url::parse(link).map_err(|e| {
            if pieces.len() > 2 {
                bad_host()
            } else {
                DecodeError::new(DecodeStage::Uri, e.to_string())
            }
        })?;

        let userinfo = match url.password() {
            Some(password) => format!("{}:{}", url.username(), password),
            None => url.username().to_string(),
        };
        if userinfo.is_empty() {
            return Err(DecodeError::new(
                DecodeStage::MissingCredential,
                "missing user info",
            ));
        }

        if pieces.len() != 2 {
            return Err(bad_host());
        }

        Ok(UriParts {
            userinfo,
            address: pieces[0].to_string(),
            port: pieces[1].to_string(),
            url,
        })
    }

    /// Keep trimmed lines that start with a supported scheme
    pub fn extract_links(content: &str) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| Protocol::detect(line).is_some())
            .map(str::to_string)
            .collect()
    }

    /// Decode a base64-wrapped subscription body.
    ///
    /// Returns `None` unless the body decodes to UTF-8 text that mentions a
    /// supported scheme.
    pub fn decode_subscription(body: &str) -> Option<String> {
        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return None;
        }

        [&general_purpose::STANDARD, &general_purpose::STANDARD_NO_PAD]
            .into_iter()
            .find_map(|engine| engine.decode(&compact).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|text| Protocol::mentioned_in(text))
    }

    /// Read candidate links from a local file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::extract_links(&content))
    }

    /// Write links to a file, one per line
    pub fn save_to_file<P: AsRef<Path>>(links: &[String], path: P) -> Result<()> {
        let mut content = links.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(path, content)?;
        Ok(())
    }
}

/// The `host[:port]` text of a link's authority, without userinfo
fn raw_host(link: &str) -> &str {
    let rest = link.split_once("://").map_or(link, |(_, rest)| rest);
    let end = rest.find(|c: char| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
    let authority = &rest[..end];
    authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host)
}
