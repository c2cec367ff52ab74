//! Opening handshake (RFC 6455 Section 4).
//!
//! Requests and responses are plain values: they are built, serialized,
//! parsed and verified without touching a transport, so each side of the
//! negotiation can be exercised on its own.

use std::net::Ipv6Addr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use url::{Host, Url};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate speaks.
pub const WS_VERSION: &str = "13";

/// Headers a request may carry only once.
const SINGLE_VALUE_REQUEST_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh Sec-WebSocket-Key: 16 random bytes, base64-encoded.
///
/// # Errors
///
/// Returns `Error::Io` if the random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(format!("random source: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Check a request's Origin against the server's allow-list.
///
/// `None` or an empty list disables the check. An empty string in the list
/// admits requests that carry no Origin header.
///
/// # Errors
///
/// Returns `Error::OriginNotAllowed` when the list is active and neither
/// rule admits the request.
pub fn validate_origin(origin: Option<&str>, allowed: Option<&[String]>) -> Result<()> {
    let Some(allowed) = allowed.filter(|list| !list.is_empty()) else {
        return Ok(());
    };

    let wanted = origin.unwrap_or("");
    if allowed.iter().any(|a| a == wanted) {
        Ok(())
    } else {
        Err(Error::OriginNotAllowed {
            origin: origin.unwrap_or("(none)").to_string(),
        })
    }
}

/// First subprotocol in the client's preference order that the server supports.
#[must_use]
pub fn select_subprotocol(offered: &[String], supported: &[String]) -> Option<String> {
    offered
        .iter()
        .find(|p| supported.iter().any(|s| s == *p))
        .cloned()
}

fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<()> {
    let is_token = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if is_token {
        Ok(())
    } else {
        Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "header name is not an HTTP token".to_string(),
        })
    }
}

/// Ordered HTTP header multimap.
///
/// Names keep their original spelling for serialization; lookups are
/// case-insensitive. Repeated names are preserved in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if the name is not a token or the
    /// value contains CR or LF.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate_header_name(&name)?;
        validate_header_value(&name, &value)?;
        self.entries.push((name, value));
        Ok(())
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of occurrences of `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    /// Whether any value of `name`, split on commas, equals `token` ignoring case.
    #[must_use]
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Comma-separated values of every `name` header, flattened.
    #[must_use]
    pub fn split_values(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
    }

    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut headers = Self::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                return Err(Error::InvalidHandshake(
                    "folded header lines are not supported".into(),
                ));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidHandshake(format!("malformed header line: {line}")))?;
            headers
                .append(name, value.trim())
                .map_err(|e| Error::InvalidHandshake(e.to_string()))?;
        }
        Ok(headers)
    }
}

/// Split an HTTP head into its start line and header lines.
fn split_head(data: &[u8]) -> Result<(&str, std::str::Split<'_, &'static str>)> {
    let text =
        std::str::from_utf8(data).map_err(|_| Error::InvalidHandshake("head is not valid UTF-8".into()))?;
    let text = text.strip_suffix("\r\n\r\n").unwrap_or(text);
    let mut lines = text.split("\r\n");
    let start = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::InvalidHandshake("empty head".into()))?;
    Ok((start, lines))
}

/// Client opening request: `GET <path> HTTP/1.1` plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/chat?room=1`.
    pub path: String,
    pub headers: Headers,
}

impl HandshakeRequest {
    /// Build a client request.
    ///
    /// Required upgrade headers come first, then Origin and
    /// Sec-WebSocket-Protocol when given, then `extra_headers` in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if any name or value would break
    /// the HTTP framing, or `Error::InvalidUri` for a path that is not a
    /// valid request target.
    pub fn client(
        path: &str,
        host: &str,
        key: &str,
        subprotocols: &[String],
        origin: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Self> {
        if !path.starts_with('/') || path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(Error::InvalidUri(format!("invalid request target: {path:?}")));
        }

        let mut headers = Headers::new();
        headers.append("Host", host)?;
        headers.append("Upgrade", "websocket")?;
        headers.append("Connection", "Upgrade")?;
        headers.append("Sec-WebSocket-Key", key)?;
        headers.append("Sec-WebSocket-Version", WS_VERSION)?;
        if let Some(origin) = origin {
            headers.append("Origin", origin)?;
        }
        if !subprotocols.is_empty() {
            headers.append("Sec-WebSocket-Protocol", subprotocols.join(", "))?;
        }
        for (name, value) in extra_headers {
            headers.append(name.as_str(), value.as_str())?;
        }

        Ok(Self {
            path: path.to_string(),
            headers,
        })
    }

    /// Serialize the request head, terminated by an empty line.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(b"GET ");
        buf.extend_from_slice(self.path.as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\n");
        self.headers.write_to(&mut buf);
        buf
    }

    /// Parse a request head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed or missing.
    /// - The HTTP method is not `GET`.
    /// - The HTTP version is not `HTTP/1.1`.
    /// - A header line is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (request_line, lines) = split_head(data)?;

        let mut parts = request_line.split(' ');
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidHandshake(format!(
                "invalid request line: {request_line}"
            )));
        };
        if method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "expected GET method, got {method}"
            )));
        }
        if version != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!(
                "expected HTTP/1.1, got {version}"
            )));
        }
        if !path.starts_with('/') {
            return Err(Error::InvalidHandshake(format!("invalid request target: {path}")));
        }

        Ok(Self {
            path: path.to_string(),
            headers: Headers::parse_lines(lines)?,
        })
    }

    /// Server-side checks. Returns the client's Sec-WebSocket-Key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - A security-relevant header appears more than once.
    /// - `Host` is missing or empty.
    /// - `Upgrade` is not `websocket` or `Connection` lacks the `upgrade` token.
    /// - `Sec-WebSocket-Version` is not 13.
    /// - `Sec-WebSocket-Key` is missing or does not decode to 16 bytes.
    pub fn validate(&self) -> Result<&str> {
        for name in SINGLE_VALUE_REQUEST_HEADERS {
            if self.headers.count(name) > 1 {
                return Err(Error::InvalidHandshake(format!("duplicate header: {name}")));
            }
        }

        if self.host().is_none_or(str::is_empty) {
            return Err(Error::InvalidHandshake("missing Host header".into()));
        }
        if !self.headers.contains_token("Upgrade", "websocket") {
            return Err(Error::InvalidHandshake(
                "missing or invalid Upgrade header".into(),
            ));
        }
        if !self.headers.contains_token("Connection", "upgrade") {
            return Err(Error::InvalidHandshake(
                "missing or invalid Connection header".into(),
            ));
        }

        match self.headers.get("Sec-WebSocket-Version") {
            Some(WS_VERSION) => {}
            Some(other) => {
                return Err(Error::InvalidHandshake(format!(
                    "unsupported WebSocket version: {other} (expected 13)"
                )));
            }
            None => {
                return Err(Error::InvalidHandshake(
                    "missing Sec-WebSocket-Version header".into(),
                ));
            }
        }

        let key = self
            .headers
            .get("Sec-WebSocket-Key")
            .ok_or_else(|| Error::InvalidHandshake("missing Sec-WebSocket-Key header".into()))?;
        match BASE64.decode(key) {
            Ok(nonce) if nonce.len() == 16 => Ok(key),
            Ok(nonce) => Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Key must be 16 bytes, got {}",
                nonce.len()
            ))),
            Err(_) => Err(Error::InvalidHandshake(
                "Sec-WebSocket-Key is not valid base64".into(),
            )),
        }
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.headers.get("Host")
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.headers.get("Origin")
    }

    /// Subprotocols offered by the client, in preference order.
    #[must_use]
    pub fn subprotocols(&self) -> Vec<String> {
        self.headers.split_values("Sec-WebSocket-Protocol")
    }
}

/// Server response: status line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl HandshakeResponse {
    /// The `101 Switching Protocols` answer to a request carrying `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if `subprotocol` contains CR or LF.
    pub fn accept(key: &str, subprotocol: Option<&str>) -> Result<Self> {
        let mut headers = Headers::new();
        headers.append("Upgrade", "websocket")?;
        headers.append("Connection", "Upgrade")?;
        headers.append("Sec-WebSocket-Accept", compute_accept_key(key))?;
        if let Some(protocol) = subprotocol {
            headers.append("Sec-WebSocket-Protocol", protocol)?;
        }
        Ok(Self {
            status: 101,
            reason: "Switching Protocols".to_string(),
            headers,
        })
    }

    /// A refusal that ends the exchange, e.g. `403 Forbidden`.
    #[must_use]
    pub fn reject(status: u16, reason: &str) -> Self {
        let mut headers = Headers::new();
        headers.entries.push(("Connection".into(), "close".into()));
        headers.entries.push(("Content-Length".into(), "0".into()));
        if status == 400 || status == 426 {
            headers
                .entries
                .push(("Sec-WebSocket-Version".into(), WS_VERSION.into()));
        }
        Self {
            status,
            reason: reason.replace(['\r', '\n'], " "),
            headers,
        }
    }

    /// Serialize the response head, terminated by an empty line.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160);
        buf.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        self.headers.write_to(&mut buf);
        buf
    }

    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] for a malformed status line or header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (status_line, lines) = split_head(data)?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if version != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!(
                "invalid status line: {status_line}"
            )));
        }
        let status = parts
            .next()
            .filter(|code| code.len() == 3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::InvalidHandshake(format!("invalid status line: {status_line}")))?;
        let reason = parts.next().unwrap_or_default().to_string();

        Ok(Self {
            status,
            reason,
            headers: Headers::parse_lines(lines)?,
        })
    }

    /// Client-side checks against the request that produced `key`.
    ///
    /// Returns the subprotocol the server selected, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The status is not 101.
    /// - `Upgrade` / `Connection` do not confirm the upgrade.
    /// - `Sec-WebSocket-Accept` does not match the digest of `key`.
    /// - The selected subprotocol was not offered.
    pub fn verify(&self, key: &str, offered: &[String]) -> Result<Option<String>> {
        if self.status != 101 {
            return Err(Error::InvalidHandshake(format!(
                "server answered {} {} instead of 101 Switching Protocols",
                self.status, self.reason
            )));
        }
        if !self.headers.contains_token("Upgrade", "websocket") {
            return Err(Error::InvalidHandshake(
                "missing or invalid Upgrade header in response".into(),
            ));
        }
        if !self.headers.contains_token("Connection", "upgrade") {
            return Err(Error::InvalidHandshake(
                "missing or invalid Connection header in response".into(),
            ));
        }

        let expected = compute_accept_key(key);
        match self.headers.get("Sec-WebSocket-Accept") {
            Some(accept) if self.headers.count("Sec-WebSocket-Accept") == 1 && accept == expected => {}
            Some(_) => {
                return Err(Error::InvalidHandshake(
                    "Sec-WebSocket-Accept does not match the request key".into(),
                ));
            }
            None => {
                return Err(Error::InvalidHandshake(
                    "missing Sec-WebSocket-Accept header".into(),
                ));
            }
        }

        let selected = self.headers.split_values("Sec-WebSocket-Protocol");
        match selected.as_slice() {
            [] => Ok(None),
            [one] if offered.contains(one) => Ok(Some(one.clone())),
            [one] => Err(Error::InvalidHandshake(format!(
                "server selected subprotocol {one} which was not offered"
            ))),
            _ => Err(Error::InvalidHandshake(
                "server selected more than one subprotocol".into(),
            )),
        }
    }
}

/// A parsed `ws://` or `wss://` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUri {
    /// `wss://`
    pub secure: bool,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// Request target: path plus query, never empty.
    pub resource: String,
}

impl WsUri {
    /// Parse a WebSocket URI.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUri` if the URI is malformed.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::InvalidUri(format!("{uri}: {e}")))?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(Error::InvalidUri(format!("unsupported scheme: {other}"))),
        };
        if url.fragment().is_some() {
            return Err(Error::InvalidUri("fragments are not allowed".into()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(Error::InvalidUri("user info is not supported".into()));
        }

        let host = host_name(&url).ok_or_else(|| Error::InvalidUri(format!("missing host: {uri}")))?;
        let port = url.port_or_known_default().unwrap_or(default_port(secure));
        let resource = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };

        Ok(Self {
            secure,
            host,
            port,
            resource,
        })
    }

    /// Returns the Host header value.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = match self.host.parse::<Ipv6Addr>() {
            Ok(addr) => Host::<&str>::Ipv6(addr).to_string(),
            Err(_) => self.host.clone(),
        };
        if self.port == default_port(self.secure) {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Host of `url` without IPv6 brackets.
fn host_name(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Ipv6(addr) => Some(addr.to_string()),
        Host::Domain("") => None,
        host => Some(host.to_string()),
    }
}

/// 443 for secure connections, 80 otherwise.
#[must_use]
pub const fn default_port(secure: bool) -> u16 {
    if secure { 443 } else { 80 }
}

/// Split a `Host` header value into host and port (IPv6 literals in
/// brackets), applying the scheme's default port when none is given.
///
/// # Errors
///
/// Returns `Error::InvalidHandshake` for an empty host or an invalid port.
pub fn split_host_port(authority: &str, secure: bool) -> Result<(String, u16)> {
    let invalid = || Error::InvalidHandshake(format!("invalid host: {authority}"));

    if authority.is_empty() || authority.contains(['/', '?', '#', '@', '\\']) {
        return Err(invalid());
    }
    if authority.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let scheme = if secure { "wss" } else { "ws" };
    let url = Url::parse(&format!("{scheme}://{authority}")).map_err(|_| invalid())?;
    let host = host_name(&url).ok_or_else(invalid)?;
    let port = url.port_or_known_default().unwrap_or(default_port(secure));
    Ok((host, port))
}
