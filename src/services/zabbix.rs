//! Host-agent (Zabbix) wire protocol: length-prefixed single-item
//! exchanges over TCP port 10050.

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default host-agent port.
pub const DEFAULT_AGENT_PORT: u16 = 10050;

/// Protocol magic: `"ZBXD"` plus the version byte.
pub const FRAME_HEADER: &[u8; 5] = b"ZBXD\x01";

const HEADER_LEN: usize = FRAME_HEADER.len() + 8;

/// Sentinel prefix of an unsupported-item response.
const NOT_SUPPORTED: &str = "ZBX_NOTSUPPORTED";

#[derive(Debug, Error)]
pub enum ZabbixError {
    #[error("response too short: {0} bytes")]
    Truncated(usize),

    #[error("incorrect frame header {0:?}")]
    BadHeader(Vec<u8>),

    #[error("response is not valid UTF-8")]
    BadEncoding,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame a payload: 5-byte magic, little-endian u64 length, payload bytes.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut frame = Vec::with_capacity(HEADER_LEN + bytes.len());
    frame.extend_from_slice(FRAME_HEADER);
    frame.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    frame.extend_from_slice(bytes);
    frame
}

/// Parse a framed response back into its UTF-8 payload.
pub fn decode_frame(frame: &[u8]) -> Result<String, ZabbixError> {
    if frame.len() < HEADER_LEN {
        return Err(ZabbixError::Truncated(frame.len()));
    }
    if &frame[0..FRAME_HEADER.len()] != FRAME_HEADER {
        return Err(ZabbixError::BadHeader(frame[0..FRAME_HEADER.len()].to_vec()));
    }
    String::from_utf8(frame[HEADER_LEN..].to_vec()).map_err(|_| ZabbixError::BadEncoding)
}

/// Interpret one agent payload as a numeric metric value.
///
/// Integers and floats parse to a number; the `ZBX_NOTSUPPORTED` sentinel
/// (NUL-separated message) and anything else non-numeric become `None`.
pub fn parse_value(payload: &str) -> Option<f64> {
    let trimmed = payload.trim_end_matches('\n');
    if let Ok(int) = trimmed.parse::<i64>() {
        #[allow(clippy::cast_precision_loss)]
        return Some(int as f64);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        return Some(float);
    }
    if trimmed.starts_with(NOT_SUPPORTED) {
        let err_text = trimmed.split('\0').nth(1).unwrap_or("");
        tracing::warn!(error = err_text, "host agent item not supported");
    }
    None
}

/// One host-agent peer.
pub struct ZabbixClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ZabbixClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_AGENT_PORT,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// One TCP exchange for one item key; `None` on any failure.
    pub async fn fetch_item(&self, key: &str) -> Option<f64> {
        match self.exchange(key).await {
            Ok(payload) => {
                tracing::debug!(item = key, value = %payload.trim_end(), "host agent item");
                parse_value(&payload)
            }
            Err(err) => {
                tracing::error!(host = %self.host, item = key, error = %err,
                    "failed to query host agent");
                None
            }
        }
    }

    /// Fetch a set of item keys, one exchange per key.
    pub async fn fetch_items(&self, keys: &[String]) -> BTreeMap<String, Option<f64>> {
        let mut values = BTreeMap::new();
        for key in keys {
            values.insert(key.clone(), self.fetch_item(key).await);
        }
        values
    }

    async fn exchange(&self, key: &str) -> Result<String, ZabbixError> {
        let exchange = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            let request = encode_frame(&format!("{key}\n"));
            stream.write_all(&request).await?;

            // one-shot read: agent responses for single items fit in one frame
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await?;
            decode_frame(&buf[..n])
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                ZabbixError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "host agent timed out",
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        for key in ["system.uptime", "vfs.fs.size[/,total]", "net.tcp.port[,8080]"] {
            let decoded = decode_frame(&encode_frame(key)).unwrap();
            assert_eq!(decoded, key);
        }
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode_frame("ab");
        assert_eq!(&frame[0..5], b"ZBXD\x01");
        assert_eq!(frame[5..13], 2u64.to_le_bytes());
        assert_eq!(&frame[13..], b"ab");
    }

    #[test]
    fn test_decode_rejects_wrong_header() {
        let mut frame = encode_frame("x");
        frame[0] = b'Y';
        assert!(matches!(decode_frame(&frame), Err(ZabbixError::BadHeader(_))));
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(matches!(decode_frame(b"ZBXD"), Err(ZabbixError::Truncated(4))));
    }

    #[test]
    fn test_parse_numeric_values() {
        assert_eq!(parse_value("1024\n"), Some(1024.0));
        assert_eq!(parse_value("0.25"), Some(0.25));
    }

    #[test]
    fn test_parse_not_supported_is_none() {
        assert_eq!(parse_value("ZBX_NOTSUPPORTED\0unknown item"), None);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert_eq!(parse_value("whatever"), None);
    }
}
