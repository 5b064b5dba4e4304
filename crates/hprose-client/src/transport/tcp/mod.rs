//! TCP transports and their framing.
//!
//! # Wire Format
//!
//! Half-duplex connections carry one request at a time:
//!
//! ```text
//! [u32 BE length][payload]
//! ```
//!
//! Full-duplex connections pipeline requests and tag each one with an id;
//! the high bit of the length word marks the id-carrying header:
//!
//! ```text
//! [u32 BE length | 0x80000000][u32 BE request id][payload]
//! ```

use std::io;
use std::net::SocketAddr;

use hprose_common::{HproseError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub mod duplex;
pub mod pool;

pub use duplex::FullDuplexTransport;
pub use pool::HalfDuplexTransport;

/// Frames larger than this are rejected instead of allocated.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const DUPLEX_FLAG: u32 = 0x8000_0000;

/// Sends a message with a length prefix.
pub async fn send_message<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
    let len = frame_len(data)?;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    stream
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;
    stream
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;
    Ok(())
}

/// Receives a message with a length prefix.
pub async fn receive_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| map_io_error(e, "reading length prefix"))?;
    let len = checked_len(u32::from_be_bytes(len_buf))?;

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;
    Ok(buf)
}

/// Builds a full-duplex frame in one buffer so it goes out in a single write.
pub fn encode_duplex_frame(id: u32, data: &[u8]) -> Result<Vec<u8>> {
    let len = frame_len(data)?;
    let mut frame = Vec::with_capacity(8 + data.len());
    frame.extend_from_slice(&(len | DUPLEX_FLAG).to_be_bytes());
    frame.extend_from_slice(&id.to_be_bytes());
    frame.extend_from_slice(data);
    Ok(frame)
}

/// Receives a full-duplex frame, returning its id and payload.
pub async fn receive_duplex_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<(u32, Vec<u8>)> {
    let mut header = [0u8; 8];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| map_io_error(e, "reading frame header"))?;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if len & DUPLEX_FLAG == 0 {
        return Err(HproseError::Protocol(
            "frame header is missing the full-duplex flag".into(),
        ));
    }
    let len = checked_len(len & !DUPLEX_FLAG)?;

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;
    Ok((id, buf))
}

fn frame_len(data: &[u8]) -> Result<u32> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(HproseError::Protocol(format!(
            "Message too large: {} bytes (max {} bytes)",
            data.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    Ok(data.len() as u32)
}

fn checked_len(len: u32) -> Result<usize> {
    let len = len as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(HproseError::Protocol(format!(
            "Message too large: {} bytes (max {} bytes)",
            len, MAX_MESSAGE_SIZE
        )));
    }
    Ok(len)
}

/// Maps I/O errors onto the retryable transport variants.
pub(crate) fn map_io_error(err: io::Error, context: &str) -> HproseError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => {
            HproseError::Transport(format!("{}: connection lost", context))
        }
        _ => HproseError::from(err),
    }
}

/// Splits `tcp://host:port[/path]` into its scheme and `host:port`.
pub fn parse_tcp_uri(uri: &str) -> Result<(String, String)> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| HproseError::Configuration(format!("invalid uri '{}'", uri)))?;
    let scheme = scheme.to_ascii_lowercase();
    if !matches!(scheme.as_str(), "tcp" | "tcp4" | "tcp6") {
        return Err(HproseError::Configuration(format!(
            "'{}' is not a tcp uri",
            uri
        )));
    }
    let addr = rest.split('/').next().unwrap_or_default();
    if addr.is_empty() {
        return Err(HproseError::Configuration(format!(
            "'{}' has no address",
            uri
        )));
    }
    Ok((scheme, addr.to_string()))
}

/// Connects to a tcp uri, restricting resolution to IPv4 or IPv6 for the
/// `tcp4` and `tcp6` schemes.
pub async fn connect(uri: &str, no_delay: bool) -> Result<TcpStream> {
    let (scheme, addr) = parse_tcp_uri(uri)?;
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host(addr.as_str())
        .await
        .map_err(|e| HproseError::Transport(format!("Invalid address '{}': {}", addr, e)))?
        .filter(|sa| match scheme.as_str() {
            "tcp4" => sa.is_ipv4(),
            "tcp6" => sa.is_ipv6(),
            _ => true,
        })
        .collect();

    let mut last_err = None;
    for socket_addr in resolved {
        match TcpStream::connect(socket_addr).await {
            Ok(stream) => {
                stream.set_nodelay(no_delay)?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(HproseError::Transport(format!(
        "Failed to connect to {}: {}",
        uri,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no usable address".to_string())
    )))
}
