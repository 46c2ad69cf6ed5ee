//! The TCP channel to a single printer.

use std::{io::ErrorKind, time::Duration};

use bytes::{Bytes, BytesMut};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use slog::{debug, o, warn, Logger};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{Error, Result};

/// Default control port of FlashForge printers.
pub const DEFAULT_PORT: u16 = 8899;

/// Every reply ends with this sequence.
pub const TERMINAL_MARKER: &[u8] = b"ok\r\n";

const READ_CHUNK: usize = 4096;

/// How the end of a reply is detected.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, Display, FromStr)]
#[serde(rename_all = "kebab-case")]
#[display(style = "kebab-case")]
pub enum ReplyFraming {
    /// Keep reading until the buffer ends with [TERMINAL_MARKER].
    #[default]
    TerminalMarker,
    /// Treat whatever a single read returns as the whole reply.
    SingleRead,
}

/// Where a single exchange stops reading.
#[derive(Copy, Clone, Debug)]
enum ReplyEnd {
    Framed(ReplyFraming),
    Quiet,
}

/// Connection settings for a [Transport].
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Printer address.
    pub host: String,
    /// Printer control port.
    pub port: u16,
    /// Upper bound on the TCP handshake.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for each chunk of a reply.
    pub read_timeout: Duration,
    /// Reply boundary policy.
    pub framing: ReplyFraming,
    /// Replies larger than this are rejected.
    pub max_reply_bytes: usize,
}

impl TransportConfig {
    /// Settings for `host` with the protocol defaults.
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            framing: ReplyFraming::default(),
            max_reply_bytes: 64 * 1024,
        }
    }

    /// `host:port` string used for dialling and in diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One logical TCP connection to a printer.
///
/// Requests are strictly sequential: [Transport::request] takes `&mut self`,
/// so a second command cannot be written until the previous reply has been
/// read or has failed.
pub struct Transport {
    config: TransportConfig,
    stream: Option<TcpStream>,
    log: Logger,
}

impl Transport {
    /// Create a closed transport. Nothing is dialled until
    /// [Transport::connect] or the first [Transport::request].
    pub fn new(config: TransportConfig, log: Option<Logger>) -> Self {
        let log = log
            .unwrap_or_else(crate::discard_logger)
            .new(o!("printer" => config.addr()));

        Self {
            config,
            stream: None,
            log,
        }
    }

    /// The settings this transport dials with.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether a socket is currently held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the socket. Does nothing if it is already open.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.config.addr();
        let timeout = self.config.connect_timeout;
        debug!(self.log, "connecting"; "timeout_ms" => timeout.as_millis() as u64);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Err(_) => {
                debug!(self.log, "connect timed out");
                return Err(Error::ConnectTimeout { addr, timeout });
            }
            Ok(Err(source)) if source.kind() == ErrorKind::ConnectionRefused => {
                debug!(self.log, "connection refused");
                return Err(Error::ConnectRefused { addr, source });
            }
            Ok(Err(source)) => {
                debug!(self.log, "printer unreachable"; "error" => %source);
                return Err(Error::Unreachable { addr, source });
            }
            Ok(Ok(stream)) => stream,
        };

        // Commands are tiny; don't let Nagle hold them back.
        if let Err(err) = stream.set_nodelay(true) {
            warn!(self.log, "failed to set TCP_NODELAY"; "error" => %err);
        }

        self.stream = Some(stream);
        debug!(self.log, "connected");
        Ok(())
    }

    /// Close the socket if it is open.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
            debug!(self.log, "disconnected");
        }
    }

    /// Write `payload` and read the reply, connecting first if needed.
    ///
    /// The socket is moved out of `self` for the duration of the exchange
    /// and only put back once the reply is complete. Any failure, or the
    /// future being dropped mid-read, therefore leaves the transport closed
    /// and the next call reconnects.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.exchange(payload, ReplyEnd::Framed(self.config.framing)).await
    }

    /// Like [Transport::request], but keep reading past the terminal marker
    /// until the line stays quiet for the read timeout or the printer closes
    /// the stream.
    ///
    /// Used for replies that carry a payload after their `ok\r\n`, such as
    /// the file listing.
    pub async fn request_until_quiet(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.exchange(payload, ReplyEnd::Quiet).await
    }

    async fn exchange(&mut self, payload: &[u8], end: ReplyEnd) -> Result<Bytes> {
        self.connect().await?;

        let Some(mut stream) = self.stream.take() else {
            return Err(Error::Write(std::io::Error::from(ErrorKind::NotConnected)));
        };

        if let Err(err) = write_payload(&mut stream, payload).await {
            debug!(self.log, "write failed, closing"; "error" => %err);
            return Err(Error::Write(err));
        }

        let (reply, keep_open) = match self.read_reply(&mut stream, end).await {
            Ok(result) => result,
            Err(err) => {
                debug!(self.log, "read failed, closing"; "error" => %err);
                return Err(err);
            }
        };

        debug!(self.log, "reply received"; "bytes" => reply.len());
        if keep_open {
            self.stream = Some(stream);
        }

        Ok(reply)
    }

    /// Read one reply. The flag is false when the peer closed the stream,
    /// in which case the socket must not be reused.
    async fn read_reply(&self, stream: &mut TcpStream, end: ReplyEnd) -> Result<(Bytes, bool)> {
        let timeout = self.config.read_timeout;
        let limit = self.config.max_reply_bytes;
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        loop {
            let mut chunk = [0u8; READ_CHUNK];
            let n = match tokio::time::timeout(timeout, stream.read(&mut chunk)).await {
                Err(_) if buf.is_empty() => return Err(Error::ReadTimeout { timeout }),
                Err(_) => {
                    if let ReplyEnd::Framed(ReplyFraming::TerminalMarker) = end {
                        debug!(self.log, "reply ended without terminal marker"; "bytes" => buf.len());
                    }
                    return Ok((buf.freeze(), true));
                }
                Ok(Err(err)) => return Err(Error::Read(err)),
                Ok(Ok(n)) => n,
            };

            if n == 0 {
                if buf.is_empty() {
                    return Err(Error::Read(std::io::Error::from(ErrorKind::UnexpectedEof)));
                }
                debug!(self.log, "printer closed the connection after replying");
                return Ok((buf.freeze(), false));
            }

            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > limit {
                return Err(Error::ReplyOverflow { limit });
            }

            match end {
                ReplyEnd::Framed(ReplyFraming::SingleRead) => return Ok((buf.freeze(), true)),
                ReplyEnd::Framed(ReplyFraming::TerminalMarker) if buf.ends_with(TERMINAL_MARKER) => {
                    return Ok((buf.freeze(), true));
                }
                ReplyEnd::Framed(ReplyFraming::TerminalMarker) | ReplyEnd::Quiet => {}
            }
        }
    }
}

async fn write_payload(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Decode reply bytes as Latin-1. Every byte maps to exactly one char, so
/// nothing is ever dropped or replaced.
pub fn decode_reply(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    async fn listener() -> (TcpListener, TransportConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = TransportConfig::new("127.0.0.1");
        config.port = listener.local_addr().unwrap().port();
        config.read_timeout = Duration::from_millis(300);
        (listener, config)
    }

    #[test]
    fn test_framing_from_str() {
        assert_eq!("terminal-marker".parse::<ReplyFraming>().unwrap(), ReplyFraming::TerminalMarker);
        assert_eq!("single-read".parse::<ReplyFraming>().unwrap(), ReplyFraming::SingleRead);
        assert_eq!(ReplyFraming::SingleRead.to_string(), "single-read");
        assert!("both".parse::<ReplyFraming>().is_err());
    }

    #[test]
    fn test_decode_reply_latin1() {
        assert_eq!(decode_reply(b"T0:22/0\r\n"), "T0:22/0\r\n");
        assert_eq!(decode_reply(&[0x41, 0xa3, 0xe9]), "A\u{a3}\u{e9}");
    }

    #[tokio::test]
    async fn test_marker_framing_joins_split_reply() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M105 Received.\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            sock.write_all(b"T0:22/0 B:14/0\r\nok\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(config, None);
        let reply = transport.request(b"~M105\r\n").await.unwrap();
        assert_eq!(&reply[..], b"CMD M105 Received.\r\nT0:22/0 B:14/0\r\nok\r\n");
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_single_read_framing_stops_after_first_read() {
        let (listener, mut config) = listener().await;
        config.framing = ReplyFraming::SingleRead;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M105 Received.\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            sock.write_all(b"T0:22/0 B:14/0\r\nok\r\n").await.ok();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(config, None);
        let reply = transport.request(b"~M105\r\n").await.unwrap();
        assert_eq!(&reply[..], b"CMD M105 Received.\r\n");
    }

    #[tokio::test]
    async fn test_read_timeout_closes_transport() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut transport = Transport::new(config, None);
        let err = transport.request(b"~M119\r\n").await.unwrap_err();
        assert!(matches!(err, Error::ReadTimeout { .. }), "{err:?}");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_partial_reply_returned_on_quiet_line() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M26 Received.\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut transport = Transport::new(config, None);
        let reply = transport.request(b"~M26\r\n").await.unwrap();
        assert_eq!(&reply[..], b"CMD M26 Received.\r\n");
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_until_quiet_reads_past_marker() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M661 Received.\r\nok\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            sock.write_all(b"D\xaa\xaaD::\xa3\xa3\x00\x00\x00/data/a.gx").await.unwrap();

            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M119 Received.\r\nok\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(config, None);
        let reply = transport.request_until_quiet(b"~M661\r\n").await.unwrap();
        assert_eq!(
            &reply[..],
            b"CMD M661 Received.\r\nok\r\nD\xaa\xaaD::\xa3\xa3\x00\x00\x00/data/a.gx"
        );
        assert!(transport.is_open());

        // Nothing of the listing is left over for the next command.
        let reply = transport.request(b"~M119\r\n").await.unwrap();
        assert_eq!(&reply[..], b"CMD M119 Received.\r\nok\r\n");
    }

    #[tokio::test]
    async fn test_until_quiet_stops_when_printer_closes() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M661 Received.\r\nok\r\n/data/a.gx").await.unwrap();
        });

        let mut transport = Transport::new(config, None);
        let reply = transport.request_until_quiet(b"~M661\r\n").await.unwrap();
        assert_eq!(&reply[..], b"CMD M661 Received.\r\nok\r\n/data/a.gx");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_reply_overflow() {
        let (listener, mut config) = listener().await;
        config.max_reply_bytes = 16;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(&[b'x'; 64]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(config, None);
        let err = transport.request(b"~M661\r\n").await.unwrap_err();
        assert!(matches!(err, Error::ReplyOverflow { limit: 16 }), "{err:?}");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_request_reconnects_after_failure() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            // First connection is dropped without a reply.
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);

            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"CMD M27 Received.\r\nok\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(config, None);
        assert!(transport.request(b"~M27\r\n").await.is_err());
        assert!(!transport.is_open());

        let reply = transport.request(b"~M27\r\n").await.unwrap();
        assert_eq!(&reply[..], b"CMD M27 Received.\r\nok\r\n");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = portpicker::pick_unused_port().unwrap();
        let mut config = TransportConfig::new("127.0.0.1");
        config.port = port;

        let mut transport = Transport::new(config, None);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectRefused { .. }), "{err:?}");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut transport = Transport::new(config, None);
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_open());
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_open());
    }
}
