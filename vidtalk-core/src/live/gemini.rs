//! Gemini Live over a blocking tungstenite WebSocket.
//!
//! One worker thread per connection owns the socket. It writes the `setup`
//! message, waits for `setupComplete`, reports `Opened`, then alternates
//! between writing queued microphone audio and polling for server frames
//! with a short read timeout.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};
use tungstenite::{stream::MaybeTlsStream, Message, WebSocket};
use url::Url;

use super::transport::{DuplexTransport, LiveConnection, LiveSetup, OutboundMessage, TransportEvent};
use crate::{
    error::{Result, VidtalkError},
    protocol::{RealtimeInputMessage, ServerMessage},
};

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Socket read/write timeout while the TLS and WebSocket handshakes run.
const HANDSHAKE_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a close handshake may take before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct GeminiLiveConfig {
    /// `wss://` in production; `ws://` is accepted for local servers.
    pub endpoint: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    /// Maximum wait for `setupComplete` after the setup message is sent.
    pub setup_timeout: Duration,
    /// Read timeout between outbound drains.
    pub poll_interval: Duration,
}

impl Default for GeminiLiveConfig {
    fn default() -> Self {
        Self {
            endpoint: LIVE_ENDPOINT.to_string(),
            api_key: String::new(),
            connect_timeout: Duration::from_secs(10),
            setup_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    config: GeminiLiveConfig,
}

impl GeminiLiveTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(GeminiLiveConfig {
            api_key: api_key.into(),
            ..GeminiLiveConfig::default()
        })
    }

    pub fn with_config(config: GeminiLiveConfig) -> Self {
        Self { config }
    }

    /// The key travels as a form-encoded `key` query parameter.
    fn request_url(&self, mut endpoint: Url) -> String {
        if !self.config.api_key.is_empty() {
            endpoint
                .query_pairs_mut()
                .append_pair("key", &self.config.api_key);
        }
        endpoint.into()
    }
}

impl DuplexTransport for GeminiLiveTransport {
    fn connect(&self, setup: &LiveSetup, events: Sender<TransportEvent>) -> Result<LiveConnection> {
        let url = Url::parse(&self.config.endpoint)
            .map_err(|e| VidtalkError::Connection(format!("invalid live endpoint: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(VidtalkError::Connection(format!(
                "unsupported live endpoint scheme: {}",
                url.scheme()
            )));
        }

        let setup_json = serde_json::to_string(&setup.to_message())?;
        let (outbound_tx, outbound_rx) = unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            config: self.config.clone(),
            request_url: self.request_url(url.clone()),
            setup_json,
            outbound: outbound_rx,
            events,
            cancelled: Arc::clone(&cancelled),
        };

        info!(
            host = url.host_str().unwrap_or_default(),
            model = %setup.model,
            voice = %setup.voice,
            "opening live connection"
        );

        std::thread::Builder::new()
            .name("vidtalk-live-ws".into())
            .spawn(move || worker.run())
            .map_err(VidtalkError::Io)?;

        Ok(LiveConnection::new(outbound_tx, cancelled))
    }
}

/// How a connection ended without an error.
enum Ending {
    /// Closed on our side (cancel, close request, or session gone).
    Local,
    /// The server sent a close frame or dropped the stream.
    Remote(Option<String>),
}

struct Worker {
    config: GeminiLiveConfig,
    request_url: String,
    setup_json: String,
    outbound: Receiver<OutboundMessage>,
    events: Sender<TransportEvent>,
    cancelled: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        match self.session() {
            Ok(Ending::Local) => debug!("live connection closed locally"),
            Ok(Ending::Remote(reason)) => {
                info!(reason = reason.as_deref().unwrap_or(""), "live connection closed by server");
                if !self.is_cancelled() {
                    let _ = self.events.send(TransportEvent::Closed { reason });
                }
            }
            Err(e) if self.is_cancelled() => debug!("live connection error after cancel: {e}"),
            Err(e) => {
                warn!("live connection failed: {e}");
                let _ = self.events.send(TransportEvent::Error(e.to_string()));
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn session(&self) -> Result<Ending> {
        let mut socket = open_socket(&self.request_url, &self.config)?;
        if self.is_cancelled() {
            close_socket(&mut socket);
            return Ok(Ending::Local);
        }

        socket
            .send(Message::text(self.setup_json.clone()))
            .map_err(ws_error)?;
        set_read_timeout(&mut socket, self.config.poll_interval)?;

        if let Some(ending) = self.await_setup(&mut socket)? {
            return Ok(ending);
        }
        if self.events.send(TransportEvent::Opened).is_err() {
            close_socket(&mut socket);
            return Ok(Ending::Local);
        }
        debug!("live setup acknowledged");

        loop {
            if let Some(ending) = self.drain_outbound(&mut socket)? {
                return Ok(ending);
            }

            let delivered = match socket.read() {
                Ok(Message::Text(text)) => self.forward(text.as_str()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => self.forward(text),
                    Err(_) => {
                        warn!(bytes = data.len(), "ignoring non-UTF-8 binary frame");
                        true
                    }
                },
                Ok(Message::Close(frame)) => {
                    return Ok(Ending::Remote(frame.map(|f| f.reason.as_str().to_string())));
                }
                Ok(_) => true,
                Err(e) if is_timeout(&e) => true,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(Ending::Remote(None));
                }
                Err(e) => return Err(ws_error(e)),
            };

            if !delivered {
                close_socket(&mut socket);
                return Ok(Ending::Local);
            }
        }
    }

    /// Returns `Some` if the attempt ended before the server acknowledged.
    fn await_setup(&self, socket: &mut Socket) -> Result<Option<Ending>> {
        let deadline = Instant::now() + self.config.setup_timeout;
        loop {
            if self.is_cancelled() {
                close_socket(socket);
                return Ok(Some(Ending::Local));
            }

            let frame = match socket.read() {
                Ok(Message::Text(text)) => Some(text.as_str().to_string()),
                Ok(Message::Binary(data)) => std::str::from_utf8(&data).ok().map(str::to_string),
                Ok(Message::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                    return Err(VidtalkError::Connection(format!(
                        "server closed during setup: {reason}"
                    )));
                }
                Ok(_) => None,
                Err(e) if is_timeout(&e) => {
                    if Instant::now() >= deadline {
                        return Err(VidtalkError::Connection(format!(
                            "setup not acknowledged within {:?}",
                            self.config.setup_timeout
                        )));
                    }
                    None
                }
                Err(e) => return Err(ws_error(e)),
            };

            let Some(text) = frame else { continue };
            match ServerMessage::parse(&text) {
                Ok(msg) if msg.is_setup_complete() => return Ok(None),
                Ok(ServerMessage { error: Some(err), .. }) => {
                    return Err(VidtalkError::Connection(format!(
                        "setup rejected ({}): {}",
                        err.code, err.message
                    )));
                }
                Ok(_) => debug!("ignoring message before setupComplete"),
                Err(e) => warn!("{e}"),
            }
        }
    }

    /// Write everything queued. Returns `Some` once the connection should end.
    fn drain_outbound(&self, socket: &mut Socket) -> Result<Option<Ending>> {
        loop {
            match self.outbound.try_recv() {
                Ok(OutboundMessage::Audio(chunk)) => {
                    let msg = RealtimeInputMessage::audio(chunk.mime_type.as_str(), chunk.to_transport_text());
                    socket
                        .send(Message::text(serde_json::to_string(&msg)?))
                        .map_err(ws_error)?;
                }
                Ok(OutboundMessage::Close) | Err(TryRecvError::Disconnected) => {
                    close_socket(socket);
                    return Ok(Some(Ending::Local));
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if self.is_cancelled() {
            close_socket(socket);
            return Ok(Some(Ending::Local));
        }
        Ok(None)
    }

    /// Parse and pass on one server frame. Returns `false` if the session
    /// has stopped listening.
    fn forward(&self, text: &str) -> bool {
        match ServerMessage::parse(text) {
            Ok(msg) => {
                if msg.go_away.is_some() {
                    warn!("server announced an upcoming disconnect");
                }
                if let Some(err) = &msg.error {
                    return self
                        .events
                        .send(TransportEvent::Error(format!("server error ({}): {}", err.code, err.message)))
                        .is_ok();
                }
                self.events.send(TransportEvent::Message(msg)).is_ok()
            }
            Err(e) => {
                warn!("{e}");
                true
            }
        }
    }
}

fn open_socket(request_url: &str, config: &GeminiLiveConfig) -> Result<Socket> {
    let url = Url::parse(request_url)
        .map_err(|e| VidtalkError::Connection(format!("invalid live endpoint: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| VidtalkError::Connection("live endpoint has no host".into()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| VidtalkError::Connection("live endpoint has no port".into()))?;

    let addr = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| VidtalkError::Connection(format!("resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| VidtalkError::Connection(format!("failed to resolve {host}")))?;

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| VidtalkError::Connection(format!("connect {host}:{port}: {e}")))?;
    tcp.set_read_timeout(Some(HANDSHAKE_IO_TIMEOUT))?;
    tcp.set_write_timeout(Some(HANDSHAKE_IO_TIMEOUT))?;
    tcp.set_nodelay(true)?;

    let stream = match url.scheme() {
        "wss" => {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| VidtalkError::Connection(format!("tls init: {e}")))?;
            let tls = connector
                .connect(&host, tcp)
                .map_err(|e| VidtalkError::Connection(format!("tls handshake with {host}: {e}")))?;
            MaybeTlsStream::NativeTls(tls)
        }
        "ws" => MaybeTlsStream::Plain(tcp),
        other => {
            return Err(VidtalkError::Connection(format!(
                "unsupported live endpoint scheme: {other}"
            )))
        }
    };

    let (socket, response) = tungstenite::client::client(request_url, stream)
        .map_err(|e| VidtalkError::Connection(format!("websocket handshake with {host}: {e}")))?;
    debug!(host, status = response.status().as_u16(), "live socket connected");
    Ok(socket)
}

fn set_read_timeout(socket: &mut Socket, timeout: Duration) -> io::Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(Some(timeout)),
        MaybeTlsStream::NativeTls(s) => s.get_mut().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

/// Send a close frame and give the server a moment to answer it.
fn close_socket(socket: &mut Socket) {
    if socket.close(None).is_err() {
        return;
    }
    let deadline = Instant::now() + CLOSE_GRACE;
    while Instant::now() < deadline {
        match socket.read() {
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(_) => break,
        }
    }
}

fn is_timeout(e: &tungstenite::Error) -> bool {
    matches!(
        e,
        tungstenite::Error::Io(io) if matches!(io.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
    )
}

fn ws_error(e: tungstenite::Error) -> VidtalkError {
    VidtalkError::Connection(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_appends_key_only_when_set() {
        let endpoint = || Url::parse(LIVE_ENDPOINT).unwrap();
        let keyed = GeminiLiveTransport::new("abc");
        assert_eq!(keyed.request_url(endpoint()), format!("{LIVE_ENDPOINT}?key=abc"));

        let local = GeminiLiveTransport::with_config(GeminiLiveConfig {
            endpoint: "ws://127.0.0.1:9/live".into(),
            ..GeminiLiveConfig::default()
        });
        assert_eq!(
            local.request_url(Url::parse("ws://127.0.0.1:9/live").unwrap()),
            "ws://127.0.0.1:9/live"
        );
    }

    #[test]
    fn request_url_encodes_reserved_key_characters() {
        let transport = GeminiLiveTransport::new("a+b/c=&d e");
        let url = transport.request_url(Url::parse(LIVE_ENDPOINT).unwrap());
        assert!(url.ends_with("?key=a%2Bb%2Fc%3D%26d+e"), "{url}");

        let parsed = Url::parse(&url).unwrap();
        let key: Vec<_> = parsed.query_pairs().filter(|(k, _)| k == "key").map(|(_, v)| v.into_owned()).collect();
        assert_eq!(key, vec!["a+b/c=&d e".to_string()]);
    }

    #[test]
    fn rejects_non_websocket_endpoint_before_io() {
        let transport = GeminiLiveTransport::with_config(GeminiLiveConfig {
            endpoint: "https://example.com/live".into(),
            ..GeminiLiveConfig::default()
        });
        let (tx, _rx) = unbounded();
        let setup = LiveSetup {
            model: "m".into(),
            voice: "Puck".into(),
            system_instruction: String::new(),
        };
        assert!(matches!(
            transport.connect(&setup, tx),
            Err(VidtalkError::Connection(_))
        ));
    }
}
