//! Request/response channel to the remote detection service.
//!
//! A send hands over one encoded image and returns a [`PendingDetection`]
//! that resolves exactly once, with the decoded batch or an error. The
//! WebSocket transport never reconnects: once the socket is gone the channel
//! stays `Closed`.

use std::{
    io::ErrorKind,
    net::TcpStream,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use thiserror::Error;
use tracing::{debug, info, warn};
use tungstenite::{Message, WebSocket, stream::MaybeTlsStream};

use crate::detection::{DetectionBatch, decode_response};

/// How often the socket thread wakes up to notice a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ChannelState {
    pub fn label(self) -> &'static str {
        match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closing => 2,
            ChannelState::Closed => 3,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("detection channel is not open")]
    NotOpen,
    #[error("detection channel closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("undecodable response: {0}")]
    Decode(String),
    #[error("detection service error: {0}")]
    Service(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

pub type DetectionResult = Result<DetectionBatch, ChannelError>;

/// Transport carrying encoded frames to the detection service.
pub trait DetectionChannel {
    fn state(&self) -> ChannelState;

    /// Start one request. Callers check [`DetectionChannel::state`] first; an
    /// `Err` here means no request was started.
    fn send(&self, image: Vec<u8>) -> Result<PendingDetection, ChannelError>;
}

/// Completion handle for one outstanding request.
pub struct PendingDetection {
    rx: Receiver<DetectionResult>,
    resolved: bool,
}

/// Producer half of a [`PendingDetection`].
pub struct Completer {
    tx: Sender<DetectionResult>,
}

impl Completer {
    pub fn complete(self, result: DetectionResult) {
        // The requester may have gone away; nothing left to notify then.
        let _ = self.tx.send(result);
    }
}

impl PendingDetection {
    pub fn new() -> (Completer, PendingDetection) {
        let (tx, rx) = bounded(1);
        (
            Completer { tx },
            PendingDetection {
                rx,
                resolved: false,
            },
        )
    }

    /// Non-blocking check. Yields the outcome once; a transport that dropped
    /// its [`Completer`] resolves as [`ChannelError::Closed`].
    pub fn poll(&mut self) -> Option<DetectionResult> {
        if self.resolved {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(ChannelError::Closed),
        };
        self.resolved = true;
        Some(result)
    }

    /// Blocking variant of [`PendingDetection::poll`].
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<DetectionResult> {
        if self.resolved {
            return None;
        }
        let result = match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        };
        self.resolved = true;
        Some(result)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

struct Request {
    image: Vec<u8>,
    completer: Completer,
}

struct Shared {
    state: AtomicU8,
    shutdown: AtomicBool,
}

impl Shared {
    fn set(&self, state: ChannelState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// WebSocket transport: images go out as binary messages and the next text
/// message is decoded as the reply.
pub struct WsDetectionChannel {
    shared: Arc<Shared>,
    requests: Mutex<Option<Sender<Request>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl WsDetectionChannel {
    /// Start connecting to `url` in the background. The channel reports
    /// `Connecting` until the handshake finishes.
    pub fn connect(url: &str) -> Result<Self, ChannelError> {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ChannelState::Connecting.as_u8()),
            shutdown: AtomicBool::new(false),
        });
        let (tx, rx) = unbounded();
        let url = url.to_string();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("detection-channel".into())
            .spawn(move || socket_loop(&url, rx, &worker_shared))
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        Ok(Self {
            shared,
            requests: Mutex::new(Some(tx)),
            worker: Some(worker),
        })
    }

    /// Close the socket and wait for the transport thread. An outstanding
    /// request resolves as [`ChannelError::Closed`].
    pub fn close(&mut self) {
        if self.shared.get() != ChannelState::Closed {
            self.shared.set(ChannelState::Closing);
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.take();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.shared.set(ChannelState::Closed);
    }
}

impl Drop for WsDetectionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl DetectionChannel for WsDetectionChannel {
    fn state(&self) -> ChannelState {
        self.shared.get()
    }

    fn send(&self, image: Vec<u8>) -> Result<PendingDetection, ChannelError> {
        if self.state() != ChannelState::Open {
            return Err(ChannelError::NotOpen);
        }
        let requests = self.requests.lock().map_err(|_| ChannelError::Closed)?;
        let sender = requests.as_ref().ok_or(ChannelError::Closed)?;
        let (completer, pending) = PendingDetection::new();
        sender
            .send(Request { image, completer })
            .map_err(|_| ChannelError::Closed)?;
        Ok(pending)
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn socket_loop(url: &str, requests: Receiver<Request>, shared: &Shared) {
    let mut socket = match tungstenite::connect(url) {
        Ok((socket, _response)) => socket,
        Err(err) => {
            warn!("detection service at {url} unreachable: {err}");
            shared.set(ChannelState::Closed);
            return;
        }
    };
    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        if let Err(err) = stream.set_read_timeout(Some(SHUTDOWN_POLL)) {
            warn!("failed to set socket read timeout: {err}");
        }
    }
    if shared.get() == ChannelState::Connecting {
        shared.set(ChannelState::Open);
    }
    info!("detection channel open to {url}");

    loop {
        let request = match requests.recv_timeout(SHUTDOWN_POLL) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => {
                if shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let Request { image, completer } = request;
        debug!(bytes = image.len(), "sending frame to detection service");
        if let Err(err) = socket.send(Message::binary(image)) {
            warn!("detection request failed: {err}");
            completer.complete(Err(ChannelError::Transport(err.to_string())));
            shared.set(ChannelState::Closed);
            return;
        }

        match read_reply(&mut socket, shared) {
            Reply::Result(result) => completer.complete(result),
            Reply::Lost(err) => {
                completer.complete(Err(err));
                break;
            }
        }
    }

    shared.set(ChannelState::Closing);
    let _ = socket.close(None);
    let _ = socket.flush();
    shared.set(ChannelState::Closed);
    debug!("detection channel closed");
}

enum Reply {
    /// The socket is still usable.
    Result(DetectionResult),
    /// The socket is gone; report and stop.
    Lost(ChannelError),
}

fn read_reply(socket: &mut Socket, shared: &Shared) -> Reply {
    loop {
        match socket.read() {
            Ok(Message::Text(text)) => return Reply::Result(decode_response(&text)),
            Ok(Message::Binary(_)) => {
                return Reply::Result(Err(ChannelError::Decode(
                    "unexpected binary message".into(),
                )));
            }
            Ok(Message::Close(frame)) => {
                info!("detection service closed the channel: {frame:?}");
                return Reply::Lost(ChannelError::Closed);
            }
            Ok(_) => continue,
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return Reply::Lost(ChannelError::Closed);
                }
            }
            Err(err) => {
                warn!("detection channel read failed: {err}");
                return Reply::Lost(ChannelError::Transport(err.to_string()));
            }
        }
    }
}
