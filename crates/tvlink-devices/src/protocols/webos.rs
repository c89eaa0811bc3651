/*!
 * webOS pointer socket adapter.
 *
 * The pointer socket is a persistent connection carrying fire-and-forget
 * text frames. There are no replies; a command succeeds once its frame has
 * been written. Frames are written in submission order by a single writer
 * task.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use tvlink_core::{config::WebOsConfig, types::Value};

use crate::capability::{AdapterKind, CapabilitySet};
use crate::device::{DeviceError, DeviceInfo, Result};
use crate::keys::Key;
use crate::protocol::{AdapterLink, AdapterProvider, CommandId, ProtocolAdapter};
use crate::request::Request;

/// A pointer socket button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WebOsButton {
    Home = 1000,
    Back = 1001,
    Up = 1002,
    Down = 1003,
    Left = 1004,
    Right = 1005,
    Enter = 1006,
    Menu = 1007,
    Info = 1008,
    Exit = 1009,
    Num0 = 1010,
    Num1 = 1011,
    Num2 = 1012,
    Num3 = 1013,
    Num4 = 1014,
    Num5 = 1015,
    Num6 = 1016,
    Num7 = 1017,
    Num8 = 1018,
    Num9 = 1019,
    ClosedCaptions = 1020,
    List = 1021,
}

impl WebOsButton {
    /// Every button, in code order
    pub const ALL: [WebOsButton; 22] = [
        WebOsButton::Home,
        WebOsButton::Back,
        WebOsButton::Up,
        WebOsButton::Down,
        WebOsButton::Left,
        WebOsButton::Right,
        WebOsButton::Enter,
        WebOsButton::Menu,
        WebOsButton::Info,
        WebOsButton::Exit,
        WebOsButton::Num0,
        WebOsButton::Num1,
        WebOsButton::Num2,
        WebOsButton::Num3,
        WebOsButton::Num4,
        WebOsButton::Num5,
        WebOsButton::Num6,
        WebOsButton::Num7,
        WebOsButton::Num8,
        WebOsButton::Num9,
        WebOsButton::ClosedCaptions,
        WebOsButton::List,
    ];

    /// Protocol key code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Button for a protocol key code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|button| button.code() == code)
    }

    /// Name written in button frames
    pub fn wire_name(self) -> &'static str {
        match self {
            WebOsButton::Home => "HOME",
            WebOsButton::Back => "BACK",
            WebOsButton::Up => "UP",
            WebOsButton::Down => "DOWN",
            WebOsButton::Left => "LEFT",
            WebOsButton::Right => "RIGHT",
            WebOsButton::Enter => "ENTER",
            WebOsButton::Menu => "MENU",
            WebOsButton::Info => "INFO",
            WebOsButton::Exit => "EXIT",
            WebOsButton::Num0 => "0",
            WebOsButton::Num1 => "1",
            WebOsButton::Num2 => "2",
            WebOsButton::Num3 => "3",
            WebOsButton::Num4 => "4",
            WebOsButton::Num5 => "5",
            WebOsButton::Num6 => "6",
            WebOsButton::Num7 => "7",
            WebOsButton::Num8 => "8",
            WebOsButton::Num9 => "9",
            WebOsButton::ClosedCaptions => "CC",
            WebOsButton::List => "LIST",
        }
    }
}

impl From<Key> for WebOsButton {
    fn from(key: Key) -> Self {
        match key {
            Key::Up => WebOsButton::Up,
            Key::Down => WebOsButton::Down,
            Key::Left => WebOsButton::Left,
            Key::Right => WebOsButton::Right,
            Key::Ok => WebOsButton::Enter,
            Key::Back => WebOsButton::Back,
            Key::Home => WebOsButton::Home,
            Key::Menu => WebOsButton::Menu,
            Key::Info => WebOsButton::Info,
            Key::Exit => WebOsButton::Exit,
            Key::Num0 => WebOsButton::Num0,
            Key::Num1 => WebOsButton::Num1,
            Key::Num2 => WebOsButton::Num2,
            Key::Num3 => WebOsButton::Num3,
            Key::Num4 => WebOsButton::Num4,
            Key::Num5 => WebOsButton::Num5,
            Key::Num6 => WebOsButton::Num6,
            Key::Num7 => WebOsButton::Num7,
            Key::Num8 => WebOsButton::Num8,
            Key::Num9 => WebOsButton::Num9,
            Key::ClosedCaptions => WebOsButton::ClosedCaptions,
            Key::List => WebOsButton::List,
        }
    }
}

/// A frame on the pointer socket
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerFrame {
    /// Button press
    Button(WebOsButton),
    /// Relative pointer move
    Move {
        /// Horizontal offset
        dx: f64,
        /// Vertical offset
        dy: f64,
    },
    /// Scroll
    Scroll {
        /// Horizontal offset
        dx: f64,
        /// Vertical offset
        dy: f64,
    },
    /// Click at the pointer position
    Click,
}

impl PointerFrame {
    /// Frame carrying a request
    pub fn from_request(request: &Request) -> Result<Self> {
        match request {
            Request::Key(key) => Ok(PointerFrame::Button((*key).into())),
            Request::SendKeyCode(code) => WebOsButton::from_code(*code)
                .map(PointerFrame::Button)
                .ok_or_else(|| DeviceError::invalid_argument(format!("unknown key code {}", code))),
            Request::PointerMove { dx, dy } => Ok(PointerFrame::Move { dx: *dx, dy: *dy }),
            Request::PointerScroll { dx, dy } => Ok(PointerFrame::Scroll { dx: *dx, dy: *dy }),
            Request::PointerClick => Ok(PointerFrame::Click),
            other => Err(DeviceError::unsupported(other.group(), other.operation())),
        }
    }

    /// Text encoding of the frame
    pub fn encode(&self) -> String {
        match self {
            PointerFrame::Button(button) => format!("type:button\nname:{}\n\n", button.wire_name()),
            PointerFrame::Move { dx, dy } => format!("type:move\ndx:{}\ndy:{}\ndown:0\n\n", dx, dy),
            PointerFrame::Scroll { dx, dy } => format!("type:scroll\ndx:{}\ndy:{}\n\n", dx, dy),
            PointerFrame::Click => "type:click\n\n".to_string(),
        }
    }
}

/// Writing half of an open pointer socket
#[async_trait]
pub trait PointerSink: Send + fmt::Debug {
    /// Write one text frame
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Close the socket
    async fn close(&mut self) -> Result<()>;
}

/// An open pointer socket
#[derive(Debug)]
pub struct PointerSocket {
    /// Writing half
    pub sink: Box<dyn PointerSink>,
    /// Resolves with a reason once the device closes the socket
    pub closed: oneshot::Receiver<String>,
}

/// Opens pointer sockets
#[async_trait]
pub trait PointerConnector: Send + Sync + fmt::Debug {
    /// Open the socket at `url`
    async fn open(&self, url: &str) -> Result<PointerSocket>;
}

/// Pointer connector over a websocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

mod websocket {
    use futures::stream::SplitSink;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;

    type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    pub(super) struct WebSocketSink {
        sink: SplitSink<Stream, Message>,
    }

    impl fmt::Debug for WebSocketSink {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("WebSocketSink").finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl PointerSink for WebSocketSink {
        async fn send(&mut self, frame: String) -> Result<()> {
            self.sink
                .send(Message::Text(frame))
                .await
                .map_err(|e| DeviceError::session_lost(e.to_string()))
        }

        async fn close(&mut self) -> Result<()> {
            self.sink
                .close()
                .await
                .map_err(|e| DeviceError::session_lost(e.to_string()))
        }
    }

    #[async_trait]
    impl PointerConnector for WebSocketConnector {
        async fn open(&self, url: &str) -> Result<PointerSocket> {
            let (stream, _) = connect_async(url)
                .await
                .map_err(|e| DeviceError::ConnectFailed(format!("{}: {}", url, e)))?;
            let (sink, mut source) = stream.split();
            let (closed_tx, closed) = oneshot::channel();

            tokio::spawn(async move {
                let reason = loop {
                    match source.next().await {
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| f.reason.to_string())
                                .filter(|reason| !reason.is_empty())
                                .unwrap_or_else(|| "pointer socket closed by device".to_string());
                        }
                        Some(Ok(message)) => trace!("Ignoring pointer socket message: {:?}", message),
                        Some(Err(e)) => break e.to_string(),
                        None => break "pointer socket closed".to_string(),
                    }
                };
                let _ = closed_tx.send(reason);
            });

            Ok(PointerSocket {
                sink: Box::new(WebSocketSink { sink }),
                closed,
            })
        }
    }
}

/// URL of a device's pointer socket
pub fn socket_url(info: &DeviceInfo, config: &WebOsConfig) -> String {
    match &info.service_url {
        Some(url) => url.clone(),
        None => format!("ws://{}:{}{}", info.address, config.pointer_port, config.pointer_path),
    }
}

enum WriterCommand {
    Frame { id: CommandId, frame: String },
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
struct PointerConnection {
    commands: mpsc::UnboundedSender<WriterCommand>,
    // Set once teardown starts; queued frames are dropped from then on.
    closing: Arc<AtomicBool>,
    writer: JoinHandle<()>,
}

fn closed_reason(received: std::result::Result<String, oneshot::error::RecvError>) -> String {
    received.unwrap_or_else(|_| "pointer socket closed".to_string())
}

async fn run_writer(
    socket: PointerSocket,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    closing: Arc<AtomicBool>,
    link: AdapterLink,
) {
    let PointerSocket {
        mut sink,
        mut closed,
    } = socket;

    loop {
        let command = tokio::select! {
            biased;
            reason = &mut closed => {
                link.lost(closed_reason(reason));
                return;
            }
            command = commands.recv() => command,
        };

        match command {
            Some(WriterCommand::Frame { id, .. }) if closing.load(Ordering::SeqCst) => {
                trace!(device = %link.device_id(), command = %id, "Dropping frame queued before teardown");
            }
            Some(WriterCommand::Frame { id, frame }) => {
                let written = tokio::select! {
                    biased;
                    reason = &mut closed => {
                        link.lost(closed_reason(reason));
                        return;
                    }
                    written = sink.send(frame) => written,
                };
                match written {
                    Ok(()) => link.succeed(id, Value::Null),
                    Err(e) => {
                        warn!(device = %link.device_id(), command = %id, "Pointer socket write failed: {}", e);
                        link.lost(format!("pointer socket write failed: {}", e));
                        return;
                    }
                }
            }
            Some(WriterCommand::Shutdown(done)) => {
                if let Err(e) = sink.close().await {
                    debug!(device = %link.device_id(), "Closing the pointer socket failed: {}", e);
                }
                let _ = done.send(());
                return;
            }
            None => {
                let _ = sink.close().await;
                return;
            }
        }
    }
}

/// Protocol adapter for the webOS pointer socket
#[derive(Debug)]
pub struct WebOsPointerAdapter {
    connector: Arc<dyn PointerConnector>,
    config: WebOsConfig,
    connection: Mutex<Option<PointerConnection>>,
}

impl WebOsPointerAdapter {
    /// Create an adapter opening sockets through `connector`
    pub fn new(connector: Arc<dyn PointerConnector>, config: WebOsConfig) -> Self {
        Self {
            connector,
            config,
            connection: Mutex::new(None),
        }
    }

    /// Whether the socket is open
    pub fn is_open(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map_or(false, |c| !c.commands.is_closed())
    }
}

#[async_trait]
impl ProtocolAdapter for WebOsPointerAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::WebOsPointer
    }

    async fn connect(&self, info: &DeviceInfo, link: AdapterLink) -> Result<Option<CapabilitySet>> {
        let url = socket_url(info, &self.config);
        let socket = self.connector.open(&url).await?;

        let (commands, rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let writer = tokio::spawn(run_writer(socket, rx, closing.clone(), link));
        info!(device = %info.id, %url, "Pointer socket open");

        let previous = self.connection.lock().replace(PointerConnection {
            commands,
            closing,
            writer,
        });
        if let Some(previous) = previous {
            previous.writer.abort();
        }
        Ok(None)
    }

    fn transmit(&self, id: CommandId, request: &Request) -> Result<()> {
        let frame = PointerFrame::from_request(request)?.encode();

        let connection = self.connection.lock();
        let connection = connection
            .as_ref()
            .ok_or_else(|| DeviceError::session_lost("pointer socket not open"))?;
        connection
            .commands
            .send(WriterCommand::Frame { id, frame })
            .map_err(|_| DeviceError::session_lost("pointer socket writer stopped"))
    }

    fn quiesce(&self) {
        if let Some(connection) = self.connection.lock().as_ref() {
            connection.closing.store(true, Ordering::SeqCst);
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };
        connection.closing.store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = oneshot::channel();
        if connection.commands.send(WriterCommand::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        debug!("Pointer socket closed");
        Ok(())
    }
}

/// Provider building webOS pointer socket adapters
#[derive(Debug, Clone)]
pub struct WebOsPointerProvider {
    connector: Arc<dyn PointerConnector>,
    config: WebOsConfig,
}

impl WebOsPointerProvider {
    /// Create a provider opening sockets through `connector`
    pub fn new(connector: Arc<dyn PointerConnector>, config: WebOsConfig) -> Self {
        Self { connector, config }
    }

    /// Create a provider opening websockets
    pub fn websocket(config: WebOsConfig) -> Self {
        Self::new(Arc::new(WebSocketConnector), config)
    }
}

impl AdapterProvider for WebOsPointerProvider {
    fn name(&self) -> &'static str {
        "webos-pointer"
    }

    fn supported_kinds(&self) -> Vec<AdapterKind> {
        vec![AdapterKind::WebOsPointer]
    }

    fn create_adapter(&self, _info: &DeviceInfo) -> Result<Box<dyn ProtocolAdapter>> {
        Ok(Box::new(WebOsPointerAdapter::new(
            self.connector.clone(),
            self.config.clone(),
        )))
    }
}
