/*!
 * Cast adapter.
 *
 * Cast receivers are driven through a managed remote-session API rather than
 * a raw socket. The API is abstracted by `CastSessionApi`; the adapter turns
 * typed requests into session calls and session events into notifications.
 */
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tvlink_core::{config::CastConfig, types::Value};

use crate::capability::{AdapterKind, CapabilityGroup, CapabilityPriority, CapabilitySet};
use crate::device::{DeviceError, DeviceInfo, Notification, PlayState, Result};
use crate::protocol::{AdapterLink, AdapterProvider, CommandId, ProtocolAdapter, ReconnectPolicy};
use crate::request::{MediaInfo, Request};

/// Message namespace of web applications launched through the receiver
pub const WEB_APP_NAMESPACE: &str = "urn:x-cast:com.connectsdk";

/// Volume change applied by a single up or down step
pub const VOLUME_STEP: f32 = 0.05;

const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// A call on the remote-session API
#[derive(Debug, Clone, PartialEq)]
pub enum CastRequest {
    /// Load media into the receiver
    Load {
        /// Media to load
        media: MediaInfo,
        /// Start playing once loaded
        autoplay: bool,
    },
    /// Resume playback
    Play,
    /// Pause playback
    Pause,
    /// Stop playback and unload the media
    Stop,
    /// Seek to an absolute position
    Seek {
        /// Target position
        position: Duration,
    },
    /// Fetch the media status
    GetStatus,
    /// Fetch receiver volume and mute state
    GetVolume,
    /// Set the receiver volume
    SetVolume {
        /// Level in `0.0..=1.0`
        level: f32,
    },
    /// Change the receiver volume relative to its current level
    StepVolume {
        /// Signed change
        delta: f32,
    },
    /// Set the receiver mute state
    SetMuted {
        /// Mute flag
        muted: bool,
    },
    /// Launch a web application
    LaunchApp {
        /// Application identifier
        app_id: String,
        /// Launch parameters
        params: Option<Value>,
    },
    /// Join a running web application
    JoinApp {
        /// Application identifier
        app_id: String,
    },
    /// Stop the running web application
    StopApp,
    /// Send a message on a namespace
    SendMessage {
        /// Message namespace
        namespace: String,
        /// Message payload
        payload: Value,
    },
}

/// A started remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastSessionInfo {
    /// Session identifier
    pub session_id: String,
    /// Whether the receiver volume is fixed, e.g. on an external amplifier
    pub volume_fixed: bool,
}

/// Unsolicited event from a remote session
#[derive(Debug, Clone, PartialEq)]
pub enum CastSessionEvent {
    /// Media status update
    MediaStatus {
        /// Receiver player state, e.g. `PLAYING`
        player_state: String,
        /// Current position
        position: Option<Duration>,
        /// Media duration
        duration: Option<Duration>,
    },
    /// Receiver volume changed
    Volume {
        /// Level in `0.0..=1.0`
        level: f32,
        /// Mute flag
        muted: bool,
    },
    /// Message from a web application
    Message {
        /// Application identifier
        app_id: String,
        /// Payload
        payload: Value,
    },
    /// The session ended on the receiver side
    Ended {
        /// Why
        reason: String,
    },
}

/// Managed remote-session API of a Cast receiver
#[async_trait]
pub trait CastSessionApi: Send + Sync + fmt::Debug {
    /// Start a session with the receiver application on the device at `address`
    async fn start_session(
        &self,
        address: &str,
        receiver_app_id: &str,
    ) -> Result<(CastSessionInfo, mpsc::UnboundedReceiver<CastSessionEvent>)>;

    /// Perform a call within the current session
    async fn call(&self, request: CastRequest) -> Result<Value>;

    /// End a session
    async fn end_session(&self, session_id: &str) -> Result<()>;
}

/// How a call result becomes a command result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Whole,
    Field(&'static str),
}

impl Reply {
    fn project(self, value: Value) -> Result<Value> {
        match self {
            Reply::Whole => Ok(value),
            Reply::Field(field) => value.get(field).cloned().ok_or_else(|| {
                DeviceError::protocol(format!("receiver reply is missing `{}`", field))
            }),
        }
    }
}

fn translate(request: &Request) -> Result<(CastRequest, Reply)> {
    let translated = match request {
        Request::PlayMedia(media) | Request::DisplayImage(media) => (
            CastRequest::Load {
                media: media.clone(),
                autoplay: true,
            },
            Reply::Whole,
        ),
        Request::CloseMedia | Request::Stop => (CastRequest::Stop, Reply::Whole),
        Request::Play => (CastRequest::Play, Reply::Whole),
        Request::Pause => (CastRequest::Pause, Reply::Whole),
        Request::Seek(position) => (
            CastRequest::Seek {
                position: *position,
            },
            Reply::Whole,
        ),
        Request::GetPosition => (CastRequest::GetStatus, Reply::Field("position")),
        Request::GetDuration => (CastRequest::GetStatus, Reply::Field("duration")),
        Request::GetPlayState => (CastRequest::GetStatus, Reply::Field("playerState")),
        Request::GetVolume => (CastRequest::GetVolume, Reply::Field("level")),
        Request::GetMute => (CastRequest::GetVolume, Reply::Field("muted")),
        Request::SetVolume(level) => (CastRequest::SetVolume { level: *level }, Reply::Whole),
        Request::VolumeUp => (CastRequest::StepVolume { delta: VOLUME_STEP }, Reply::Whole),
        Request::VolumeDown => (CastRequest::StepVolume { delta: -VOLUME_STEP }, Reply::Whole),
        Request::SetMute(muted) => (CastRequest::SetMuted { muted: *muted }, Reply::Whole),
        Request::LaunchWebApp { app_id, params } => (
            CastRequest::LaunchApp {
                app_id: app_id.clone(),
                params: params.clone(),
            },
            Reply::Whole,
        ),
        Request::JoinWebApp { app_id } => (
            CastRequest::JoinApp {
                app_id: app_id.clone(),
            },
            Reply::Whole,
        ),
        Request::CloseWebApp => (CastRequest::StopApp, Reply::Whole),
        Request::SendWebAppMessage(payload) => (
            CastRequest::SendMessage {
                namespace: WEB_APP_NAMESPACE.to_string(),
                payload: payload.clone(),
            },
            Reply::Whole,
        ),
        Request::Key(_)
        | Request::SendKeyCode(_)
        | Request::PointerMove { .. }
        | Request::PointerScroll { .. }
        | Request::PointerClick => {
            return Err(DeviceError::unsupported(request.group(), request.operation()))
        }
    };
    Ok(translated)
}

#[derive(Debug)]
struct CastConnection {
    session_id: String,
    link: AdapterLink,
    runtime: Handle,
    listener: JoinHandle<()>,
}

/// Protocol adapter for Cast receivers
#[derive(Debug)]
pub struct CastAdapter {
    api: Arc<dyn CastSessionApi>,
    receiver_app_id: String,
    command_timeout: Duration,
    connection: Mutex<Option<CastConnection>>,
}

impl CastAdapter {
    /// Create an adapter driving `api`
    pub fn new(api: Arc<dyn CastSessionApi>, config: &CastConfig) -> Self {
        Self {
            api,
            receiver_app_id: config.receiver_app_id.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            connection: Mutex::new(None),
        }
    }

    /// Identifier of the current remote session
    pub fn session_id(&self) -> Option<String> {
        self.connection.lock().as_ref().map(|c| c.session_id.clone())
    }
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<CastSessionEvent>, link: AdapterLink) {
    while let Some(event) = events.recv().await {
        match event {
            CastSessionEvent::MediaStatus {
                player_state,
                position,
                duration,
            } => link.notify(Notification::MediaStatus {
                state: PlayState::from_receiver_state(&player_state),
                position,
                duration,
            }),
            CastSessionEvent::Volume { level, muted } => {
                link.notify(Notification::VolumeChanged { level, muted })
            }
            CastSessionEvent::Message { app_id, payload } => {
                link.notify(Notification::WebAppMessage { app_id, payload })
            }
            CastSessionEvent::Ended { reason } => {
                link.lost(format!("cast session ended: {}", reason));
                return;
            }
        }
    }
    link.lost("cast session event stream closed");
}

#[async_trait]
impl ProtocolAdapter for CastAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Cast
    }

    fn priority(&self, group: CapabilityGroup) -> CapabilityPriority {
        match group {
            CapabilityGroup::MediaPlayer | CapabilityGroup::MediaControl => CapabilityPriority::High,
            _ => CapabilityPriority::Normal,
        }
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::Automatic {
            max_attempts: RECONNECT_ATTEMPTS,
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
        }
    }

    fn command_timeout(&self) -> Option<Duration> {
        Some(self.command_timeout)
    }

    async fn connect(&self, info: &DeviceInfo, link: AdapterLink) -> Result<Option<CapabilitySet>> {
        let (session, events) = self
            .api
            .start_session(&info.address, &self.receiver_app_id)
            .await?;

        let mut live = self.declared_capabilities();
        if session.volume_fixed {
            debug!(device = %info.id, "Receiver volume is fixed");
            live.remove(CapabilityGroup::VolumeControl);
        }

        let listener = tokio::spawn(forward_events(events, link.clone()));
        info!(device = %info.id, session = %session.session_id, "Cast session started");

        let previous = self.connection.lock().replace(CastConnection {
            session_id: session.session_id,
            link,
            runtime: Handle::current(),
            listener,
        });
        if let Some(previous) = previous {
            previous.listener.abort();
        }
        Ok(Some(live))
    }

    fn transmit(&self, id: CommandId, request: &Request) -> Result<()> {
        let (call, reply) = translate(request)?;

        let connection = self.connection.lock();
        let connection = connection
            .as_ref()
            .ok_or_else(|| DeviceError::session_lost("no cast session"))?;

        let api = self.api.clone();
        let link = connection.link.clone();
        connection.runtime.spawn(async move {
            let result = api.call(call).await.and_then(|value| reply.project(value));
            link.respond(id, result);
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };
        connection.listener.abort();

        if let Err(e) = self.api.end_session(&connection.session_id).await {
            warn!(session = %connection.session_id, "Ending the cast session failed: {}", e);
            return Err(e);
        }
        debug!(session = %connection.session_id, "Cast session ended");
        Ok(())
    }
}

type ApiFactory = dyn Fn(&DeviceInfo) -> Arc<dyn CastSessionApi> + Send + Sync;

/// Provider building Cast adapters
#[derive(Clone)]
pub struct CastProvider {
    api_factory: Arc<ApiFactory>,
    config: CastConfig,
}

impl CastProvider {
    /// Create a provider obtaining a session API per device from `api_factory`
    pub fn new<F>(api_factory: F, config: CastConfig) -> Self
    where
        F: Fn(&DeviceInfo) -> Arc<dyn CastSessionApi> + Send + Sync + 'static,
    {
        Self {
            api_factory: Arc::new(api_factory),
            config,
        }
    }
}

impl fmt::Debug for CastProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CastProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AdapterProvider for CastProvider {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn supported_kinds(&self) -> Vec<AdapterKind> {
        vec![AdapterKind::Cast]
    }

    fn create_adapter(&self, info: &DeviceInfo) -> Result<Box<dyn ProtocolAdapter>> {
        let api = (self.api_factory)(info);
        Ok(Box::new(CastAdapter::new(api, &self.config)))
    }
}
