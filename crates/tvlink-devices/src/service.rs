/*!
 * Device service facade.
 *
 * `DeviceService` is the handle applications hold for one service of one
 * device. It is cheap to clone; all clones share the same session.
 */
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use tvlink_core::{
    config::SessionConfig,
    event::EventReceiver,
    logging::operation_span,
    types::{Id, Value},
};

use crate::capability::{AdapterKind, CapabilityGroup, CapabilityPriority, CapabilitySet};
use crate::controls::{KeyControl, MediaControl, MediaPlayer, MouseControl, VolumeControl, WebAppLauncher};
use crate::device::{DeviceError, DeviceEvent, DeviceInfo, Result, SessionState};
use crate::dispatcher::{callbacks, Completion};
use crate::protocol::{CommandId, ProtocolAdapter};
use crate::request::Request;
use crate::session::DeviceSession;

/// Handle to one service of one device
#[derive(Debug, Clone)]
pub struct DeviceService {
    session: Arc<DeviceSession>,
}

impl DeviceService {
    /// Create a service around an adapter
    pub fn new(info: DeviceInfo, adapter: Box<dyn ProtocolAdapter>, config: SessionConfig) -> Self {
        Self {
            session: DeviceSession::new(info, adapter, config),
        }
    }

    /// Device ID
    pub fn id(&self) -> &Id {
        &self.session.info().id
    }

    /// Device information
    pub fn info(&self) -> &DeviceInfo {
        self.session.info()
    }

    /// Adapter kind implementing this service
    pub fn adapter_kind(&self) -> AdapterKind {
        self.session.info().adapter
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether commands are currently accepted
    pub fn is_connected(&self) -> bool {
        self.state().accepts_commands()
    }

    /// Capability groups usable on this service
    pub fn supported_capabilities(&self) -> CapabilitySet {
        self.session.supported_capabilities()
    }

    /// Whether a capability group is usable on this service
    pub fn supports(&self, group: CapabilityGroup) -> bool {
        self.session.supported_capabilities().contains(group)
    }

    /// Whether a capability name such as `KeyControl.Up` or `MediaPlayer.Any` is usable
    pub fn has_capability(&self, name: &str) -> bool {
        self.session.supported_capabilities().covers_name(name)
    }

    /// Whether every listed capability is usable
    pub fn has_capabilities(&self, names: &[&str]) -> bool {
        let supported = self.session.supported_capabilities();
        names.iter().all(|name| supported.covers_name(name))
    }

    /// Whether at least one listed capability is usable
    pub fn has_any_capability(&self, names: &[&str]) -> bool {
        let supported = self.session.supported_capabilities();
        names.iter().any(|name| supported.covers_name(name))
    }

    /// Adapter preference for a capability group
    pub fn priority(&self, group: CapabilityGroup) -> CapabilityPriority {
        self.session.priority(group)
    }

    /// When the service last connected
    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        self.session.last_connected()
    }

    /// Number of commands waiting for an outcome
    pub fn pending_commands(&self) -> usize {
        self.session.pending_count()
    }

    /// Connect the transport
    pub async fn connect(&self) -> Result<()> {
        self.session
            .connect()
            .instrument(operation_span("connect", "service"))
            .await
    }

    /// Disconnect the transport
    pub async fn disconnect(&self) -> Result<()> {
        self.session
            .disconnect()
            .instrument(operation_span("disconnect", "service"))
            .await
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> Result<EventReceiver<DeviceEvent>> {
        self.session.subscribe()
    }

    /// Submit a typed request and await its outcome
    pub fn send(&self, request: Request) -> Result<Completion> {
        let (continuation, rx) = Completion::channel();
        let id = self.session.invoke(&request, continuation)?;
        Ok(Completion::new(id, rx))
    }

    /// Submit a typed request with callbacks
    ///
    /// Exactly one of the callbacks runs, unless the request is rejected
    /// synchronously.
    pub fn send_with<S, F>(&self, request: Request, on_success: S, on_failure: F) -> Result<CommandId>
    where
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(DeviceError) + Send + 'static,
    {
        self.session
            .invoke(&request, callbacks(on_success, on_failure))
    }

    /// Submit a request by capability group and operation name
    pub fn invoke(&self, group: &str, operation: &str, arguments: Value) -> Result<Completion> {
        self.send(self.parse_request(group, operation, arguments)?)
    }

    /// Submit a request by name with callbacks
    pub fn invoke_with<S, F>(
        &self,
        group: &str,
        operation: &str,
        arguments: Value,
        on_success: S,
        on_failure: F,
    ) -> Result<CommandId>
    where
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(DeviceError) + Send + 'static,
    {
        let request = self.parse_request(group, operation, arguments)?;
        self.send_with(request, on_success, on_failure)
    }

    // Capability and connection are checked before the arguments are parsed.
    fn parse_request(&self, group: &str, operation: &str, arguments: Value) -> Result<Request> {
        let parsed = CapabilityGroup::parse(group)
            .filter(|g| g.exports(operation))
            .ok_or_else(|| DeviceError::unsupported(group, operation))?;
        self.ensure_ready(parsed, operation)?;
        Request::from_parts(group, operation, arguments)
    }

    pub(crate) fn ensure_ready(&self, group: CapabilityGroup, operation: &str) -> Result<()> {
        self.session.ensure_ready(group, operation)
    }

    /// Remote-control keys
    pub fn key_control(&self) -> KeyControl<'_> {
        KeyControl::new(self)
    }

    /// Pointer input
    pub fn mouse_control(&self) -> MouseControl<'_> {
        MouseControl::new(self)
    }

    /// Volume and mute
    pub fn volume_control(&self) -> VolumeControl<'_> {
        VolumeControl::new(self)
    }

    /// Media loading
    pub fn media_player(&self) -> MediaPlayer<'_> {
        MediaPlayer::new(self)
    }

    /// Media transport control
    pub fn media_control(&self) -> MediaControl<'_> {
        MediaControl::new(self)
    }

    /// Web applications
    pub fn web_app_launcher(&self) -> WebAppLauncher<'_> {
        WebAppLauncher::new(self)
    }
}
