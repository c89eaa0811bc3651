/*!
 * Device session.
 *
 * A session owns one adapter, the connection state machine and the command
 * dispatcher for a single device service:
 *
 * ```text
 * Idle -> Connecting -> Connected -> Disconnecting -> Idle
 *              |             |
 *              +-> Error <---+ (transport lost)
 *                    |
 *                    +-> Idle (-> Connecting when reconnecting automatically)
 * ```
 *
 * Adapter events are drained by a pump task holding only a weak reference to
 * the session. Every handshake starts a new connection generation; events
 * from an older generation are discarded.
 */
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

use tvlink_core::{
    config::SessionConfig,
    error::Error as CoreError,
    event::{EventReceiver, SharedEventBus},
    logging::component_span,
    utils::{spawn_and_log, with_timeout, Backoff},
};

use crate::capability::{CapabilityGroup, CapabilityPriority, CapabilitySet};
use crate::device::{DeviceError, DeviceEvent, DeviceInfo, Result, SessionState};
use crate::dispatcher::{CommandDispatcher, Continuation};
use crate::protocol::{AdapterEvent, AdapterLink, CommandId, ProtocolAdapter, ReconnectPolicy};
use crate::request::Request;

/// Connection lifecycle and command dispatch for one device service
#[derive(Debug)]
pub struct DeviceSession {
    info: DeviceInfo,
    adapter: Box<dyn ProtocolAdapter>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    supported: RwLock<CapabilitySet>,
    dispatcher: CommandDispatcher,
    events: SharedEventBus,
    generation: AtomicU64,
    hold_idle: AtomicBool,
    runtime: Mutex<Option<Handle>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    last_connected: RwLock<Option<DateTime<Utc>>>,
}

/// Returns an abandoned handshake to `Idle`
struct ConnectingGuard<'a> {
    session: &'a DeviceSession,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(device = %self.session.info.id, "Connect abandoned; returning to idle");
            self.session.transition(SessionState::Idle);
        }
    }
}

impl DeviceSession {
    /// Create an idle session
    ///
    /// Until the first handshake the supported set equals the adapter's
    /// declaration.
    pub fn new(info: DeviceInfo, adapter: Box<dyn ProtocolAdapter>, config: SessionConfig) -> Arc<Self> {
        if adapter.kind() != info.adapter {
            warn!(
                device = %info.id,
                "Adapter kind {} does not match the advertised kind {}",
                adapter.kind(),
                info.adapter
            );
        }
        let supported = adapter.declared_capabilities();
        Arc::new(Self {
            dispatcher: CommandDispatcher::new(info.id.clone()),
            events: SharedEventBus::with_capacity(config.event_capacity),
            info,
            adapter,
            config,
            state: RwLock::new(SessionState::Idle),
            supported: RwLock::new(supported),
            generation: AtomicU64::new(0),
            hold_idle: AtomicBool::new(false),
            runtime: Mutex::new(None),
            pump: Mutex::new(None),
            reconnect: Mutex::new(None),
            last_connected: RwLock::new(None),
        })
    }

    /// Device information
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Capability groups usable on this session
    pub fn supported_capabilities(&self) -> CapabilitySet {
        self.supported.read().clone()
    }

    /// Check that `group.operation` could be submitted right now
    pub fn ensure_ready(&self, group: CapabilityGroup, operation: &str) -> Result<()> {
        let state = self.state.read();
        CommandDispatcher::check_group(*state, &self.supported.read(), group, operation)
    }

    /// Capability groups the adapter declares
    pub fn declared_capabilities(&self) -> CapabilitySet {
        self.adapter.declared_capabilities()
    }

    /// Adapter preference for a capability group
    pub fn priority(&self, group: CapabilityGroup) -> CapabilityPriority {
        self.adapter.priority(group)
    }

    /// Effective reconnect policy; configuration overrides the adapter
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.config
            .reconnect
            .as_ref()
            .map(ReconnectPolicy::from)
            .unwrap_or_else(|| self.adapter.reconnect_policy())
    }

    /// Effective command timeout; configuration overrides the adapter
    pub fn command_timeout(&self) -> Option<Duration> {
        self.config
            .command_timeout()
            .or_else(|| self.adapter.command_timeout())
    }

    /// When the last handshake succeeded
    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        *self.last_connected.read()
    }

    /// Number of commands waiting for an outcome
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> Result<EventReceiver<DeviceEvent>> {
        Ok(self.events.subscribe()?)
    }

    /// Submit a request; see `CommandDispatcher::invoke`
    pub fn invoke(&self, request: &Request, continuation: Continuation) -> Result<CommandId> {
        let timeout = self
            .command_timeout()
            .and_then(|after| self.runtime.lock().clone().map(|handle| (handle, after)));
        self.dispatcher.invoke(
            &self.state,
            &self.supported,
            self.adapter.as_ref(),
            request,
            continuation,
            timeout,
        )
    }

    /// Connect the transport
    ///
    /// A no-op when already connected. Handshake failures and timeouts
    /// return `ConnectFailed` and leave the session idle.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.hold_idle.store(false, Ordering::SeqCst);
        self.start_connect().await
    }

    async fn start_connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Connected => return Ok(()),
                SessionState::Idle => *state = SessionState::Connecting,
                other => {
                    return Err(DeviceError::InvalidState(format!(
                        "cannot connect while {}",
                        other
                    )))
                }
            }
        }
        self.publish_transition(SessionState::Idle, SessionState::Connecting);

        let span = component_span("session", Some(self.info.id.as_str()));
        self.handshake().instrument(span).await
    }

    async fn handshake(self: &Arc<Self>) -> Result<()> {
        let guard = ConnectingGuard {
            session: self,
            armed: true,
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.runtime.lock() = Some(Handle::current());

        let (link, rx) = AdapterLink::new(self.info.id.clone());
        let bound = self.config.connect_timeout();
        info!(address = %self.info.address, adapter = %self.adapter.kind(), "Connecting");

        let outcome = match with_timeout(bound, self.adapter.connect(&self.info, link)).await {
            Ok(live) => Ok(live),
            Err(DeviceError::ConnectFailed(reason)) => Err(reason),
            Err(DeviceError::CoreError(CoreError::Timeout(_))) => {
                Err(format!("handshake timed out after {:?}", bound))
            }
            Err(e) => Err(e.to_string()),
        };

        let live = match outcome {
            Ok(live) => live,
            Err(reason) => {
                warn!("Connect failed: {}", reason);
                self.transition(SessionState::Error);
                self.publish(DeviceEvent::Error {
                    device_id: self.info.id.clone(),
                    message: format!("connect failed: {}", reason),
                });
                if let Err(e) = self.adapter.disconnect().await {
                    debug!("Releasing the failed transport: {}", e);
                }
                guard.disarm();
                self.transition(SessionState::Idle);
                return Err(DeviceError::ConnectFailed(reason));
            }
        };

        let declared = self.adapter.declared_capabilities();
        let supported = match live {
            Some(live) => declared.intersection(&live),
            None => declared,
        };
        *self.supported.write() = supported.clone();
        *self.last_connected.write() = Some(Utc::now());

        guard.disarm();
        self.transition(SessionState::Connected);
        self.publish(DeviceEvent::CapabilitiesChanged {
            device_id: self.info.id.clone(),
            supported: supported.clone(),
        });
        info!(%supported, "Connected");

        let span = component_span("session-pump", Some(self.info.id.as_str()));
        let weak = Arc::downgrade(self);
        let pump = spawn_and_log(
            "session-pump",
            async move {
                Self::pump(weak, generation, rx).await;
                Ok::<_, DeviceError>(())
            }
            .instrument(span),
        );
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    async fn pump(session: Weak<Self>, generation: u64, mut rx: UnboundedReceiver<AdapterEvent>) {
        loop {
            let event = rx.recv().await;
            let Some(session) = session.upgrade() else {
                return;
            };
            if session.generation.load(Ordering::SeqCst) != generation {
                trace!("Discarding event from a superseded connection");
                return;
            }
            match event {
                Some(AdapterEvent::Response { id, result }) => {
                    if !session.dispatcher.resolve(id, result) {
                        debug!(command = %id, "Ignoring response for a command that is no longer pending");
                    }
                }
                Some(AdapterEvent::Notification(notification)) => {
                    session.publish(DeviceEvent::Notification {
                        device_id: session.info.id.clone(),
                        notification,
                    });
                }
                Some(AdapterEvent::TransportLost { reason }) => {
                    session.handle_transport_loss(generation, &reason).await;
                    return;
                }
                None => {
                    session
                        .handle_transport_loss(generation, "adapter link closed")
                        .await;
                    return;
                }
            }
        }
    }

    async fn handle_transport_loss(self: &Arc<Self>, generation: u64, reason: &str) {
        {
            let mut state = self.state.write();
            if *state != SessionState::Connected
                || self.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            *state = SessionState::Error;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.publish_transition(SessionState::Connected, SessionState::Error);
        warn!("Transport lost: {}", reason);
        self.publish(DeviceEvent::Error {
            device_id: self.info.id.clone(),
            message: format!("transport lost: {}", reason),
        });

        self.adapter.quiesce();
        let failed = self.dispatcher.fail_all(reason);
        if failed > 0 {
            info!(failed, "Failed pending commands after transport loss");
        }

        match with_timeout(self.config.disconnect_timeout(), self.adapter.disconnect()).await {
            Ok(()) => {}
            Err(DeviceError::CoreError(CoreError::Timeout(_))) => {
                warn!("Releasing the lost transport timed out")
            }
            Err(e) => debug!("Releasing the lost transport: {}", e),
        }

        self.transition(SessionState::Idle);
        if self.hold_idle.load(Ordering::SeqCst) {
            debug!("Disconnected by the caller during teardown; not reconnecting");
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let ReconnectPolicy::Automatic {
            max_attempts,
            base_delay,
            max_delay,
        } = self.reconnect_policy()
        else {
            debug!("Manual reconnect policy; staying idle");
            return;
        };

        let session = Arc::downgrade(self);
        let device_id = self.info.id.clone();
        let span = component_span("session-reconnect", Some(device_id.as_str()));
        let task = spawn_and_log(
            "session-reconnect",
            async move {
                let mut backoff = Backoff::new(base_delay, max_delay, max_attempts);
                while let Some(delay) = backoff.next() {
                    let attempt = backoff.attempt();
                    {
                        let Some(session) = session.upgrade() else {
                            return Ok(());
                        };
                        session.publish(DeviceEvent::ReconnectScheduled {
                            device_id: device_id.clone(),
                            attempt,
                            delay,
                        });
                    }
                    info!(attempt, ?delay, "Reconnect scheduled");
                    tokio::time::sleep(delay).await;

                    let Some(session) = session.upgrade() else {
                        return Ok(());
                    };
                    if session.hold_idle.load(Ordering::SeqCst) {
                        debug!("Disconnected by the caller; abandoning reconnect");
                        return Ok(());
                    }
                    if session.state() != SessionState::Idle {
                        debug!("Session left idle; abandoning reconnect");
                        return Ok(());
                    }
                    match session.start_connect().await {
                        Ok(()) => {
                            info!(attempt, "Reconnected");
                            return Ok(());
                        }
                        Err(e) => warn!(attempt, "Reconnect attempt failed: {}", e),
                    }
                }

                let message = format!("gave up after {} reconnect attempts", max_attempts);
                if let Some(session) = session.upgrade() {
                    session.publish(DeviceEvent::Error {
                        device_id,
                        message: message.clone(),
                    });
                }
                Err(DeviceError::ConnectFailed(message))
            }
            .instrument(span),
        );
        if let Some(previous) = self.reconnect.lock().replace(task) {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect.lock().take() {
            task.abort();
        }
    }

    /// Disconnect the transport
    ///
    /// Idempotent. Pending commands fail with `SessionLost` and any scheduled
    /// reconnect is cancelled. A disconnect during transport-loss teardown
    /// keeps the session idle once the teardown finishes.
    pub async fn disconnect(&self) -> Result<()> {
        self.cancel_reconnect();
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Connecting => {
                    return Err(DeviceError::InvalidState(
                        "cannot disconnect while connecting".to_string(),
                    ))
                }
                SessionState::Idle | SessionState::Disconnecting => {
                    self.hold_idle.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                SessionState::Error => {
                    self.hold_idle.store(true, Ordering::SeqCst);
                    debug!(device = %self.info.id, "Disconnect requested during transport teardown");
                    return Ok(());
                }
                SessionState::Connected => {
                    *state = SessionState::Disconnecting;
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    self.hold_idle.store(true, Ordering::SeqCst);
                }
            }
        }
        self.publish_transition(SessionState::Connected, SessionState::Disconnecting);
        info!(device = %self.info.id, "Disconnecting");

        self.adapter.quiesce();
        self.dispatcher.fail_all("session disconnected");
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        let bound = self.config.disconnect_timeout();
        match with_timeout(bound, self.adapter.disconnect()).await {
            Ok(()) => debug!(device = %self.info.id, "Transport closed"),
            Err(DeviceError::CoreError(CoreError::Timeout(_))) => {
                warn!(device = %self.info.id, "Closing the transport timed out after {:?}; forcing idle", bound)
            }
            Err(e) => warn!(device = %self.info.id, "Closing the transport failed: {}", e),
        }

        self.transition(SessionState::Idle);
        Ok(())
    }

    fn transition(&self, new_state: SessionState) -> SessionState {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        self.publish_transition(old_state, new_state);
        old_state
    }

    fn publish_transition(&self, old_state: SessionState, new_state: SessionState) {
        if old_state != new_state {
            debug!(device = %self.info.id, from = %old_state, to = %new_state, "Session state changed");
            self.publish(DeviceEvent::StateChanged {
                device_id: self.info.id.clone(),
                old_state,
                new_state,
            });
        }
    }

    fn publish(&self, event: DeviceEvent) {
        if let Err(e) = self.events.publish(event) {
            trace!(device = %self.info.id, "Dropped session event: {}", e);
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
        if let Some(task) = self.reconnect.get_mut().take() {
            task.abort();
        }
        if self.state.get_mut().accepts_commands() {
            debug!(device = %self.info.id, "Session released while connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tvlink_core::{config::ReconnectConfig, types::Value};

    use super::*;
    use crate::device::Notification;
    use crate::dispatcher::{callbacks, Completion};
    use crate::keys::Key;
    use crate::protocols::mock::{MockAdapter, MockController, MOCK_KIND};

    fn info() -> DeviceInfo {
        DeviceInfo::new("living-room", "Living Room TV", "192.168.1.30", MOCK_KIND)
    }

    fn session_with(adapter: MockAdapter, config: SessionConfig) -> Arc<DeviceSession> {
        DeviceSession::new(info(), Box::new(adapter), config)
    }

    fn session() -> (Arc<DeviceSession>, MockController) {
        let (adapter, controller) = MockAdapter::new();
        (session_with(adapter, SessionConfig::default()), controller)
    }

    fn send(session: &DeviceSession, request: Request) -> Result<Completion> {
        let (continuation, rx) = Completion::channel();
        let id = session.invoke(&request, continuation)?;
        Ok(Completion::new(id, rx))
    }

    async fn wait_for_state(events: &mut EventReceiver<DeviceEvent>, wanted: SessionState) {
        loop {
            match events.recv().await {
                Ok(DeviceEvent::StateChanged { new_state, .. }) if new_state == wanted => return,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended before {}: {}", wanted, e),
            }
        }
    }

    fn automatic(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::Automatic {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_connect_publishes_transitions() {
        let (session, controller) = session();
        let mut events = session.subscribe().unwrap();

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(controller.is_connected());
        assert!(session.last_connected().is_some());

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DeviceEvent::StateChanged { old_state, new_state, .. } = event {
                transitions.push((old_state, new_state));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (SessionState::Idle, SessionState::Connecting),
                (SessionState::Connecting, SessionState::Connected),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (session, controller) = session();
        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(controller.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_is_rejected() {
        let (adapter, _controller) = MockAdapter::new();
        let session = session_with(
            adapter.with_connect_delay(Duration::from_secs(1)),
            SessionConfig::default(),
        );

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        while session.state() != SessionState::Connecting {
            tokio::task::yield_now().await;
        }

        assert!(matches!(session.connect().await, Err(DeviceError::InvalidState(_))));
        assert!(matches!(session.disconnect().await, Err(DeviceError::InvalidState(_))));
        pending.await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_supported_is_declared_intersected_with_live() {
        let live = CapabilitySet::from_groups(&[
            CapabilityGroup::KeyControl,
            CapabilityGroup::VolumeControl,
        ]);
        let (adapter, _controller) = MockAdapter::new();
        let session = session_with(adapter.with_live_capabilities(live.clone()), SessionConfig::default());

        assert_eq!(session.supported_capabilities(), session.declared_capabilities());
        session.connect().await.unwrap();
        assert_eq!(
            session.supported_capabilities(),
            session.declared_capabilities().intersection(&live)
        );

        let result = send(&session, Request::PlayMedia(crate::request::MediaInfo::new(
            "http://example.com/a.mp4",
            "video/mp4",
        )));
        assert!(matches!(result, Err(DeviceError::CapabilityNotSupported(_))));
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let (session, controller) = session();
        assert!(matches!(
            send(&session, Request::Key(Key::Up)),
            Err(DeviceError::NotConnected)
        ));
        assert!(controller.sent().is_empty());
    }

    #[tokio::test]
    async fn test_response_reaches_caller() {
        let (session, controller) = session();
        session.connect().await.unwrap();

        let completion = send(&session, Request::GetVolume).unwrap();
        let (id, request) = controller.last_sent().unwrap();
        assert_eq!(id, completion.id());
        assert_eq!(request, Request::GetVolume);

        controller.respond_ok(id, Value::from(0.4));
        assert_eq!(completion.await.unwrap(), Value::from(0.4));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_idle() {
        let (session, controller) = session();
        controller.fail_next_connects(1);
        let mut events = session.subscribe().unwrap();

        let result = session.connect().await;
        assert!(matches!(result, Err(DeviceError::ConnectFailed(_))));
        assert_eq!(session.state(), SessionState::Idle);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, DeviceEvent::Error { .. });
        }
        assert!(saw_error);

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_is_connect_failure() {
        let (adapter, _controller) = MockAdapter::new();
        let config = SessionConfig {
            connect_timeout_ms: 1_000,
            ..SessionConfig::default()
        };
        let session = session_with(adapter.with_connect_delay(Duration::from_secs(30)), config);

        let result = session.connect().await;
        assert!(matches!(result, Err(DeviceError::ConnectFailed(reason)) if reason.contains("timed out")));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_close_is_bounded() {
        let (adapter, controller) = MockAdapter::new();
        let config = SessionConfig {
            disconnect_timeout_ms: 1_000,
            ..SessionConfig::default()
        };
        let session = session_with(adapter.with_disconnect_delay(Duration::from_secs(60)), config);
        session.connect().await.unwrap();

        let started = tokio::time::Instant::now();
        session.disconnect().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(controller.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_idempotent() {
        let (session, controller) = session();
        session.connect().await.unwrap();

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(controller.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_fails_every_pending_command() {
        let (session, _controller) = session();
        session.connect().await.unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let failures = failures.clone();
            session
                .invoke(
                    &Request::Key(Key::Right),
                    callbacks(
                        |_| panic!("unexpected success"),
                        move |e| {
                            assert!(matches!(e, DeviceError::SessionLost(_)));
                            failures.fetch_add(1, Ordering::SeqCst);
                        },
                    ),
                )
                .unwrap();
        }
        assert_eq!(session.pending_count(), 4);

        session.disconnect().await.unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 4);
        assert_eq!(session.pending_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_transport_loss_fails_pending_and_idles() {
        let (session, controller) = session();
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        let completion = send(&session, Request::SendKeyCode(5)).unwrap();
        controller.wait_for_sent(1).await;
        controller.close_transport("socket closed by peer");

        assert!(matches!(completion.await, Err(DeviceError::SessionLost(_))));
        wait_for_state(&mut events, SessionState::Idle).await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(
            send(&session, Request::Key(Key::Up)),
            Err(DeviceError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_policy_stays_idle() {
        let (session, controller) = session();
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        controller.close_transport("gone");
        wait_for_state(&mut events, SessionState::Idle).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(controller.connect_count(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_automatic_reconnect_with_backoff() {
        let (adapter, controller) = MockAdapter::new();
        let session = session_with(adapter.with_reconnect(automatic(3)), SessionConfig::default());
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        controller.fail_next_connects(1);
        controller.close_transport("wifi dropped");

        let mut scheduled = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                DeviceEvent::ReconnectScheduled { attempt, delay, .. } => scheduled.push((attempt, delay)),
                DeviceEvent::StateChanged {
                    new_state: SessionState::Connected,
                    ..
                } => break,
                _ => {}
            }
        }

        assert_eq!(
            scheduled,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
            ]
        );
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(controller.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up() {
        let (adapter, controller) = MockAdapter::new();
        let session = session_with(adapter.with_reconnect(automatic(2)), SessionConfig::default());
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        controller.fail_next_connects(10);
        controller.close_transport("power off");

        loop {
            if let DeviceEvent::Error { message, .. } = events.recv().await.unwrap() {
                if message.contains("gave up") {
                    break;
                }
            }
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(controller.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_scheduled_reconnect() {
        let (adapter, controller) = MockAdapter::new();
        let session = session_with(adapter.with_reconnect(automatic(3)), SessionConfig::default());
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        controller.close_transport("gone");
        wait_for_state(&mut events, SessionState::Idle).await;
        session.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(controller.connect_count(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_disconnect_during_loss_teardown_stays_idle() {
        let (adapter, controller) = MockAdapter::new();
        let adapter = adapter
            .with_reconnect(automatic(3))
            .with_disconnect_delay(Duration::from_millis(500));
        let session = session_with(adapter, SessionConfig::default());
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        controller.close_transport("tv switched input");
        wait_for_state(&mut events, SessionState::Error).await;
        session.disconnect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(controller.connect_count(), 1);

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_transport_loss_fails_commands_from_many_tasks() {
        let (session, controller) = session();
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let senders: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                let successes = successes.clone();
                let failures = failures.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        let successes = successes.clone();
                        let failures = failures.clone();
                        session
                            .invoke(
                                &Request::Key(Key::Down),
                                callbacks(
                                    move |_| {
                                        successes.fetch_add(1, Ordering::SeqCst);
                                    },
                                    move |e| {
                                        assert!(matches!(e, DeviceError::SessionLost(_)));
                                        failures.fetch_add(1, Ordering::SeqCst);
                                    },
                                ),
                            )
                            .unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }
        assert_eq!(session.pending_count(), 200);

        controller.close_transport("socket reset");
        wait_for_state(&mut events, SessionState::Idle).await;

        assert_eq!(failures.load(Ordering::SeqCst), 200);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_overrides_adapter_policy() {
        let (adapter, controller) = MockAdapter::new();
        let config = SessionConfig {
            reconnect: Some(ReconnectConfig {
                automatic: true,
                max_attempts: 1,
                base_delay_ms: 50,
                max_delay_ms: 50,
            }),
            ..SessionConfig::default()
        };
        let session = session_with(adapter, config);
        assert!(matches!(session.reconnect_policy(), ReconnectPolicy::Automatic { .. }));

        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();
        controller.close_transport("gone");
        wait_for_state(&mut events, SessionState::Idle).await;
        wait_for_state(&mut events, SessionState::Connected).await;
        assert_eq!(controller.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout() {
        let (adapter, _controller) = MockAdapter::new();
        let session = session_with(
            adapter.with_command_timeout(Duration::from_secs(5)),
            SessionConfig::default(),
        );
        session.connect().await.unwrap();

        let completion = send(&session, Request::Pause).unwrap();
        assert!(matches!(completion.await, Err(DeviceError::Timeout(_))));
        assert_eq!(session.pending_count(), 0);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_stale_response_is_ignored() {
        let (session, controller) = session();
        session.connect().await.unwrap();

        let first = send(&session, Request::Play).unwrap();
        let stale_id = first.id();
        session.disconnect().await.unwrap();
        assert!(matches!(first.await, Err(DeviceError::SessionLost(_))));

        session.connect().await.unwrap();
        let second = send(&session, Request::Stop).unwrap();
        assert_ne!(second.id(), stale_id);

        controller.respond_ok(stale_id, Value::from("late"));
        controller.respond_ok(second.id(), Value::Null);
        assert_eq!(second.await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_notifications_are_published() {
        let (session, controller) = session();
        session.connect().await.unwrap();
        let mut events = session.subscribe().unwrap();

        controller.notify(Notification::VolumeChanged {
            level: 0.2,
            muted: true,
        });

        loop {
            if let DeviceEvent::Notification { notification, .. } = events.recv().await.unwrap() {
                assert_eq!(
                    notification,
                    Notification::VolumeChanged {
                        level: 0.2,
                        muted: true
                    }
                );
                break;
            }
        }
    }
}
