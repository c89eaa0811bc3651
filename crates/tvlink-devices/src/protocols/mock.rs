/*!
 * Scriptable in-memory adapter.
 *
 * The mock adapter declares every capability group and records what it is
 * asked to transmit. A `MockController` drives the other side: it answers
 * commands, pushes notifications, drops the transport and makes handshakes
 * fail.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use tvlink_core::types::{Id, Value};

use crate::capability::{AdapterKind, CapabilityGroup, CapabilityPriority, CapabilitySet};
use crate::device::{DeviceError, DeviceInfo, Notification, Result};
use crate::protocol::{AdapterLink, AdapterProvider, CommandId, ProtocolAdapter, ReconnectPolicy};
use crate::request::Request;

const MOCK_GROUPS: &[CapabilityGroup] = &CapabilityGroup::ALL;

/// Adapter kind of the mock adapter
pub const MOCK_KIND: AdapterKind = AdapterKind::Custom {
    name: "mock",
    groups: MOCK_GROUPS,
};

#[derive(Debug)]
struct MockScript {
    connect_failures: u32,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    live: Option<CapabilitySet>,
    auto_respond: bool,
    transmit_error: Option<String>,
    reconnect: ReconnectPolicy,
    command_timeout: Option<Duration>,
    priorities: HashMap<CapabilityGroup, CapabilityPriority>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            connect_failures: 0,
            connect_delay: None,
            disconnect_delay: None,
            live: None,
            auto_respond: false,
            transmit_error: None,
            reconnect: ReconnectPolicy::Manual,
            command_timeout: None,
            priorities: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MockInner {
    link: Mutex<Option<AdapterLink>>,
    sent: Mutex<Vec<(CommandId, Request)>>,
    script: Mutex<MockScript>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    activity: Notify,
}

/// In-memory protocol adapter
#[derive(Debug)]
pub struct MockAdapter {
    kind: AdapterKind,
    inner: Arc<MockInner>,
}

impl MockAdapter {
    /// Create a mock adapter and its controller
    pub fn new() -> (Self, MockController) {
        Self::with_kind(MOCK_KIND)
    }

    /// Create a mock adapter impersonating another adapter kind
    pub fn with_kind(kind: AdapterKind) -> (Self, MockController) {
        let inner = Arc::new(MockInner::default());
        let controller = MockController {
            inner: inner.clone(),
        };
        (Self { kind, inner }, controller)
    }

    /// Report `live` as the device's capabilities on every handshake
    pub fn with_live_capabilities(self, live: CapabilitySet) -> Self {
        self.inner.script.lock().live = Some(live);
        self
    }

    /// Answer every command as soon as it is transmitted
    pub fn with_auto_respond(self) -> Self {
        self.inner.script.lock().auto_respond = true;
        self
    }

    /// Use `policy` after a transport loss
    pub fn with_reconnect(self, policy: ReconnectPolicy) -> Self {
        self.inner.script.lock().reconnect = policy;
        self
    }

    /// Bound unanswered commands by `timeout`
    pub fn with_command_timeout(self, timeout: Duration) -> Self {
        self.inner.script.lock().command_timeout = Some(timeout);
        self
    }

    /// Delay every handshake by `delay`
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.inner.script.lock().connect_delay = Some(delay);
        self
    }

    /// Delay every teardown by `delay`
    pub fn with_disconnect_delay(self, delay: Duration) -> Self {
        self.inner.script.lock().disconnect_delay = Some(delay);
        self
    }

    /// Advertise `priority` for `group`
    pub fn with_priority(self, group: CapabilityGroup, priority: CapabilityPriority) -> Self {
        self.inner.script.lock().priorities.insert(group, priority);
        self
    }
}

fn canned_response(request: &Request) -> Value {
    match request {
        Request::GetVolume => Value::from(0.5),
        Request::GetMute => Value::from(false),
        Request::GetPosition | Request::GetDuration => Value::from(0.0),
        Request::GetPlayState => Value::from("IDLE"),
        _ => Value::Null,
    }
}

#[async_trait]
impl ProtocolAdapter for MockAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn priority(&self, group: CapabilityGroup) -> CapabilityPriority {
        self.inner
            .script
            .lock()
            .priorities
            .get(&group)
            .copied()
            .unwrap_or_default()
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        self.inner.script.lock().reconnect
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.inner.script.lock().command_timeout
    }

    async fn connect(&self, info: &DeviceInfo, link: AdapterLink) -> Result<Option<CapabilitySet>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.script.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let live = {
            let mut script = self.inner.script.lock();
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(DeviceError::ConnectFailed(format!(
                    "{} refused the handshake",
                    info.address
                )));
            }
            script.live.clone()
        };

        debug!(device = %info.id, "Mock transport up");
        *self.inner.link.lock() = Some(link);
        self.inner.activity.notify_waiters();
        Ok(live)
    }

    fn transmit(&self, id: CommandId, request: &Request) -> Result<()> {
        let (auto_respond, transmit_error) = {
            let script = self.inner.script.lock();
            (script.auto_respond, script.transmit_error.clone())
        };
        if let Some(message) = transmit_error {
            return Err(DeviceError::protocol(message));
        }

        let link = self
            .inner
            .link
            .lock()
            .clone()
            .ok_or_else(|| DeviceError::session_lost("mock transport closed"))?;

        self.inner.sent.lock().push((id, request.clone()));
        self.inner.activity.notify_waiters();

        if auto_respond {
            link.succeed(id, canned_response(request));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.link.lock().take();
        let delay = self.inner.script.lock().disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Handle driving the device side of a `MockAdapter`
#[derive(Debug, Clone)]
pub struct MockController {
    inner: Arc<MockInner>,
}

impl MockController {
    /// Commands transmitted so far, in order
    pub fn sent(&self) -> Vec<(CommandId, Request)> {
        self.inner.sent.lock().clone()
    }

    /// Most recently transmitted command
    pub fn last_sent(&self) -> Option<(CommandId, Request)> {
        self.inner.sent.lock().last().cloned()
    }

    /// Wait until at least `count` commands were transmitted
    pub async fn wait_for_sent(&self, count: usize) {
        loop {
            let notified = self.inner.activity.notified();
            if self.inner.sent.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the transport is up
    pub async fn wait_for_connection(&self) {
        loop {
            let notified = self.inner.activity.notified();
            if self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    /// Answer a command
    ///
    /// Returns `false` if the transport is down.
    pub fn respond(&self, id: CommandId, result: Result<Value>) -> bool {
        match self.inner.link.lock().as_ref() {
            Some(link) => {
                link.respond(id, result);
                true
            }
            None => false,
        }
    }

    /// Answer a command successfully
    pub fn respond_ok(&self, id: CommandId, value: Value) -> bool {
        self.respond(id, Ok(value))
    }

    /// Push an unsolicited notification
    pub fn notify(&self, notification: Notification) -> bool {
        match self.inner.link.lock().as_ref() {
            Some(link) => {
                link.notify(notification);
                true
            }
            None => false,
        }
    }

    /// Drop the transport from the device side
    pub fn close_transport(&self, reason: &str) {
        if let Some(link) = self.inner.link.lock().take() {
            link.lost(reason);
        }
    }

    /// Fail the next `count` handshakes
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.script.lock().connect_failures = count;
    }

    /// Make every transmit fail with a protocol error, or stop doing so
    pub fn set_transmit_error(&self, message: Option<&str>) {
        self.inner.script.lock().transmit_error = message.map(str::to_string);
    }

    /// Whether the transport is up
    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().is_some()
    }

    /// Number of handshakes attempted
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of transport closes requested
    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }
}

/// Provider building mock adapters and keeping their controllers
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    controllers: Arc<Mutex<HashMap<Id, MockController>>>,
    auto_respond: bool,
}

impl MockProvider {
    /// Create a provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters that answer every command immediately
    pub fn auto_respond(mut self) -> Self {
        self.auto_respond = true;
        self
    }

    /// Controller of the adapter created for `id`
    pub fn controller(&self, id: &Id) -> Option<MockController> {
        self.controllers.lock().get(id).cloned()
    }
}

impl AdapterProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supported_kinds(&self) -> Vec<AdapterKind> {
        vec![MOCK_KIND]
    }

    fn create_adapter(&self, info: &DeviceInfo) -> Result<Box<dyn ProtocolAdapter>> {
        let (adapter, controller) = MockAdapter::with_kind(info.adapter);
        let adapter = if self.auto_respond {
            adapter.with_auto_respond()
        } else {
            adapter
        };
        self.controllers.lock().insert(info.id.clone(), controller);
        Ok(Box::new(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Key;
    use crate::protocol::AdapterEvent;

    fn info() -> DeviceInfo {
        DeviceInfo::new("mock-tv", "Mock TV", "127.0.0.1", MOCK_KIND)
    }

    #[tokio::test]
    async fn test_auto_respond() {
        let (adapter, controller) = MockAdapter::new();
        let adapter = adapter.with_auto_respond();
        let (link, mut rx) = AdapterLink::new(info().id);
        adapter.connect(&info(), link).await.unwrap();

        adapter.transmit(CommandId::new(1), &Request::GetVolume).unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(AdapterEvent::Response { result: Ok(Value::Float(v)), .. }) if v == 0.5
        ));
        assert_eq!(controller.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_transmit_without_transport() {
        let (adapter, _) = MockAdapter::new();
        assert!(matches!(
            adapter.transmit(CommandId::new(1), &Request::Key(Key::Up)),
            Err(DeviceError::SessionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let (adapter, controller) = MockAdapter::new();
        controller.fail_next_connects(1);

        let (link, _rx) = AdapterLink::new(info().id);
        assert!(adapter.connect(&info(), link.clone()).await.is_err());
        assert!(adapter.connect(&info(), link).await.is_ok());
        assert_eq!(controller.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_transport_reports_loss() {
        let (adapter, controller) = MockAdapter::new();
        let (link, mut rx) = AdapterLink::new(info().id);
        adapter.connect(&info(), link).await.unwrap();

        controller.close_transport("unplugged");
        assert!(!controller.is_connected());
        assert!(matches!(
            rx.recv().await,
            Some(AdapterEvent::TransportLost { reason }) if reason == "unplugged"
        ));
        assert!(!controller.respond_ok(CommandId::new(1), Value::Null));
    }

    #[test]
    fn test_provider_keeps_controllers() {
        let provider = MockProvider::new();
        let adapter = provider.create_adapter(&info()).unwrap();
        assert_eq!(adapter.kind(), MOCK_KIND);
        assert!(provider.controller(&info().id).is_some());
        assert!(provider.controller(&Id::from("other")).is_none());
    }
}
