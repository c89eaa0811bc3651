/*!
 * Protocol adapter contract.
 *
 * A protocol adapter translates typed requests into one device family's wire
 * protocol. Adapters never resolve commands themselves: every outcome is
 * reported back through the `AdapterLink` handed to them at connect time, and
 * the session's event pump routes it to the dispatcher.
 */
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use tvlink_core::{
    config::ReconnectConfig,
    types::{Id, Value},
};

use crate::capability::{capabilities_of, AdapterKind, CapabilityGroup, CapabilityPriority, CapabilitySet};
use crate::device::{DeviceError, DeviceInfo, Notification, Result};
use crate::request::Request;

/// Identifier of a submitted command
///
/// Ids are unique for the lifetime of a session, across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    /// Create a command id from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

/// Something an adapter reports to its session
#[derive(Debug)]
pub enum AdapterEvent {
    /// Outcome of a transmitted command
    Response {
        /// The command
        id: CommandId,
        /// Its result
        result: Result<Value>,
    },
    /// Unsolicited device message
    Notification(Notification),
    /// The transport is gone
    TransportLost {
        /// Why
        reason: String,
    },
}

/// Channel from an adapter back to the session that owns it
#[derive(Debug, Clone)]
pub struct AdapterLink {
    device_id: Id,
    tx: mpsc::UnboundedSender<AdapterEvent>,
}

impl AdapterLink {
    /// Create a link and the receiving end drained by the session
    pub fn new(device_id: Id) -> (Self, mpsc::UnboundedReceiver<AdapterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { device_id, tx }, rx)
    }

    /// Device the link belongs to
    pub fn device_id(&self) -> &Id {
        &self.device_id
    }

    /// Report the outcome of a command
    pub fn respond(&self, id: CommandId, result: Result<Value>) {
        self.send(AdapterEvent::Response { id, result });
    }

    /// Report a successful command
    pub fn succeed(&self, id: CommandId, value: Value) {
        self.respond(id, Ok(value));
    }

    /// Report a failed command
    pub fn fail(&self, id: CommandId, error: DeviceError) {
        self.respond(id, Err(error));
    }

    /// Forward an unsolicited device message
    pub fn notify(&self, notification: Notification) {
        self.send(AdapterEvent::Notification(notification));
    }

    /// Report that the transport is gone
    pub fn lost(&self, reason: impl Into<String>) {
        self.send(AdapterEvent::TransportLost {
            reason: reason.into(),
        });
    }

    /// Whether the session stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: AdapterEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!(device = %self.device_id, "Dropping adapter event for a closed session: {:?}", e.0);
        }
    }
}

/// What a session does after its transport is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay idle until the caller connects again
    #[default]
    Manual,
    /// Retry with exponential backoff
    Automatic {
        /// Maximum number of attempts
        max_attempts: u32,
        /// Delay before the first attempt
        base_delay: Duration,
        /// Upper bound on the delay
        max_delay: Duration,
    },
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        if config.automatic {
            ReconnectPolicy::Automatic {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
            }
        } else {
            ReconnectPolicy::Manual
        }
    }
}

/// Protocol adapter trait for one device family
#[async_trait]
pub trait ProtocolAdapter: Send + Sync + Debug {
    /// Adapter kind
    fn kind(&self) -> AdapterKind;

    /// Capability groups the adapter implements
    fn declared_capabilities(&self) -> CapabilitySet {
        capabilities_of(self.kind())
    }

    /// Preference for a capability group when several services offer it
    fn priority(&self, _group: CapabilityGroup) -> CapabilityPriority {
        CapabilityPriority::Normal
    }

    /// Reconnect policy after a transport loss
    fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::Manual
    }

    /// Bound on how long a transmitted command may stay unanswered
    fn command_timeout(&self) -> Option<Duration> {
        None
    }

    /// Perform the transport handshake
    ///
    /// Returns the capability groups the live device reports, or `None` when
    /// the device reports nothing beyond the adapter's declaration. The link
    /// stays valid until the next handshake.
    async fn connect(&self, info: &DeviceInfo, link: AdapterLink) -> Result<Option<CapabilitySet>>;

    /// Hand a command to the transport
    ///
    /// Must not block. An `Err` means the command never left; the outcome of
    /// an `Ok` arrives later through the link.
    fn transmit(&self, id: CommandId, request: &Request) -> Result<()>;

    /// Stop writing queued commands
    ///
    /// Called right before pending commands are failed on teardown. Anything
    /// still queued inside the adapter must not reach the device afterwards.
    fn quiesce(&self) {}

    /// Close the transport
    ///
    /// Idempotent: closing an already closed transport succeeds.
    async fn disconnect(&self) -> Result<()>;
}

/// Adapter provider trait for adapter implementations
pub trait AdapterProvider: Send + Sync + Debug {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Adapter kinds this provider builds
    fn supported_kinds(&self) -> Vec<AdapterKind>;

    /// Check if an adapter kind is supported
    fn supports_kind(&self, kind: &AdapterKind) -> bool {
        self.supported_kinds().contains(kind)
    }

    /// Create an adapter for a discovered device
    fn create_adapter(&self, info: &DeviceInfo) -> Result<Box<dyn ProtocolAdapter>>;
}

/// ProviderRegistry manages adapter providers
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AdapterProvider>>,
}

impl ProviderRegistry {
    /// Create an empty provider registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter provider
    ///
    /// Later registrations take precedence for the kinds they support.
    pub fn register_provider<P: AdapterProvider + 'static>(&mut self, provider: P) {
        self.providers.insert(0, Arc::new(provider));
    }

    /// Get a provider by name
    pub fn get_provider(&self, name: &str) -> Option<&dyn AdapterProvider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Get all providers
    pub fn providers(&self) -> Vec<&dyn AdapterProvider> {
        self.providers.iter().map(|p| p.as_ref()).collect()
    }

    /// Create an adapter for the device's adapter kind
    pub fn create_adapter(&self, info: &DeviceInfo) -> Result<Box<dyn ProtocolAdapter>> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.supports_kind(&info.adapter))
            .ok_or_else(|| DeviceError::UnsupportedAdapter(info.adapter.name().to_string()))?;

        provider.create_adapter(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullAdapter;

    #[async_trait]
    impl ProtocolAdapter for NullAdapter {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Cast
        }

        async fn connect(&self, _info: &DeviceInfo, _link: AdapterLink) -> Result<Option<CapabilitySet>> {
            Ok(None)
        }

        fn transmit(&self, _id: CommandId, _request: &Request) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct NullProvider(&'static str);

    impl AdapterProvider for NullProvider {
        fn name(&self) -> &'static str {
            self.0
        }

        fn supported_kinds(&self) -> Vec<AdapterKind> {
            vec![AdapterKind::Cast]
        }

        fn create_adapter(&self, _info: &DeviceInfo) -> Result<Box<dyn ProtocolAdapter>> {
            Ok(Box::new(NullAdapter))
        }
    }

    #[test]
    fn test_adapter_defaults() {
        let adapter = NullAdapter;
        assert_eq!(adapter.declared_capabilities(), capabilities_of(AdapterKind::Cast));
        assert_eq!(adapter.priority(CapabilityGroup::MediaPlayer), CapabilityPriority::Normal);
        assert_eq!(adapter.reconnect_policy(), ReconnectPolicy::Manual);
        assert_eq!(adapter.command_timeout(), None);
    }

    #[test]
    fn test_registry_creates_adapter_for_kind() {
        let mut registry = ProviderRegistry::new();
        registry.register_provider(NullProvider("null"));

        let info = DeviceInfo::new("tv", "TV", "10.0.0.2", AdapterKind::Cast);
        let adapter = registry.create_adapter(&info).unwrap();
        assert_eq!(adapter.kind(), AdapterKind::Cast);
        assert!(registry.get_provider("null").is_some());
        assert_eq!(registry.providers().len(), 1);

        let info = DeviceInfo::new("tv", "TV", "10.0.0.2", AdapterKind::WebOsPointer);
        assert!(matches!(
            registry.create_adapter(&info),
            Err(DeviceError::UnsupportedAdapter(kind)) if kind == "webos-pointer"
        ));
    }

    #[test]
    fn test_later_provider_wins() {
        let mut registry = ProviderRegistry::new();
        registry.register_provider(NullProvider("first"));
        registry.register_provider(NullProvider("second"));
        assert_eq!(registry.providers()[0].name(), "second");
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let manual = ReconnectConfig::default();
        assert_eq!(ReconnectPolicy::from(&manual), ReconnectPolicy::Manual);

        let automatic = ReconnectConfig {
            automatic: true,
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        assert_eq!(
            ReconnectPolicy::from(&automatic),
            ReconnectPolicy::Automatic {
                max_attempts: 4,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(1000),
            }
        );
    }

    #[tokio::test]
    async fn test_link_delivers_events_in_order() {
        let (link, mut rx) = AdapterLink::new(Id::from("tv"));
        link.succeed(CommandId::new(1), Value::Null);
        link.notify(Notification::VolumeChanged {
            level: 0.5,
            muted: false,
        });
        link.lost("socket closed");

        assert!(matches!(
            rx.recv().await,
            Some(AdapterEvent::Response { id, result: Ok(Value::Null) }) if id == CommandId::new(1)
        ));
        assert!(matches!(rx.recv().await, Some(AdapterEvent::Notification(_))));
        assert!(matches!(
            rx.recv().await,
            Some(AdapterEvent::TransportLost { reason }) if reason == "socket closed"
        ));
    }

    #[test]
    fn test_link_to_closed_session_is_silent() {
        let (link, rx) = AdapterLink::new(Id::from("tv"));
        drop(rx);
        assert!(link.is_closed());
        link.lost("nobody listening");
    }
}
