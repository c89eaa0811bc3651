/*!
 * tvlink Devices
 *
 * This crate provides capability dispatch, device sessions and protocol
 * adapters for networked media and TV devices.
 */

#![warn(missing_docs)]

// Re-export core types
pub use tvlink_core::prelude;

pub mod capability;
pub mod controls;
pub mod device;
pub mod dispatcher;
pub mod keys;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod request;
pub mod service;
pub mod session;

pub use capability::{AdapterKind, CapabilityGroup, CapabilityPriority, CapabilitySet};
pub use device::{
    DeviceError, DeviceEvent, DeviceInfo, Notification, PlayState, Result, SessionState,
};
pub use dispatcher::Completion;
pub use keys::Key;
pub use protocol::{
    AdapterLink, AdapterProvider, CommandId, ProtocolAdapter, ProviderRegistry, ReconnectPolicy,
};
pub use registry::{RegistryEvent, ServiceRegistry, SharedServiceRegistry};
pub use request::{MediaInfo, Request};
pub use service::DeviceService;

/// tvlink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> std::result::Result<(), tvlink_core::error::Error> {
    tracing::info!(
        adapters = ?available_adapters(),
        "tvlink devices {} initialized",
        VERSION
    );
    Ok(())
}

/// Adapters compiled into this build
pub fn available_adapters() -> Vec<&'static str> {
    let mut adapters = Vec::new();

    #[cfg(feature = "cast")]
    adapters.push("cast");

    #[cfg(feature = "webos")]
    adapters.push("webos-pointer");

    #[cfg(feature = "mock")]
    adapters.push("mock");

    adapters
}
