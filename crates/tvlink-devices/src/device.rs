/*!
 * Device descriptions, session states, events and errors.
 *
 * This module defines the vocabulary shared by sessions, the dispatcher and
 * protocol adapters.
 */
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tvlink_core::{
    error::Error as CoreError,
    types::{Id, Metadata, Value},
};

use crate::capability::{AdapterKind, CapabilitySet};

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The session is not connected
    #[error("Device not connected")]
    NotConnected,

    /// The capability is not supported by the device session
    #[error("Capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// The transport went away while the command was outstanding
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// The transport handshake failed or timed out
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// No response arrived within the command timeout
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// The device answered with a protocol-level failure
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The command arguments are malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// No adapter provider handles the requested adapter kind
    #[error("Unsupported adapter: {0}")]
    UnsupportedAdapter(String),

    /// No service is registered under the id
    #[error("Device not found: {0}")]
    DeviceNotFound(Id),

    /// A service is already registered under the id
    #[error("Device already registered: {0}")]
    AlreadyRegistered(Id),

    /// Core error
    #[error("Core error: {0}")]
    CoreError(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a capability error for a `Group.Operation` pair
    pub fn unsupported(group: impl fmt::Display, operation: &str) -> Self {
        DeviceError::CapabilityNotSupported(format!("{}.{}", group, operation))
    }

    /// Create a new session-lost error
    pub fn session_lost<S: AsRef<str>>(reason: S) -> Self {
        DeviceError::SessionLost(reason.as_ref().to_string())
    }

    /// Create a new invalid-argument error
    pub fn invalid_argument<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::InvalidArgument(msg.as_ref().to_string())
    }

    /// Create a new protocol error
    pub fn protocol<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::ProtocolError(msg.as_ref().to_string())
    }

    /// Whether the error was caused by the transport rather than the caller
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DeviceError::SessionLost(_)
                | DeviceError::ConnectFailed(_)
                | DeviceError::Timeout(_)
                | DeviceError::ProtocolError(_)
        )
    }

    /// Whether the error was raised synchronously because of caller misuse
    pub fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            DeviceError::NotConnected
                | DeviceError::CapabilityNotSupported(_)
                | DeviceError::InvalidArgument(_)
                | DeviceError::InvalidState(_)
        )
    }
}

/// Connection lifecycle state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport
    Idle,
    /// Handshake in progress
    Connecting,
    /// Transport up; commands are accepted
    Connected,
    /// Caller-requested teardown in progress
    Disconnecting,
    /// Transport failed; pending commands are being drained
    Error,
}

impl SessionState {
    /// Whether commands may be submitted in this state
    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Playback state reported by a media receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayState {
    /// State could not be determined
    Unknown,
    /// Nothing loaded
    Idle,
    /// Playing
    Playing,
    /// Paused
    Paused,
    /// Waiting for data
    Buffering,
    /// Reached the end of the media
    Finished,
}

impl PlayState {
    /// Map a receiver state string to a play state
    pub fn from_receiver_state(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "IDLE" => PlayState::Idle,
            "PLAYING" => PlayState::Playing,
            "PAUSED" => PlayState::Paused,
            "BUFFERING" | "LOADING" => PlayState::Buffering,
            "FINISHED" | "ENDED" => PlayState::Finished,
            _ => PlayState::Unknown,
        }
    }

    /// Receiver state string for this play state
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayState::Unknown => "UNKNOWN",
            PlayState::Idle => "IDLE",
            PlayState::Playing => "PLAYING",
            PlayState::Paused => "PAUSED",
            PlayState::Buffering => "BUFFERING",
            PlayState::Finished => "FINISHED",
        }
    }
}

/// Unsolicited message from a device
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Media status update
    MediaStatus {
        /// Playback state
        state: PlayState,
        /// Current position, if known
        position: Option<Duration>,
        /// Media duration, if known
        duration: Option<Duration>,
    },
    /// Volume or mute changed on the device
    VolumeChanged {
        /// Volume level in `0.0..=1.0`
        level: f32,
        /// Whether the device is muted
        muted: bool,
    },
    /// Message from a running web application
    WebAppMessage {
        /// Application identifier
        app_id: String,
        /// Message payload
        payload: Value,
    },
}

/// Device session event
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The session state has changed
    StateChanged {
        /// The device ID
        device_id: Id,
        /// The old state
        old_state: SessionState,
        /// The new state
        new_state: SessionState,
    },
    /// The supported capability set was recomputed after a handshake
    CapabilitiesChanged {
        /// The device ID
        device_id: Id,
        /// The capabilities now supported
        supported: CapabilitySet,
    },
    /// The device sent an unsolicited notification
    Notification {
        /// The device ID
        device_id: Id,
        /// The notification
        notification: Notification,
    },
    /// An automatic reconnect attempt has been scheduled
    ReconnectScheduled {
        /// The device ID
        device_id: Id,
        /// One-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// An error has occurred
    Error {
        /// The device ID
        device_id: Id,
        /// The error message
        message: String,
    },
}

/// Device information
///
/// Produced by discovery and handed to the service registry, which selects
/// an adapter from `adapter`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// The device ID
    pub id: Id,
    /// Friendly name
    pub name: String,
    /// Network address of the device
    pub address: String,
    /// Adapter kind implementing this service
    pub adapter: AdapterKind,
    /// Service endpoint discovered for the device, if any
    pub service_url: Option<String>,
    /// The device manufacturer
    pub manufacturer: Option<String>,
    /// The device model
    pub model: Option<String>,
    /// Additional device metadata
    pub metadata: Metadata,
}

impl DeviceInfo {
    /// Create device information with the required fields
    pub fn new(
        id: impl Into<Id>,
        name: impl Into<String>,
        address: impl Into<String>,
        adapter: AdapterKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            adapter,
            service_url: None,
            manufacturer: None,
            model: None,
            metadata: Metadata::new(),
        }
    }

    /// Set the discovered service endpoint
    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    /// Set manufacturer and model
    pub fn with_model(mut self, manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self.model = Some(model.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DeviceError::session_lost("gone").is_transport());
        assert!(DeviceError::Timeout("slow".into()).is_transport());
        assert!(!DeviceError::NotConnected.is_transport());
        assert!(DeviceError::NotConnected.is_caller_misuse());
        assert!(DeviceError::unsupported("KeyControl", "Up").is_caller_misuse());
        assert!(!DeviceError::ConnectFailed("refused".into()).is_caller_misuse());
    }

    #[test]
    fn test_unsupported_message() {
        let err = DeviceError::unsupported("VolumeControl", "Set");
        assert_eq!(err.to_string(), "Capability not supported: VolumeControl.Set");
    }

    #[test]
    fn test_core_error_conversion() {
        let err: DeviceError = CoreError::timeout("late").into();
        assert!(matches!(err, DeviceError::CoreError(CoreError::Timeout(_))));
    }

    #[test]
    fn test_only_connected_accepts_commands() {
        assert!(SessionState::Connected.accepts_commands());
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Disconnecting,
            SessionState::Error,
        ] {
            assert!(!state.accepts_commands());
        }
    }

    #[test]
    fn test_play_state_mapping() {
        assert_eq!(PlayState::from_receiver_state("PLAYING"), PlayState::Playing);
        assert_eq!(PlayState::from_receiver_state("paused"), PlayState::Paused);
        assert_eq!(PlayState::from_receiver_state("LOADING"), PlayState::Buffering);
        assert_eq!(PlayState::from_receiver_state("???"), PlayState::Unknown);
        assert_eq!(PlayState::from_receiver_state(PlayState::Idle.as_str()), PlayState::Idle);
    }

    #[test]
    fn test_device_info_builder() {
        let info = DeviceInfo::new("tv-1", "Living Room", "192.168.1.20", AdapterKind::WebOsPointer)
            .with_service_url("ws://192.168.1.20:3000/resources/pointer")
            .with_model("LG", "OLED55")
            .with_metadata("room", "living");

        assert_eq!(info.id.as_str(), "tv-1");
        assert_eq!(info.model.as_deref(), Some("OLED55"));
        assert_eq!(info.metadata.get("room"), Some(&Value::from("living")));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["adapter"], "webos-pointer");
    }
}
