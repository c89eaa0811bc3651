/*!
 * Typed capability requests.
 *
 * Every capability operation has exactly one `Request` variant. Requests are
 * what the dispatcher checks against the supported set and what adapters
 * translate into wire messages.
 */
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tvlink_core::types::Value;

use crate::capability::CapabilityGroup;
use crate::device::{DeviceError, Result};
use crate::keys::Key;

/// Media to load onto a receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Media URL
    pub url: String,
    /// MIME type, e.g. `video/mp4`
    pub mime_type: String,
    /// Title shown by the receiver
    #[serde(default)]
    pub title: Option<String>,
    /// Description shown by the receiver
    #[serde(default)]
    pub description: Option<String>,
    /// Artwork URL
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Whether playback loops
    #[serde(default)]
    pub should_loop: bool,
}

impl MediaInfo {
    /// Create media info from URL and MIME type
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            title: None,
            description: None,
            icon_url: None,
            should_loop: false,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the artwork URL
    pub fn with_icon(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }

    /// Parse media info from an argument object
    pub fn from_value(value: &Value) -> Result<Self> {
        let json = serde_json::Value::from(value.clone());
        serde_json::from_value(json)
            .map_err(|e| DeviceError::invalid_argument(format!("bad media info: {}", e)))
    }

    /// Render as an argument object
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .map(Value::from)
            .unwrap_or_default()
    }
}

/// A capability request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Press a remote-control key
    Key(Key),
    /// Press a key by raw protocol key code
    SendKeyCode(u32),
    /// Move the pointer by a relative offset
    PointerMove {
        /// Horizontal offset
        dx: f64,
        /// Vertical offset
        dy: f64,
    },
    /// Scroll by a relative offset
    PointerScroll {
        /// Horizontal offset
        dx: f64,
        /// Vertical offset
        dy: f64,
    },
    /// Click at the pointer position
    PointerClick,
    /// Read the volume level
    GetVolume,
    /// Set the volume level in `0.0..=1.0`
    SetVolume(f32),
    /// Step the volume up
    VolumeUp,
    /// Step the volume down
    VolumeDown,
    /// Read the mute flag
    GetMute,
    /// Set the mute flag
    SetMute(bool),
    /// Load and play media
    PlayMedia(MediaInfo),
    /// Display an image
    DisplayImage(MediaInfo),
    /// Close the loaded media
    CloseMedia,
    /// Resume playback
    Play,
    /// Pause playback
    Pause,
    /// Stop playback
    Stop,
    /// Seek to an absolute position
    Seek(Duration),
    /// Read the playback position
    GetPosition,
    /// Read the media duration
    GetDuration,
    /// Read the playback state
    GetPlayState,
    /// Launch a web application
    LaunchWebApp {
        /// Application identifier
        app_id: String,
        /// Launch parameters
        params: Option<Value>,
    },
    /// Join a running web application
    JoinWebApp {
        /// Application identifier
        app_id: String,
    },
    /// Close the current web application
    CloseWebApp,
    /// Send a message to the current web application
    SendWebAppMessage(Value),
}

impl Request {
    /// Capability group the request belongs to
    pub fn group(&self) -> CapabilityGroup {
        match self {
            Request::Key(_) | Request::SendKeyCode(_) => CapabilityGroup::KeyControl,
            Request::PointerMove { .. } | Request::PointerScroll { .. } | Request::PointerClick => {
                CapabilityGroup::MouseControl
            }
            Request::GetVolume
            | Request::SetVolume(_)
            | Request::VolumeUp
            | Request::VolumeDown
            | Request::GetMute
            | Request::SetMute(_) => CapabilityGroup::VolumeControl,
            Request::PlayMedia(_) | Request::DisplayImage(_) | Request::CloseMedia => {
                CapabilityGroup::MediaPlayer
            }
            Request::Play
            | Request::Pause
            | Request::Stop
            | Request::Seek(_)
            | Request::GetPosition
            | Request::GetDuration
            | Request::GetPlayState => CapabilityGroup::MediaControl,
            Request::LaunchWebApp { .. }
            | Request::JoinWebApp { .. }
            | Request::CloseWebApp
            | Request::SendWebAppMessage(_) => CapabilityGroup::WebAppLauncher,
        }
    }

    /// Operation name within the group
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Key(key) => key.operation(),
            Request::SendKeyCode(_) => "Send.KeyCode",
            Request::PointerMove { .. } => "Move",
            Request::PointerScroll { .. } => "Scroll",
            Request::PointerClick => "Click",
            Request::GetVolume => "Get",
            Request::SetVolume(_) => "Set",
            Request::VolumeUp => "Up",
            Request::VolumeDown => "Down",
            Request::GetMute => "Mute.Get",
            Request::SetMute(_) => "Mute.Set",
            Request::PlayMedia(_) => "Play.Media",
            Request::DisplayImage(_) => "Display.Image",
            Request::CloseMedia => "Close",
            Request::Play => "Play",
            Request::Pause => "Pause",
            Request::Stop => "Stop",
            Request::Seek(_) => "Seek",
            Request::GetPosition => "Position",
            Request::GetDuration => "Duration",
            Request::GetPlayState => "PlayState",
            Request::LaunchWebApp { .. } => "Launch",
            Request::JoinWebApp { .. } => "Join",
            Request::CloseWebApp => "Close",
            Request::SendWebAppMessage(_) => "Message.Send",
        }
    }

    /// Fine-grained capability name, e.g. `KeyControl.Up`
    pub fn capability_name(&self) -> String {
        format!("{}.{}", self.group(), self.operation())
    }

    /// Build a request from a group name, operation name and argument value
    ///
    /// Unknown groups or operations yield `CapabilityNotSupported`; malformed
    /// arguments yield `InvalidArgument`.
    pub fn from_parts(group: &str, operation: &str, args: Value) -> Result<Request> {
        let Some(parsed) = CapabilityGroup::parse(group) else {
            return Err(DeviceError::unsupported(group, operation));
        };
        if !parsed.exports(operation) {
            return Err(DeviceError::unsupported(group, operation));
        }

        let request = match (parsed, operation) {
            (CapabilityGroup::KeyControl, "Send.KeyCode") => {
                Request::SendKeyCode(key_code_arg(&args)?)
            }
            (CapabilityGroup::KeyControl, op) => match Key::from_operation(op) {
                Some(key) => Request::Key(key),
                None => return Err(DeviceError::unsupported(group, operation)),
            },
            (CapabilityGroup::MouseControl, "Move") => {
                let (dx, dy) = offset_args(&args)?;
                Request::PointerMove { dx, dy }
            }
            (CapabilityGroup::MouseControl, "Scroll") => {
                let (dx, dy) = offset_args(&args)?;
                Request::PointerScroll { dx, dy }
            }
            (CapabilityGroup::MouseControl, _) => Request::PointerClick,
            (CapabilityGroup::VolumeControl, "Get") => Request::GetVolume,
            (CapabilityGroup::VolumeControl, "Set") => Request::SetVolume(volume_arg(&args)?),
            (CapabilityGroup::VolumeControl, "Up") => Request::VolumeUp,
            (CapabilityGroup::VolumeControl, "Down") => Request::VolumeDown,
            (CapabilityGroup::VolumeControl, "Mute.Get") => Request::GetMute,
            (CapabilityGroup::VolumeControl, _) => Request::SetMute(flag_arg(&args, "muted")?),
            (CapabilityGroup::MediaPlayer, "Play.Media") => {
                Request::PlayMedia(MediaInfo::from_value(&args)?)
            }
            (CapabilityGroup::MediaPlayer, "Display.Image") => {
                Request::DisplayImage(MediaInfo::from_value(&args)?)
            }
            (CapabilityGroup::MediaPlayer, _) => Request::CloseMedia,
            (CapabilityGroup::MediaControl, "Play") => Request::Play,
            (CapabilityGroup::MediaControl, "Pause") => Request::Pause,
            (CapabilityGroup::MediaControl, "Stop") => Request::Stop,
            (CapabilityGroup::MediaControl, "Seek") => Request::Seek(position_arg(&args)?),
            (CapabilityGroup::MediaControl, "Position") => Request::GetPosition,
            (CapabilityGroup::MediaControl, "Duration") => Request::GetDuration,
            (CapabilityGroup::MediaControl, _) => Request::GetPlayState,
            (CapabilityGroup::WebAppLauncher, "Launch") => Request::LaunchWebApp {
                app_id: app_id_arg(&args)?,
                params: args.get("params").cloned(),
            },
            (CapabilityGroup::WebAppLauncher, "Join") => Request::JoinWebApp {
                app_id: app_id_arg(&args)?,
            },
            (CapabilityGroup::WebAppLauncher, "Close") => Request::CloseWebApp,
            (CapabilityGroup::WebAppLauncher, _) => Request::SendWebAppMessage(args),
        };
        Ok(request)
    }
}

fn field_or_self<'a>(args: &'a Value, field: &str) -> &'a Value {
    args.get(field).unwrap_or(args)
}

fn key_code_arg(args: &Value) -> Result<u32> {
    field_or_self(args, "keyCode")
        .as_integer()
        .and_then(|code| u32::try_from(code).ok())
        .ok_or_else(|| DeviceError::invalid_argument("key code must be a non-negative integer"))
}

fn offset_args(args: &Value) -> Result<(f64, f64)> {
    let dx = args.get("dx").and_then(Value::as_float);
    let dy = args.get("dy").and_then(Value::as_float);
    match (dx, dy) {
        (Some(dx), Some(dy)) if dx.is_finite() && dy.is_finite() => Ok((dx, dy)),
        _ => Err(DeviceError::invalid_argument(
            "expected finite numeric fields dx and dy",
        )),
    }
}

fn volume_arg(args: &Value) -> Result<f32> {
    match field_or_self(args, "volume").as_float() {
        Some(level) if (0.0..=1.0).contains(&level) => Ok(level as f32),
        Some(level) => Err(DeviceError::invalid_argument(format!(
            "volume {} outside 0.0..=1.0",
            level
        ))),
        None => Err(DeviceError::invalid_argument("volume must be a number")),
    }
}

fn flag_arg(args: &Value, field: &str) -> Result<bool> {
    field_or_self(args, field)
        .as_bool()
        .ok_or_else(|| DeviceError::invalid_argument(format!("{} must be a boolean", field)))
}

fn position_arg(args: &Value) -> Result<Duration> {
    field_or_self(args, "position")
        .as_float()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            DeviceError::invalid_argument("position must be a non-negative number of seconds")
        })
}

fn app_id_arg(args: &Value) -> Result<String> {
    field_or_self(args, "appId")
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DeviceError::invalid_argument("appId must be a non-empty string"))
}
