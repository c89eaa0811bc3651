/*!
 * Typed capability views.
 *
 * Each view borrows a `DeviceService` and exposes one capability group as
 * plain methods. Views are always available; calling into a group the
 * session does not support fails with `CapabilityNotSupported`.
 */
use std::time::Duration;

use tvlink_core::types::Value;

use crate::capability::CapabilityGroup;
use crate::device::{DeviceError, Result};
use crate::dispatcher::Completion;
use crate::keys::Key;
use crate::request::{MediaInfo, Request};
use crate::service::DeviceService;

macro_rules! capability_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name<'a> {
            service: &'a DeviceService,
        }

        impl<'a> $name<'a> {
            pub(crate) fn new(service: &'a DeviceService) -> Self {
                Self { service }
            }

            fn send(&self, request: Request) -> Result<Completion> {
                self.service.send(request)
            }

            #[allow(dead_code)]
            fn ensure_ready(&self, operation: &str) -> Result<()> {
                self.service.ensure_ready(CapabilityGroup::$name, operation)
            }
        }
    };
}

capability_view!(
    /// Remote-control keys
    KeyControl
);
capability_view!(
    /// Pointer input
    MouseControl
);
capability_view!(
    /// Volume level and mute
    VolumeControl
);
capability_view!(
    /// Loading media onto the device
    MediaPlayer
);
capability_view!(
    /// Transport control of the loaded media
    MediaControl
);
capability_view!(
    /// Web applications
    WebAppLauncher
);

impl KeyControl<'_> {
    /// Press a key
    pub fn press(&self, key: Key) -> Result<Completion> {
        self.send(Request::Key(key))
    }

    /// Press a key by raw protocol key code
    pub fn send_key_code(&self, code: u32) -> Result<Completion> {
        self.send(Request::SendKeyCode(code))
    }

    /// Press the digit key for `n`
    pub fn digit(&self, n: u8) -> Result<Completion> {
        self.ensure_ready(&format!("Num{}", n))?;
        let key = Key::digit(n)
            .ok_or_else(|| DeviceError::invalid_argument(format!("{} is not a digit", n)))?;
        self.press(key)
    }

    /// Navigate up
    pub fn up(&self) -> Result<Completion> {
        self.press(Key::Up)
    }

    /// Navigate down
    pub fn down(&self) -> Result<Completion> {
        self.press(Key::Down)
    }

    /// Navigate left
    pub fn left(&self) -> Result<Completion> {
        self.press(Key::Left)
    }

    /// Navigate right
    pub fn right(&self) -> Result<Completion> {
        self.press(Key::Right)
    }

    /// Confirm
    pub fn ok(&self) -> Result<Completion> {
        self.press(Key::Ok)
    }

    /// Go back
    pub fn back(&self) -> Result<Completion> {
        self.press(Key::Back)
    }

    /// Go home
    pub fn home(&self) -> Result<Completion> {
        self.press(Key::Home)
    }

    /// Open the menu
    pub fn menu(&self) -> Result<Completion> {
        self.press(Key::Menu)
    }

    /// Show information
    pub fn info(&self) -> Result<Completion> {
        self.press(Key::Info)
    }

    /// Leave the current application
    pub fn exit(&self) -> Result<Completion> {
        self.press(Key::Exit)
    }

    /// Toggle closed captions
    pub fn closed_captions(&self) -> Result<Completion> {
        self.press(Key::ClosedCaptions)
    }

    /// Open the list
    pub fn list(&self) -> Result<Completion> {
        self.press(Key::List)
    }
}

impl MouseControl<'_> {
    /// Move the pointer by a relative offset
    pub fn move_by(&self, dx: f64, dy: f64) -> Result<Completion> {
        self.ensure_ready("Move")?;
        finite_offset(dx, dy)?;
        self.send(Request::PointerMove { dx, dy })
    }

    /// Scroll by a relative offset
    pub fn scroll(&self, dx: f64, dy: f64) -> Result<Completion> {
        self.ensure_ready("Scroll")?;
        finite_offset(dx, dy)?;
        self.send(Request::PointerScroll { dx, dy })
    }

    /// Click at the pointer position
    pub fn click(&self) -> Result<Completion> {
        self.send(Request::PointerClick)
    }
}

fn finite_offset(dx: f64, dy: f64) -> Result<()> {
    if dx.is_finite() && dy.is_finite() {
        Ok(())
    } else {
        Err(DeviceError::invalid_argument(format!(
            "pointer offset ({}, {}) is not finite",
            dx, dy
        )))
    }
}

impl VolumeControl<'_> {
    /// Read the volume level
    pub fn volume(&self) -> Result<Completion> {
        self.send(Request::GetVolume)
    }

    /// Set the volume level in `0.0..=1.0`
    pub fn set_volume(&self, level: f32) -> Result<Completion> {
        self.ensure_ready("Set")?;
        if !(0.0..=1.0).contains(&level) {
            return Err(DeviceError::invalid_argument(format!(
                "volume {} outside 0.0..=1.0",
                level
            )));
        }
        self.send(Request::SetVolume(level))
    }

    /// Step the volume up
    pub fn volume_up(&self) -> Result<Completion> {
        self.send(Request::VolumeUp)
    }

    /// Step the volume down
    pub fn volume_down(&self) -> Result<Completion> {
        self.send(Request::VolumeDown)
    }

    /// Read the mute flag
    pub fn mute(&self) -> Result<Completion> {
        self.send(Request::GetMute)
    }

    /// Set the mute flag
    pub fn set_mute(&self, muted: bool) -> Result<Completion> {
        self.send(Request::SetMute(muted))
    }
}

impl MediaPlayer<'_> {
    /// Load and play media
    pub fn play_media(&self, media: MediaInfo) -> Result<Completion> {
        self.send(Request::PlayMedia(media))
    }

    /// Display an image
    pub fn display_image(&self, image: MediaInfo) -> Result<Completion> {
        self.send(Request::DisplayImage(image))
    }

    /// Close the loaded media
    pub fn close(&self) -> Result<Completion> {
        self.send(Request::CloseMedia)
    }
}

impl MediaControl<'_> {
    /// Resume playback
    pub fn play(&self) -> Result<Completion> {
        self.send(Request::Play)
    }

    /// Pause playback
    pub fn pause(&self) -> Result<Completion> {
        self.send(Request::Pause)
    }

    /// Stop playback
    pub fn stop(&self) -> Result<Completion> {
        self.send(Request::Stop)
    }

    /// Seek to an absolute position
    pub fn seek(&self, position: Duration) -> Result<Completion> {
        self.send(Request::Seek(position))
    }

    /// Read the playback position in seconds
    pub fn position(&self) -> Result<Completion> {
        self.send(Request::GetPosition)
    }

    /// Read the media duration in seconds
    pub fn duration(&self) -> Result<Completion> {
        self.send(Request::GetDuration)
    }

    /// Read the playback state
    pub fn play_state(&self) -> Result<Completion> {
        self.send(Request::GetPlayState)
    }
}

impl WebAppLauncher<'_> {
    /// Launch a web application
    pub fn launch(&self, app_id: &str, params: Option<Value>) -> Result<Completion> {
        self.send(Request::LaunchWebApp {
            app_id: app_id.to_string(),
            params,
        })
    }

    /// Join a running web application
    pub fn join(&self, app_id: &str) -> Result<Completion> {
        self.send(Request::JoinWebApp {
            app_id: app_id.to_string(),
        })
    }

    /// Close the current web application
    pub fn close(&self) -> Result<Completion> {
        self.send(Request::CloseWebApp)
    }

    /// Send a message to the current web application
    pub fn send_message(&self, payload: Value) -> Result<Completion> {
        self.send(Request::SendWebAppMessage(payload))
    }
}

#[cfg(test)]
mod tests {
    use tvlink_core::config::SessionConfig;

    use super::*;
    use crate::capability::{AdapterKind, CapabilityGroup};
    use crate::device::DeviceInfo;
    use crate::protocols::mock::{MockAdapter, MockController};

    const KEYS_ONLY: &[CapabilityGroup] = &[CapabilityGroup::KeyControl];

    async fn connected(kind: AdapterKind) -> (DeviceService, MockController) {
        let (adapter, controller) = MockAdapter::with_kind(kind);
        let info = DeviceInfo::new("tv", "TV", "10.0.0.9", kind);
        let service = DeviceService::new(info, Box::new(adapter.with_auto_respond()), SessionConfig::default());
        service.connect().await.unwrap();
        (service, controller)
    }

    #[tokio::test]
    async fn test_key_view_sends_keys() {
        let (service, controller) = connected(AdapterKind::WebOsPointer).await;
        let keys = service.key_control();

        keys.up().unwrap().await.unwrap();
        keys.digit(7).unwrap().await.unwrap();
        keys.send_key_code(1005).unwrap().await.unwrap();

        let sent: Vec<Request> = controller.sent().into_iter().map(|(_, r)| r).collect();
        assert_eq!(
            sent,
            vec![
                Request::Key(Key::Up),
                Request::Key(Key::Num7),
                Request::SendKeyCode(1005)
            ]
        );
        assert!(matches!(keys.digit(12), Err(DeviceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_unsupported_view_fails() {
        let (service, controller) = connected(AdapterKind::Custom {
            name: "keys-only",
            groups: KEYS_ONLY,
        })
        .await;

        assert!(matches!(
            service.volume_control().volume_up(),
            Err(DeviceError::CapabilityNotSupported(name)) if name == "VolumeControl.Up"
        ));
        assert!(matches!(
            service.media_control().seek(Duration::from_secs(3)),
            Err(DeviceError::CapabilityNotSupported(_))
        ));
        assert!(controller.sent().is_empty());
    }

    #[tokio::test]
    async fn test_media_and_volume_views() {
        let (service, controller) = connected(AdapterKind::Cast).await;

        let media = MediaInfo::new("http://example.com/movie.mp4", "video/mp4").with_title("Movie");
        service.media_player().play_media(media.clone()).unwrap().await.unwrap();
        service.media_control().seek(Duration::from_secs(42)).unwrap().await.unwrap();
        let level = service.volume_control().volume().unwrap().await.unwrap();
        assert_eq!(level, Value::from(0.5));
        assert!(matches!(
            service.volume_control().set_volume(2.0),
            Err(DeviceError::InvalidArgument(_))
        ));
        service.web_app_launcher().launch("netflix", None).unwrap().await.unwrap();

        let sent: Vec<Request> = controller.sent().into_iter().map(|(_, r)| r).collect();
        assert_eq!(sent[0], Request::PlayMedia(media));
        assert_eq!(sent[1], Request::Seek(Duration::from_secs(42)));
        assert_eq!(sent.len(), 4);
    }

    #[tokio::test]
    async fn test_preconditions_are_checked_before_arguments() {
        let (adapter, _controller) = MockAdapter::with_kind(AdapterKind::Cast);
        let info = DeviceInfo::new("tv", "TV", "10.0.0.9", AdapterKind::Cast);
        let idle = DeviceService::new(info, Box::new(adapter), SessionConfig::default());
        assert!(matches!(idle.volume_control().set_volume(2.0), Err(DeviceError::NotConnected)));
        assert!(matches!(
            idle.invoke("VolumeControl", "Set", Value::from(5.0)),
            Err(DeviceError::NotConnected)
        ));

        let (keys_only, controller) = connected(AdapterKind::Custom {
            name: "keys-only",
            groups: KEYS_ONLY,
        })
        .await;
        assert!(matches!(
            keys_only.volume_control().set_volume(2.0),
            Err(DeviceError::CapabilityNotSupported(name)) if name == "VolumeControl.Set"
        ));
        assert!(matches!(
            keys_only.invoke("VolumeControl", "Set", Value::from(5.0)),
            Err(DeviceError::CapabilityNotSupported(_))
        ));
        assert!(matches!(
            keys_only.mouse_control().move_by(f64::NAN, 0.0),
            Err(DeviceError::CapabilityNotSupported(_))
        ));
        assert!(matches!(
            keys_only.invoke("KeyControl", "Send.KeyCode", Value::from("abc")),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(controller.sent().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_pointer_offsets_are_rejected() {
        let (service, controller) = connected(AdapterKind::WebOsPointer).await;
        let mouse = service.mouse_control();
        assert!(matches!(mouse.move_by(f64::NAN, 1.0), Err(DeviceError::InvalidArgument(_))));
        assert!(matches!(
            mouse.scroll(0.0, f64::INFINITY),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(controller.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mouse_view() {
        let (service, controller) = connected(AdapterKind::WebOsPointer).await;
        let mouse = service.mouse_control();
        mouse.move_by(10.0, -4.0).unwrap().await.unwrap();
        mouse.click().unwrap().await.unwrap();
        assert_eq!(controller.sent().len(), 2);
    }
}
