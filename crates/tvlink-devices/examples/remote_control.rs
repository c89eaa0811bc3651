//! Drives a mock TV through the service registry: key presses, volume,
//! media, a transport loss and the automatic reconnect that follows.
//!
//! Run with `cargo run -p tvlink-devices --example remote_control --features mock`.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use tvlink_core::config::{ReconnectConfig, SessionConfig};
use tvlink_core::types::Id;
use tvlink_devices::protocols::mock::{MockProvider, MOCK_KIND};
use tvlink_devices::{
    CapabilityGroup, DeviceEvent, DeviceInfo, MediaInfo, ProviderRegistry, ServiceRegistry,
    SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    tvlink_core::logging::init_with_filter("debug")?;
    tvlink_devices::init()?;

    let provider = MockProvider::new().auto_respond();
    let mut providers = ProviderRegistry::new();
    providers.register_provider(provider.clone());

    let config = SessionConfig {
        reconnect: Some(ReconnectConfig {
            automatic: true,
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 1_000,
        }),
        ..SessionConfig::default()
    };
    let registry = ServiceRegistry::new(providers, config);

    let tv = registry.select(
        DeviceInfo::new("living-room", "Living Room TV", "192.168.1.20", MOCK_KIND)
            .with_model("Acme", "Vision 55"),
    )?;
    let controller = provider
        .controller(&Id::from("living-room"))
        .context("mock provider kept no controller")?;

    let mut events = tv.subscribe()?;
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DeviceEvent::StateChanged { old_state, new_state, .. } => {
                    info!("Session {} -> {}", old_state, new_state)
                }
                DeviceEvent::ReconnectScheduled { attempt, delay, .. } => {
                    info!("Reconnect attempt {} in {:?}", attempt, delay)
                }
                DeviceEvent::Error { message, .. } => warn!("Device error: {}", message),
                other => info!("Device event: {:?}", other),
            }
        }
    });

    tv.connect().await?;
    info!("Supported capabilities: {}", tv.supported_capabilities());

    let keys = tv.key_control();
    keys.home()?.await?;
    keys.down()?.await?;
    keys.ok()?.await?;

    let level = tv.volume_control().volume()?.await?;
    info!("Volume is {:?}", level.as_float());
    tv.volume_control().set_volume(0.25)?.await?;

    if tv.supports(CapabilityGroup::MediaPlayer) {
        let media = MediaInfo::new("http://example.com/trailer.mp4", "video/mp4")
            .with_title("Trailer");
        tv.media_player().play_media(media)?.await?;
        tv.media_control().seek(Duration::from_secs(30))?.await?;
    }

    controller.close_transport("demo pulled the cable");
    while tv.state() != SessionState::Connected {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("Reconnected after {} handshakes", controller.connect_count());

    keys.back()?.await?;
    registry.disconnect_all().await?;
    Ok(())
}
