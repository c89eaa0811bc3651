/*!
 * Prelude module for tvlink core.
 *
 * Re-exports the types most device code needs.
 */

pub use crate::error::{Error, Result};

pub use crate::types::{Id, Metadata, Value};

pub use crate::event::{EventBus, EventReceiver, SharedEventBus};

pub use crate::config::{
    CastConfig, Config, ConfigBuilder, ReconnectConfig, SessionConfig, SharedConfig, WebOsConfig,
};

pub use crate::utils::{spawn_and_log, with_timeout, Backoff};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::{init, init_with_config};
