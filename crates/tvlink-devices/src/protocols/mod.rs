/*!
 * Protocol adapters for tvlink.
 *
 * Each adapter translates typed requests into one transport's wire
 * protocol. Adapters are gated behind cargo features of the same name.
 */

#[cfg(feature = "cast")]
pub mod cast;

#[cfg(feature = "webos")]
pub mod webos;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "cast")]
pub use cast::{CastAdapter, CastProvider, CastSessionApi};

#[cfg(feature = "webos")]
pub use webos::{PointerConnector, WebOsPointerAdapter, WebOsPointerProvider, WebSocketConnector};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockAdapter, MockController, MockProvider};
