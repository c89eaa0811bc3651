/*!
 * Command dispatcher.
 *
 * Checks capability requests against the session state, hands them to the
 * adapter and keeps the pending-command table. Every entry leaves the table
 * exactly once: through a response, a timeout, a transmit failure or a
 * session teardown. Entries are removed before their continuation runs, so a
 * continuation may submit further commands.
 */
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use tvlink_core::types::{Id, Value};

use crate::capability::{CapabilityGroup, CapabilitySet};
use crate::device::{DeviceError, Result, SessionState};
use crate::protocol::{CommandId, ProtocolAdapter};
use crate::request::Request;

/// Callback receiving the outcome of a command
pub type Continuation = Box<dyn FnOnce(Result<Value>) + Send + 'static>;

/// Build a continuation from separate success and failure callbacks
pub fn callbacks<S, F>(on_success: S, on_failure: F) -> Continuation
where
    S: FnOnce(Value) + Send + 'static,
    F: FnOnce(DeviceError) + Send + 'static,
{
    Box::new(move |result| match result {
        Ok(value) => on_success(value),
        Err(error) => on_failure(error),
    })
}

/// A command waiting for its outcome
pub struct PendingCommand {
    /// Command id
    pub id: CommandId,
    /// Capability name, e.g. `KeyControl.Up`
    pub capability: String,
    /// When the command was submitted
    pub submitted_at: Instant,
    continuation: Continuation,
}

impl PendingCommand {
    fn complete(self, result: Result<Value>) {
        (self.continuation)(result);
    }
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

type PendingTable = Arc<Mutex<HashMap<CommandId, PendingCommand>>>;

/// Future resolving to the outcome of a submitted command
///
/// Resolves to `SessionLost` if the command is discarded without an outcome.
#[derive(Debug)]
pub struct Completion {
    id: CommandId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl Completion {
    /// Continuation feeding a completion, and the receiving half
    pub(crate) fn channel() -> (Continuation, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let continuation: Continuation = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (continuation, rx)
    }

    pub(crate) fn new(id: CommandId, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { id, rx }
    }

    /// Id of the command
    pub fn id(&self) -> CommandId {
        self.id
    }
}

impl Future for Completion {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received
                .unwrap_or_else(|_| Err(DeviceError::session_lost("command dropped without a result")))
        })
    }
}

/// Command dispatcher for one device session
#[derive(Debug)]
pub struct CommandDispatcher {
    device_id: Id,
    next_id: AtomicU64,
    pending: PendingTable,
}

impl CommandDispatcher {
    /// Create a dispatcher with an empty pending table
    pub fn new(device_id: Id) -> Self {
        Self {
            device_id,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check the preconditions of a request
    ///
    /// Capability support is checked before connection state.
    pub fn check(state: SessionState, supported: &CapabilitySet, request: &Request) -> Result<()> {
        Self::check_group(state, supported, request.group(), request.operation())
    }

    /// Check the preconditions of an operation before its arguments exist
    pub fn check_group(
        state: SessionState,
        supported: &CapabilitySet,
        group: CapabilityGroup,
        operation: &str,
    ) -> Result<()> {
        if !supported.contains(group) {
            return Err(DeviceError::unsupported(group, operation));
        }
        if !state.accepts_commands() {
            return Err(DeviceError::NotConnected);
        }
        Ok(())
    }

    /// Submit a request
    ///
    /// Precondition failures are returned synchronously and the continuation
    /// is dropped unused. Otherwise the continuation runs exactly once. The
    /// state lock is held from the check until the adapter has taken the
    /// command, so a concurrent teardown either sees the entry or rejects it.
    pub fn invoke(
        &self,
        state: &RwLock<SessionState>,
        supported: &RwLock<CapabilitySet>,
        adapter: &dyn ProtocolAdapter,
        request: &Request,
        continuation: Continuation,
        timeout: Option<(Handle, Duration)>,
    ) -> Result<CommandId> {
        let capability = request.capability_name();
        let (id, transmitted) = {
            let state = state.read();
            let supported = supported.read();
            Self::check(*state, &supported, request)?;

            let id = CommandId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.pending.lock().insert(
                id,
                PendingCommand {
                    id,
                    capability: capability.clone(),
                    submitted_at: Instant::now(),
                    continuation,
                },
            );
            debug!(device = %self.device_id, command = %id, %capability, "Transmitting command");
            (id, adapter.transmit(id, request))
        };

        match transmitted {
            Ok(()) => {
                if let Some((handle, after)) = timeout {
                    self.arm_timeout(id, &handle, after);
                }
            }
            Err(e) => {
                warn!(device = %self.device_id, command = %id, %capability, "Transmit failed: {}", e);
                self.resolve(id, Err(e));
            }
        }
        Ok(id)
    }

    /// Resolve a pending command
    ///
    /// Returns `false` if the command is no longer pending.
    pub fn resolve(&self, id: CommandId, result: Result<Value>) -> bool {
        let command = self.pending.lock().remove(&id);
        match command {
            Some(command) => {
                trace!(
                    device = %self.device_id,
                    command = %id,
                    elapsed = ?command.submitted_at.elapsed(),
                    ok = result.is_ok(),
                    "Resolving command"
                );
                command.complete(result);
                true
            }
            None => false,
        }
    }

    /// Fail every pending command with `SessionLost`
    ///
    /// Returns how many commands were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, command)| command).collect()
        };
        let count = drained.len();
        if count > 0 {
            debug!(device = %self.device_id, count, "Failing pending commands: {}", reason);
        }
        for command in drained {
            command.complete(Err(DeviceError::session_lost(reason)));
        }
        count
    }

    /// Number of pending commands
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether a command is still pending
    pub fn is_pending(&self, id: CommandId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    fn arm_timeout(&self, id: CommandId, handle: &Handle, after: Duration) {
        let pending = Arc::downgrade(&self.pending);
        let device_id = self.device_id.clone();
        handle.spawn(async move {
            tokio::time::sleep(after).await;
            let Some(pending) = pending.upgrade() else {
                return;
            };
            let expired = pending.lock().remove(&id);
            if let Some(command) = expired {
                warn!(device = %device_id, command = %id, capability = %command.capability, "Command timed out after {:?}", after);
                let message = format!("{} unanswered after {:?}", command.capability, after);
                command.complete(Err(DeviceError::Timeout(message)));
            }
        });
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.fail_all("session released");
    }
}
