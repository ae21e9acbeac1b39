//! Compute engine contract: asynchronous system/process requests.

use super::latch::NotificationKind;
use super::NativeResult;

/// Opaque identity of one compute system, owned by the orchestrator for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemHandle(pub u64);

/// Opaque identity of one process inside a compute system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub u64);

/// Registration receipt for a notification callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackToken(pub u64);

/// Completion event delivered on an engine-owned thread.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Native notification code; see [`NotificationKind::from_code`].
    pub code: u32,
    /// Native status of the completed request.
    pub status: i32,
    /// Optional payload text attached by the engine.
    pub payload: Option<String>,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::from_code(self.code)
    }
}

/// Callback invoked by the engine for every notification on a handle.
///
/// Replaces the raw context pointer of the native API: the handler owns its
/// captures (in practice the latch guarding the handle) outright.
pub type NotificationHandler = Box<dyn Fn(Notification) + Send + Sync>;

/// Outcome of an engine request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall<T> {
    /// Request accepted; completion arrives later via callback.
    Pending(T),
    /// Request finished synchronously.
    Complete(T),
    /// Request rejected with a native error code.
    Fault(u32),
}

/// Asynchronous compute engine contract.
///
/// `create_system` and `start_system` must come back [`EngineCall::Pending`];
/// `create_process` is synchronous-call / asynchronous-exit and must come
/// back [`EngineCall::Complete`]. Registered handlers run on engine-owned
/// threads, one notification at a time per handle.
#[cfg_attr(test, mockall::automock)]
pub trait ComputeEngine {
    fn create_system(&self, name: &str, config_json: &str) -> EngineCall<SystemHandle>;

    fn start_system(&self, system: &SystemHandle) -> EngineCall<()>;

    fn terminate_system(&self, system: &SystemHandle) -> EngineCall<()>;

    fn create_process(&self, system: &SystemHandle, config_json: &str)
        -> EngineCall<ProcessHandle>;

    /// Diagnostic listing of systems known to the engine, as a JSON document.
    fn enumerate_systems(&self, query: &str) -> NativeResult<String>;

    fn register_system_callback(
        &self,
        system: &SystemHandle,
        handler: NotificationHandler,
    ) -> NativeResult<CallbackToken>;

    fn register_process_callback(
        &self,
        process: &ProcessHandle,
        handler: NotificationHandler,
    ) -> NativeResult<CallbackToken>;
}
