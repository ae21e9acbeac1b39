//! In-memory layer driver and compute engine.
//!
//! Backs the test suite and the demo binary. Completions are delivered from
//! spawned threads, the way a real engine raises notifications on its own
//! callback threads, so the arm-before-fire path is exercised for real.
//! Both doubles record every call in order and support per-operation fault
//! injection; handles to the shared state survive `Clone`, so a test can
//! keep one half and hand the other to the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::hcs::compute::{
    CallbackToken, ComputeEngine, EngineCall, Notification, NotificationHandler, ProcessHandle,
    SystemHandle,
};
use crate::hcs::latch::{
    NOTIFY_PROCESS_EXIT, NOTIFY_SYSTEM_CREATE_COMPLETE, NOTIFY_SYSTEM_EXIT,
    NOTIFY_SYSTEM_START_COMPLETE,
};
use crate::hcs::layer::{DriverInfo, LayerDescriptor, LayerDriver};
use crate::hcs::NativeResult;

#[derive(Default)]
struct DriverInner {
    calls: Vec<String>,
    faults: HashMap<&'static str, u32>,
}

/// Recording in-memory [`LayerDriver`].
#[derive(Clone, Default)]
pub struct SimLayerDriver {
    inner: Arc<Mutex<DriverInner>>,
}

impl SimLayerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail with `code` (op names match the trait methods).
    pub fn fail(&self, op: &'static str, code: u32) {
        self.inner.lock().faults.insert(op, code);
    }

    /// Operation names invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    fn record(&self, op: &'static str) -> NativeResult {
        let mut inner = self.inner.lock();
        inner.calls.push(op.to_string());
        match inner.faults.get(op) {
            Some(&code) => Err(code),
            None => Ok(()),
        }
    }
}

impl LayerDriver for SimLayerDriver {
    fn create_layer(
        &self,
        _info: &DriverInfo,
        _name: &str,
        _parent_name: &str,
        _ancestors: &[LayerDescriptor],
    ) -> NativeResult {
        self.record("create_layer")
    }

    fn activate_layer(&self, _info: &DriverInfo, _name: &str) -> NativeResult {
        self.record("activate_layer")
    }

    fn prepare_layer(
        &self,
        _info: &DriverInfo,
        _name: &str,
        _ancestors: &[LayerDescriptor],
    ) -> NativeResult {
        self.record("prepare_layer")
    }

    fn layer_mount_path(&self, _info: &DriverInfo, name: &str) -> NativeResult<String> {
        self.record("layer_mount_path")?;
        Ok(format!("/volumes/{name}"))
    }

    fn unprepare_layer(&self, _info: &DriverInfo, _name: &str) -> NativeResult {
        self.record("unprepare_layer")
    }

    fn deactivate_layer(&self, _info: &DriverInfo, _name: &str) -> NativeResult {
        self.record("deactivate_layer")
    }

    fn destroy_layer(&self, _info: &DriverInfo, _name: &str) -> NativeResult {
        self.record("destroy_layer")
    }
}

type SharedHandler = Arc<dyn Fn(Notification) + Send + Sync>;

#[derive(Default)]
struct EngineInner {
    calls: Vec<String>,
    faults: HashMap<&'static str, u32>,
    next_id: u64,
    systems: Vec<String>,
    system_handlers: HashMap<u64, SharedHandler>,
    duplicate_delivery: bool,
}

/// Recording in-memory [`ComputeEngine`] with thread-delivered completions.
#[derive(Clone, Default)]
pub struct SimComputeEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl SimComputeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail with `code` (op names match the trait methods).
    pub fn fail(&self, op: &'static str, code: u32) {
        self.inner.lock().faults.insert(op, code);
    }

    /// Deliver every notification twice, as a redelivering engine would.
    pub fn duplicate_delivery(&self, enabled: bool) {
        self.inner.lock().duplicate_delivery = enabled;
    }

    /// Operation names invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    fn record(&self, op: &'static str) -> NativeResult {
        let mut inner = self.inner.lock();
        inner.calls.push(op.to_string());
        match inner.faults.get(op) {
            Some(&code) => Err(code),
            None => Ok(()),
        }
    }

    fn next_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        inner.next_id
    }

    /// Deliver `code` through `handler` on a detached thread.
    fn deliver(&self, handler: SharedHandler, code: u32) {
        let copies = if self.inner.lock().duplicate_delivery { 2 } else { 1 };
        thread::spawn(move || {
            for _ in 0..copies {
                handler(Notification {
                    code,
                    status: 0,
                    payload: None,
                });
            }
        });
    }

    fn system_handler(&self, system: &SystemHandle) -> Option<SharedHandler> {
        self.inner.lock().system_handlers.get(&system.0).cloned()
    }
}

impl ComputeEngine for SimComputeEngine {
    fn create_system(&self, name: &str, _config_json: &str) -> EngineCall<SystemHandle> {
        if let Err(code) = self.record("create_system") {
            return EngineCall::Fault(code);
        }
        let id = self.next_id();
        self.inner.lock().systems.push(name.to_string());
        EngineCall::Pending(SystemHandle(id))
    }

    fn start_system(&self, system: &SystemHandle) -> EngineCall<()> {
        if let Err(code) = self.record("start_system") {
            return EngineCall::Fault(code);
        }
        if let Some(handler) = self.system_handler(system) {
            self.deliver(handler, NOTIFY_SYSTEM_START_COMPLETE);
        }
        EngineCall::Pending(())
    }

    fn terminate_system(&self, system: &SystemHandle) -> EngineCall<()> {
        if let Err(code) = self.record("terminate_system") {
            return EngineCall::Fault(code);
        }
        if let Some(handler) = self.system_handler(system) {
            self.deliver(handler, NOTIFY_SYSTEM_EXIT);
        }
        EngineCall::Pending(())
    }

    fn create_process(
        &self,
        _system: &SystemHandle,
        _config_json: &str,
    ) -> EngineCall<ProcessHandle> {
        if let Err(code) = self.record("create_process") {
            return EngineCall::Fault(code);
        }
        EngineCall::Complete(ProcessHandle(self.next_id()))
    }

    fn enumerate_systems(&self, _query: &str) -> NativeResult<String> {
        self.record("enumerate_systems")?;
        let systems = self.inner.lock().systems.clone();
        serde_json::to_string(&systems).map_err(|_| 1)
    }

    fn register_system_callback(
        &self,
        system: &SystemHandle,
        handler: NotificationHandler,
    ) -> NativeResult<CallbackToken> {
        self.record("register_system_callback")?;
        let handler: SharedHandler = Arc::from(handler);
        self.inner
            .lock()
            .system_handlers
            .insert(system.0, Arc::clone(&handler));
        // The system was created before registration; its create-complete
        // notification arrives as soon as a callback is in place.
        self.deliver(handler, NOTIFY_SYSTEM_CREATE_COMPLETE);
        Ok(CallbackToken(self.next_id()))
    }

    fn register_process_callback(
        &self,
        _process: &ProcessHandle,
        handler: NotificationHandler,
    ) -> NativeResult<CallbackToken> {
        self.record("register_process_callback")?;
        // The simulated process exits as soon as its exit can be observed.
        self.deliver(Arc::from(handler), NOTIFY_PROCESS_EXIT);
        Ok(CallbackToken(self.next_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_records_calls_in_order() {
        let driver = SimLayerDriver::new();
        let info = DriverInfo::new("/layers");
        driver.create_layer(&info, "leaf", "base", &[]).unwrap();
        driver.activate_layer(&info, "leaf").unwrap();
        assert_eq!(driver.calls(), vec!["create_layer", "activate_layer"]);
    }

    #[test]
    fn test_driver_fault_injection() {
        let driver = SimLayerDriver::new();
        driver.fail("activate_layer", 5);
        let info = DriverInfo::new("/layers");
        assert_eq!(driver.activate_layer(&info, "leaf"), Err(5));
        // Other operations are unaffected.
        assert!(driver.unprepare_layer(&info, "leaf").is_ok());
    }

    #[test]
    fn test_engine_lists_created_systems() {
        let engine = SimComputeEngine::new();
        let EngineCall::Pending(_handle) = engine.create_system("leaf", "{}") else {
            panic!("expected pending");
        };
        let listing = engine.enumerate_systems("{}").unwrap();
        assert!(listing.contains("leaf"));
    }

    #[test]
    fn test_engine_fault_injection() {
        let engine = SimComputeEngine::new();
        engine.fail("terminate_system", 7);
        let EngineCall::Pending(system) = engine.create_system("leaf", "{}") else {
            panic!("expected pending");
        };
        assert_eq!(engine.terminate_system(&system), EngineCall::Fault(7));
    }
}
