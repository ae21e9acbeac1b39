//! Single-shot container lifecycle orchestration.
//!
//! One thread drives the whole sequence: provision the CoW layer chain,
//! create and start the compute system, run one process to completion, then
//! tear everything down in reverse. Asynchronous engine requests are bridged
//! back into this thread through one [`NotificationLatch`] per handle.
//!
//! Failure policy is split in two. Acquisition faults (everything up to the
//! process exiting) abort the run immediately and leave completed steps in
//! place — no rollback is attempted, so callers must treat a failed run as
//! "host resource state unknown". Teardown faults are logged and skipped
//! past; teardown never aborts.

use std::sync::Arc;

use crate::config::NspawnConfig;
use crate::hcs::compute::{
    ComputeEngine, EngineCall, Notification, NotificationHandler, SystemHandle,
};
use crate::hcs::latch::{NotificationKind, NotificationLatch};
use crate::hcs::layer::{collect_ancestor_layers, ContainerLayer, DriverInfo, LayerDriver};
use crate::{Error, Result};

/// Explicit program counter of the lifecycle sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    LayerCreated,
    LayerActivated,
    LayerPrepared,
    VolumeMounted,
    SystemCreatePending,
    SystemCreated,
    SystemCallbackRegistered,
    SystemStartPending,
    SystemStarted,
    ProcessCreated,
    ProcessCallbackRegistered,
    ProcessExited,
    SystemTerminatePending,
    SystemTerminated,
    LayerUnprepared,
    LayerDeactivated,
    LayerDestroyed,
    Done,
}

impl LifecycleState {
    /// Every state, in transition order.
    pub const ALL: [LifecycleState; 19] = [
        LifecycleState::Init,
        LifecycleState::LayerCreated,
        LifecycleState::LayerActivated,
        LifecycleState::LayerPrepared,
        LifecycleState::VolumeMounted,
        LifecycleState::SystemCreatePending,
        LifecycleState::SystemCreated,
        LifecycleState::SystemCallbackRegistered,
        LifecycleState::SystemStartPending,
        LifecycleState::SystemStarted,
        LifecycleState::ProcessCreated,
        LifecycleState::ProcessCallbackRegistered,
        LifecycleState::ProcessExited,
        LifecycleState::SystemTerminatePending,
        LifecycleState::SystemTerminated,
        LifecycleState::LayerUnprepared,
        LifecycleState::LayerDeactivated,
        LifecycleState::LayerDestroyed,
        LifecycleState::Done,
    ];
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Drives one container run end to end over the injected facades.
pub struct Orchestrator<D, E> {
    driver: D,
    engine: E,
    state: LifecycleState,
    visited: Vec<LifecycleState>,
    progress: Vec<String>,
}

impl<D: LayerDriver, E: ComputeEngine> Orchestrator<D, E> {
    pub fn new(driver: D, engine: E) -> Self {
        Self {
            driver,
            engine,
            state: LifecycleState::Init,
            visited: Vec::new(),
            progress: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// States reached by the last run, in order.
    pub fn visited(&self) -> &[LifecycleState] {
        &self.visited
    }

    /// Ordered progress log of the last run.
    pub fn progress(&self) -> &[String] {
        &self.progress
    }

    /// Run the full lifecycle: spawn the process and wait for it to exit.
    pub fn spawn_and_wait(&mut self, config: &NspawnConfig) -> Result<()> {
        self.visited.clear();
        self.progress.clear();
        self.state = LifecycleState::Init;
        self.visited.push(LifecycleState::Init);

        config.validate()?;
        tracing::debug!(config = %serde_json::to_string(config)?, "starting container run");

        let (base_path, parent_layer_name) = config.parent_layer_split()?;
        let driver_info = DriverInfo::new(&base_path);
        let ancestors = collect_ancestor_layers(&base_path, &parent_layer_name);
        let descriptors: Vec<_> = ancestors.iter().map(ContainerLayer::descriptor).collect();
        let layer = ContainerLayer::generate(&base_path);

        self.driver
            .create_layer(&driver_info, layer.name(), &parent_layer_name, &descriptors)
            .map_err(|code| {
                Error::driver(
                    "CreateLayer",
                    format!(
                        "layer_name: [{}], parent_layer_name: [{parent_layer_name}],",
                        layer.name()
                    ),
                    code,
                )
            })?;
        self.advance(LifecycleState::LayerCreated);
        self.note(format!("Layer created, name: [{}]", layer.name()));

        self.driver
            .activate_layer(&driver_info, layer.name())
            .map_err(|code| {
                Error::driver("ActivateLayer", format!("layer_name: [{}],", layer.name()), code)
            })?;
        self.advance(LifecycleState::LayerActivated);
        self.note(format!("Layer activated, name: [{}]", layer.name()));

        self.driver
            .prepare_layer(&driver_info, layer.name(), &descriptors)
            .map_err(|code| {
                Error::driver("PrepareLayer", format!("layer_name: [{}],", layer.name()), code)
            })?;
        self.advance(LifecycleState::LayerPrepared);
        self.note(format!("Layer prepared, name: [{}]", layer.name()));

        let volume_path = self
            .driver
            .layer_mount_path(&driver_info, layer.name())
            .map_err(|code| {
                Error::driver(
                    "GetLayerMountPath",
                    format!("layer_name: [{}],", layer.name()),
                    code,
                )
            })?;
        self.advance(LifecycleState::VolumeMounted);
        self.note(format!(
            "Found volume path: [{volume_path}] for layer, name: [{}]",
            layer.name()
        ));

        // The document clones the leaf and ancestor layers; the orchestrator
        // keeps its own copies for teardown.
        let container_doc =
            config.container_document(&base_path, &volume_path, layer.clone(), ancestors.clone());
        let container_json = serde_json::to_string(&container_doc)?;

        self.advance(LifecycleState::SystemCreatePending);
        let system = match self.engine.create_system(layer.name(), &container_json) {
            EngineCall::Pending(handle) => handle,
            EngineCall::Complete(_) => {
                return Err(Error::engine(
                    "CreateSystem",
                    format!("config: [{container_json}], expected pending status,"),
                    0,
                ));
            }
            EngineCall::Fault(code) => {
                return Err(Error::engine(
                    "CreateSystem",
                    format!("config: [{container_json}],"),
                    code,
                ));
            }
        };
        self.advance(LifecycleState::SystemCreated);
        self.note(format!("Container created, name: [{}]", layer.name()));

        // Arm before registering: the create-complete notification may fire
        // on the engine thread before this thread reaches the wait.
        let system_latch = Arc::new(NotificationLatch::new());
        let armed = system_latch.arm();
        match self
            .engine
            .register_system_callback(&system, notification_handler("system", &system_latch))
        {
            Ok(_token) => {
                self.advance(LifecycleState::SystemCallbackRegistered);
                armed.wait(NotificationKind::SystemCreateComplete)?;
                tracing::debug!(name = layer.name(), "system create completion observed");
            }
            Err(code) => {
                // Degraded path: the run continues without having observed
                // the create completion.
                drop(armed);
                self.advance(LifecycleState::SystemCallbackRegistered);
                self.note_err(format!(
                    "'RegisterSystemCallback' failed, name: [{}], error: [{code:#010x}]",
                    layer.name()
                ));
            }
        }

        // Diagnostic only; the listing is logged and otherwise unused.
        match self.engine.enumerate_systems("{}") {
            Ok(listing) => tracing::debug!(%listing, "compute systems"),
            Err(code) => self.note_err(format!(
                "'EnumerateSystems' failed, error: [{code:#010x}]"
            )),
        }

        self.advance(LifecycleState::SystemStartPending);
        let armed = system_latch.arm();
        match self.engine.start_system(&system) {
            EngineCall::Pending(()) => {}
            EngineCall::Complete(()) => {
                return Err(Error::engine(
                    "StartSystem",
                    format!("name: [{}], expected pending status,", layer.name()),
                    0,
                ));
            }
            EngineCall::Fault(code) => {
                return Err(Error::engine(
                    "StartSystem",
                    format!("name: [{}],", layer.name()),
                    code,
                ));
            }
        }
        armed.wait(NotificationKind::SystemStartComplete)?;
        self.advance(LifecycleState::SystemStarted);
        self.note(format!("Container started, name: [{}]", layer.name()));

        let process_json = serde_json::to_string(&config.process_document())?;
        tracing::debug!(config = %process_json, "creating process");
        let process = match self.engine.create_process(&system, &process_json) {
            EngineCall::Complete(handle) => handle,
            EngineCall::Pending(_) => {
                return Err(Error::engine(
                    "CreateProcess",
                    format!("config: [{process_json}], unexpected pending status,"),
                    0,
                ));
            }
            EngineCall::Fault(code) => {
                return Err(Error::engine(
                    "CreateProcess",
                    format!("config: [{process_json}],"),
                    code,
                ));
            }
        };
        self.advance(LifecycleState::ProcessCreated);
        self.note("Process created".to_string());

        // The process gets its own latch; system and process notifications
        // never contend on the same mutex.
        let process_latch = Arc::new(NotificationLatch::new());
        let armed = process_latch.arm();
        match self
            .engine
            .register_process_callback(&process, notification_handler("process", &process_latch))
        {
            Ok(_token) => {
                self.advance(LifecycleState::ProcessCallbackRegistered);
                armed.wait(NotificationKind::ProcessExit)?;
                tracing::debug!(name = layer.name(), "process exit observed");
            }
            Err(code) => {
                drop(armed);
                self.advance(LifecycleState::ProcessCallbackRegistered);
                self.note_err(format!(
                    "'RegisterProcessCallback' failed, name: [{}], error: [{code:#010x}]",
                    layer.name()
                ));
            }
        }
        self.advance(LifecycleState::ProcessExited);

        self.teardown(&driver_info, &layer, &system, &system_latch);
        Ok(())
    }

    /// Best-effort reverse teardown: every fault is logged and the next step
    /// runs regardless.
    fn teardown(
        &mut self,
        driver_info: &DriverInfo,
        layer: &ContainerLayer,
        system: &SystemHandle,
        system_latch: &Arc<NotificationLatch>,
    ) {
        self.advance(LifecycleState::SystemTerminatePending);
        let armed = system_latch.arm();
        match self.engine.terminate_system(system) {
            EngineCall::Pending(()) => {
                // SystemExit is a recognized kind, the wait cannot fail.
                let _ = armed.wait(NotificationKind::SystemExit);
                self.note(format!("Container terminated, name: [{}]", layer.name()));
            }
            EngineCall::Complete(()) => {
                self.note(format!("Container terminated, name: [{}]", layer.name()));
            }
            EngineCall::Fault(code) => {
                // Never wait on a request the engine did not accept.
                self.note_err(format!(
                    "'TerminateSystem' failed, name: [{}], error: [{code:#010x}]",
                    layer.name()
                ));
            }
        }
        self.advance(LifecycleState::SystemTerminated);

        match self.driver.unprepare_layer(driver_info, layer.name()) {
            Ok(()) => self.note(format!("Layer unprepared, name: [{}]", layer.name())),
            Err(code) => self.note_err(format!(
                "'UnprepareLayer' failed, name: [{}], error: [{code:#010x}]",
                layer.name()
            )),
        }
        self.advance(LifecycleState::LayerUnprepared);

        match self.driver.deactivate_layer(driver_info, layer.name()) {
            Ok(()) => self.note(format!("Layer deactivated, name: [{}]", layer.name())),
            Err(code) => self.note_err(format!(
                "'DeactivateLayer' failed, name: [{}], error: [{code:#010x}]",
                layer.name()
            )),
        }
        self.advance(LifecycleState::LayerDeactivated);

        match self.driver.destroy_layer(driver_info, layer.name()) {
            Ok(()) => self.note(format!("Layer destroyed, name: [{}]", layer.name())),
            Err(code) => self.note_err(format!(
                "'DestroyLayer' failed, name: [{}], error: [{code:#010x}]",
                layer.name()
            )),
        }
        self.advance(LifecycleState::LayerDestroyed);

        self.advance(LifecycleState::Done);
        self.note("SHUTDOWN".to_string());
    }

    fn advance(&mut self, state: LifecycleState) {
        self.state = state;
        self.visited.push(state);
        tracing::debug!(state = %state, "lifecycle transition");
    }

    fn note(&mut self, line: String) {
        tracing::info!("{line}");
        self.progress.push(line);
    }

    fn note_err(&mut self, line: String) {
        tracing::error!("{line}");
        self.progress.push(format!("ERROR: {line}"));
    }
}

fn notification_handler(
    scope: &'static str,
    latch: &Arc<NotificationLatch>,
) -> NotificationHandler {
    let latch = Arc::clone(latch);
    Box::new(move |n: Notification| {
        tracing::info!(
            scope,
            code = n.code,
            status = n.status,
            payload = n.payload.as_deref().unwrap_or(""),
            "notification received"
        );
        latch.signal(n.kind());
    })
}

/// Run one container from a raw configuration document.
///
/// Returns `None` on success, or the single diagnostic line describing the
/// failing step.
pub fn spawn_and_wait_json<D: LayerDriver, E: ComputeEngine>(
    config_json: &str,
    driver: D,
    engine: E,
) -> Option<String> {
    let config = match NspawnConfig::from_json(config_json) {
        Ok(config) => config,
        Err(err) => return Some(err.to_string()),
    };
    Orchestrator::new(driver, engine)
        .spawn_and_wait(&config)
        .err()
        .map(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcs::compute::MockComputeEngine;
    use crate::hcs::layer::MockLayerDriver;

    fn test_config() -> NspawnConfig {
        NspawnConfig::builder()
            .process_executable("/bin/true")
            .process_directory("/work")
            .mapped_directory("/mnt/x")
            .parent_layer_directory("/layers/base")
            .build()
    }

    #[test]
    fn test_prepare_failure_aborts_before_any_engine_call() {
        let mut driver = MockLayerDriver::new();
        driver.expect_create_layer().returning(|_, _, _, _| Ok(()));
        driver.expect_activate_layer().returning(|_, _| Ok(()));
        driver
            .expect_prepare_layer()
            .returning(|_, _, _| Err(0x8007_0005));
        // No expectations on the engine or the teardown calls: any such call
        // panics the test.
        let engine = MockComputeEngine::new();

        let mut orchestrator = Orchestrator::new(driver, engine);
        let err = orchestrator.spawn_and_wait(&test_config()).unwrap_err();

        assert!(matches!(err, Error::Driver { op: "PrepareLayer", .. }));
        assert_eq!(
            orchestrator.visited(),
            &[
                LifecycleState::Init,
                LifecycleState::LayerCreated,
                LifecycleState::LayerActivated,
            ]
        );
    }

    #[test]
    fn test_create_system_must_return_pending() {
        let mut driver = MockLayerDriver::new();
        driver.expect_create_layer().returning(|_, _, _, _| Ok(()));
        driver.expect_activate_layer().returning(|_, _| Ok(()));
        driver.expect_prepare_layer().returning(|_, _, _| Ok(()));
        driver
            .expect_layer_mount_path()
            .returning(|_, name| Ok(format!("/volumes/{name}")));

        let mut engine = MockComputeEngine::new();
        engine
            .expect_create_system()
            .returning(|_, _| EngineCall::Complete(crate::hcs::SystemHandle(1)));

        let mut orchestrator = Orchestrator::new(driver, engine);
        let err = orchestrator.spawn_and_wait(&test_config()).unwrap_err();

        assert!(matches!(err, Error::Engine { op: "CreateSystem", .. }));
        assert_eq!(orchestrator.state(), LifecycleState::SystemCreatePending);
    }

    #[test]
    fn test_invalid_config_fails_before_driver_calls() {
        let driver = MockLayerDriver::new();
        let engine = MockComputeEngine::new();
        let config = NspawnConfig::builder().build();

        let mut orchestrator = Orchestrator::new(driver, engine);
        let err = orchestrator.spawn_and_wait(&config).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_spawn_and_wait_json_reports_decode_failures() {
        let driver = MockLayerDriver::new();
        let engine = MockComputeEngine::new();
        let diagnostic = spawn_and_wait_json("not json", driver, engine);
        assert!(diagnostic.is_some());
    }
}
