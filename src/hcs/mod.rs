//! Facades over the host compute engine and its layer driver.
//!
//! The physical services are external; this module defines the consumed
//! contracts (traits) plus the latch that turns their asynchronous
//! completion callbacks into blocking waits.

pub mod compute;
pub mod latch;
pub mod layer;

pub use compute::{
    CallbackToken, ComputeEngine, EngineCall, Notification, NotificationHandler, ProcessHandle,
    SystemHandle,
};
pub use latch::{ArmedLatch, NotificationKind, NotificationLatch};
pub use layer::{ContainerLayer, DriverInfo, LayerDescriptor, LayerDriver};

/// Outcome of a raw driver/engine call: `Err` carries the native error code.
pub type NativeResult<T = ()> = std::result::Result<T, u32>;
