//! hcs-nspawn
//!
//! Single-shot container spawner over a Host Compute Service style engine:
//! provision a copy-on-write layer chain, create and start a compute system
//! bound to it, run one process to completion, then tear everything down in
//! reverse order.
//!
//! The physical layer driver and compute engine are external; the crate
//! talks to them through the [`hcs::LayerDriver`] and [`hcs::ComputeEngine`]
//! traits and ships an in-memory [`sim`] backend for tests and demos.
//!
//! # Example
//!
//! ```
//! use hcs_nspawn::{NspawnConfig, Orchestrator};
//! use hcs_nspawn::sim::{SimComputeEngine, SimLayerDriver};
//!
//! let config = NspawnConfig::builder()
//!     .process_executable("/bin/true")
//!     .process_directory("/work")
//!     .mapped_directory("/mnt/x")
//!     .parent_layer_directory("/layers/base")
//!     .build_validated()?;
//!
//! let mut orchestrator = Orchestrator::new(SimLayerDriver::new(), SimComputeEngine::new());
//! orchestrator.spawn_and_wait(&config)?;
//! # Ok::<(), hcs_nspawn::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod hcs;
pub mod orchestrator;
pub mod sim;

pub use config::NspawnConfig;
pub use error::{Error, Result};
pub use orchestrator::{spawn_and_wait_json, LifecycleState, Orchestrator};
