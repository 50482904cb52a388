//! # Spacecraft Mission Simulator
//!
//! A deterministic, segment-based mission simulation library. A mission plan is broken
//! into physically grounded segments; each segment propagates the orbit and updates the
//! coupled resource models (power, onboard storage, operational mode).
//!
//! ## Features
//!
//! - **Multi-fidelity propagation**: analytical J2 secular propagator, always available,
//!   and an optional RK4 numerical backend behind the `numerical` feature
//! - **Power and eclipse**: cylindrical shadow model with state-of-charge integration
//! - **Solid-state recorder**: prioritized storage with eviction and audit trail
//! - **Mode state machine**: validated transitions with automatic recovery
//! - **Activity mapping**: imaging, downlink, thrust and station-keeping activities
//!   expanded into simulation segments
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use satmission::{run_simulation, Fidelity, Plan, RunnerState, SimulationConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = Plan::from_json_file("plan.json")?;
//! let initial = RunnerState::circular(plan.start, 500.0, 150.0, 20.0);
//! let result = run_simulation(&plan, &initial, Fidelity::Low, &SimulationConfig::default())?;
//!
//! println!("violations: {}", result.summary.violation_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`propagation`] - Propagator trait, analytical and numerical implementations
//! - [`power`] - Eclipse test and battery state-of-charge integration
//! - [`storage`] - Solid-state recorder model
//! - [`modes`] - Operational mode state machine
//! - [`mappers`] - Activity to segment mapping
//! - [`runner`] - Mission orchestrator and public entry point
//! - [`access`] - Ground-station access window service

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod access;
pub mod activity;
pub mod config;
pub mod error;
pub mod events;
pub mod mappers;
pub mod modes;
pub mod power;
pub mod propagation;
pub mod runner;
pub mod storage;

// Re-export main public types for convenience
pub use activity::{Activity, ActivityKind, Plan};
pub use config::SimulationConfig;
pub use error::{PropagationError, SimError};
pub use events::{EventCategory, Severity, SimEvent};
pub use propagation::{EphemerisPoint, Epoch, Fidelity, Propagator, PropagatorBackends};
pub use runner::{run_simulation, RunSummary, RunnerState, SimulationContext, SimulationResult};
