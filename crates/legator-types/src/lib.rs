//! Shared resource types for the Legator control plane.
//!
//! Every entity the control plane persists — agents, environments, runs,
//! approval requests, agent events — lives here, together with the object
//! metadata they all carry and the duration/config helpers the rest of the
//! workspace leans on.

pub mod agent;
pub mod approval;
pub mod config;
pub mod duration;
pub mod environment;
pub mod error;
pub mod event;
pub mod meta;
pub mod run;

pub use error::{TypesError, TypesResult};
pub use meta::{NamespacedName, ObjectMeta};
