//! Typed object store with optimistic concurrency and change watches.
//!
//! The control plane treats its backing cluster API as a durable object
//! store: typed resources, a monotonically increasing version per object, a
//! spec/status split, listing, and change-watch streams. This crate is that
//! narrow interface. The in-process implementation here is authoritative for
//! tests and standalone operation; a cluster-backed implementation plugs in
//! behind the same surface.

mod collection;

pub use collection::{Collection, WatchEvent};

use legator_types::agent::Agent;
use legator_types::approval::ApprovalRequest;
use legator_types::environment::{Environment, Secret};
use legator_types::event::AgentEvent;
use legator_types::meta::ObjectMeta;
use legator_types::run::Run;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// The write carried a stale resource version. Re-read and retry.
    #[error("conflict writing {kind} {key}: stale resource version {stale}, current {current}")]
    Conflict {
        kind: &'static str,
        key: String,
        stale: u64,
        current: u64,
    },
}

/// Anything the store can hold: a kind tag plus mutable object metadata.
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }
            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

impl_resource!(Agent, "Agent");
impl_resource!(Environment, "Environment");
impl_resource!(Run, "Run");
impl_resource!(ApprovalRequest, "ApprovalRequest");
impl_resource!(AgentEvent, "AgentEvent");
impl_resource!(Secret, "Secret");

/// All collections the control plane persists, in one place.
#[derive(Default)]
pub struct Store {
    pub agents: Collection<Agent>,
    pub environments: Collection<Environment>,
    pub runs: Collection<Run>,
    pub approvals: Collection<ApprovalRequest>,
    pub events: Collection<AgentEvent>,
    pub secrets: Collection<Secret>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }
}
