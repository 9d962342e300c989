//! Deterministic simulation harness for the Parlor relay.
//!
//! A seeded, manually clocked [`Environment`](parlor_core::Environment)
//! ([`SimEnv`]), an in-process relay ([`SimRelay`]) and a turmoil-backed TCP
//! server ([`SimServer`]) for deterministic, reproducible testing of the
//! driver.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and real implementation,
//! and their observable states are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the relay's
//! presence, membership and history invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_env;
pub mod sim_relay;
pub mod sim_server;

pub use invariants::{
    AppendOnlyHistory, AuthorHasRead, ExclusiveMembership, Invariant, InvariantRegistry,
    InvariantResult, LiveConnections, LogContiguity, MembersOnline, MessageSnapshot,
    PresenceConsistency, RoomSnapshot, SystemSnapshot, TransitionInvariant, UserSnapshot,
    Violation,
};
pub use model::{
    ClientId, ModelMessage, ModelRoom, ModelRoomId, ModelRoomState, ModelUserState, ModelWorld,
    ObservableState, Operation, OperationError, OperationResult, SmallMessage,
};
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv, SimInstant};
pub use sim_relay::{Delivery, SimRelay, SimRelayError};
pub use sim_server::{SimClient, SimServer, read_frame};
