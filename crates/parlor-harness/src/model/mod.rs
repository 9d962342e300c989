//! Reference model for model-based testing.
//!
//! The model is an executable statement of the relay's rules. Random
//! operation sequences are applied to both the model and the real driver;
//! the per-operation results and the final [`ObservableState`] must agree.

mod operation;
mod world;

pub use operation::{
    ClientId, MISSING_ROOM, MODEL_ROOMS, ModelRoom, ModelRoomId, Operation, OperationError,
    OperationResult, SmallMessage, reaction_for, user_name,
};
pub use world::{ModelMessage, ModelRoomState, ModelUserState, ModelWorld, ObservableState};
