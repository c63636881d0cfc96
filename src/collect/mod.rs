//! Collection side of a round: conflict-free accumulation of concurrently
//! submitted requests into per-pool round state.

pub mod accumulator;
pub mod active;
pub mod collector;
pub mod round_state;

pub use accumulator::{Accumulator, AccumulatorOverflow};
pub use active::ActivePoolSet;
pub use collector::{RequestCollector, SubmitError, ValidationError};
pub use round_state::{PoolRoundState, RoundLogs};
