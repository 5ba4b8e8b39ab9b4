//! Stateful managers owned by the dispatch loop
//!
//! Managers are plain structs mutated only from the dispatcher; producers
//! reach them exclusively through the command queue.

pub mod values;

pub use values::{FederateState, ValueManager};
