//! Event-loop building blocks shared by every RIFT state machine.
//!
//! - [`Scheduler`]: time-ordered dispatch of one-shot and periodic timers,
//!   owned by one node's event loop. Timers are identified by opaque handles
//!   so the scheduler never points back into its owners.
//! - [`Fsm`]: a table-driven state machine runner with an event queue and
//!   bounded verbose/summary transition history.
//!
//! Time is always passed in by the caller, which keeps both deterministic
//! under a virtual clock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod machine;
pub mod timer;

// Re-export main types
pub use machine::{Fsm, HistoryRecord, StateMachine, Step, Transition};
pub use timer::{Scheduler, Timer};
