//! Stopwatch state, control and event fan-out.

mod controller;
mod events;
mod state;

pub use controller::TimingController;
pub use events::{EventBus, StopwatchEvent};
pub use state::{RunState, RunningSession, SharedState, StopwatchState};
