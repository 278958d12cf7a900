pub mod clock;
pub mod error;
pub mod graph;
pub mod queue;
pub mod throttle;
