pub mod engine;
pub mod handlers;
pub mod model;
pub mod renderer;
pub mod sweeper;

pub use engine::DocumentEngine;
pub use sweeper::{ReconciliationSweeper, SweepReport};
