//! Event-sourced replica of asset-manager contract state.

pub mod agent;
pub mod collateral;
pub mod settings;
pub mod tracked;

pub use agent::TrackedAgentState;
pub use tracked::TrackedState;
