//! The per-unit agent: status, action API and wiring

pub mod client;
pub mod http;
pub mod server;
pub mod state;

pub use client::ActionClient;
pub use http::{create_router, AgentState};
pub use server::{Agent, AgentStatus};
pub use state::{BlockSource, UnitState, UnitStatus};
