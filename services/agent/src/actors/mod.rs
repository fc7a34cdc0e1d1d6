//! Actors of the agent.
//!
//! ```text
//! Supervisor
//! └── AgentCommandActor  (server commands in, agent events out)
//! ```

mod command;
mod framework;

pub use command::AgentCommandActor;
pub use framework::{Actor, ActorContext, ActorError, ActorHandle, Message, Supervisor};
