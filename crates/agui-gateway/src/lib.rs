//! Agent gateway: multi-turn agent conversations over WebSocket or long-polling,
//! with tool calls brokered between the agent, the client, in-process tools and
//! remote JSON-RPC tool servers.

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod emitter;
pub mod error;
pub mod gateway;
pub mod patterns;
pub mod plugins;
pub mod protocol;
pub mod ratelimit;
pub mod remote;
pub mod run;
pub mod server;
pub mod session;
pub mod tools;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use gateway::{Connection, Gateway, GatewayBuilder};
pub use run::{RunContext, ToolOutcome};
