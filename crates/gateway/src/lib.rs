//! The gateway binary's core: the WebSocket Connection Manager, Operation
//! Dispatcher, Admission Pipeline, Presence Engine, and Fan-Out Router
//! (spec.md §4), assembled into one axum server by [`server::run`].

pub mod admission;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod http;
pub mod presence;
pub mod server;
pub mod state;
pub mod ws;

pub use server::run;
pub use state::GatewayState;
