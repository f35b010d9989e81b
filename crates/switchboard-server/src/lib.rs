//! Session registry, pull router and WebSocket gateway.
//!
//! Clients sign in over HTTP to get a session id, then publish over a
//! WebSocket. Publishes go to the shared `pull` channel, the pull router fans
//! them out to `push.<id>`, and each session's consumer delivers replies back
//! to whichever connection is bound to that session.

pub mod error;
pub mod gateway;
pub mod handlers;
pub mod provision;
pub mod registry;
pub mod responder;
pub mod router;
pub mod server;

pub use error::{DeliveryError, GatewayError, ProvisionError, RouteError, StartError};
pub use gateway::{Gateway, GatewayConfig};
pub use provision::{SessionProvisioner, SignIn};
pub use registry::SessionRegistry;
pub use responder::{EchoResponder, Responder};
pub use router::PullRouter;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
