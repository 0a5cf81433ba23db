//! Gateway: HTTP webhook surface.
//!
//! One port serves the health probe, the subscription handshake and the event POST. Event
//! processing is detached from the HTTP response: Meta always sees 200 immediately.

mod server;
mod verify;

pub use server::{router, run_gateway, GatewayState, HEALTH_TEXT};
pub use verify::{verify_subscription, VerifyOutcome, VerifyQuery};
