//! HTTP delivery layer for RelayGate.
//!
//! Requests arrive at [`service::GatewayService`], are routed to the
//! download (`/d/...`) or proxy (`/p/...`) entry point, and are handed to the
//! [`gateway::Gateway`], which resolves the object and decides how to serve
//! it:
//!
//! - encrypted containers are decrypted while streaming ([`decrypt`]);
//! - plain objects are redirected to their link when the storage allows it,
//!   or streamed through this server ([`proxy`]), optionally rendering
//!   markdown to sanitized HTML ([`transform`]).
//!
//! Every response goes through a [`sink::ResponseSink`], which enforces that
//! exactly one response is written and reports whether the client has seen
//! any of it yet.

pub mod body;
pub mod decrypt;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod proxy;
pub mod request;
pub mod server;
pub mod service;
pub mod sink;
pub mod transform;

pub use body::GatewayBody;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use policy::DeliveryDecision;
pub use request::{Entry, RequestContext};
pub use server::serve;
pub use service::GatewayService;
pub use sink::{ResponseSink, ResponseWriter};
