//! Client side of the end-to-end checks: synthetic users, GraphQL operations over
//! HTTP and WebSocket, and the dual-session harness that pairs a subscription
//! with the request expected to trigger it.

pub mod auth;
pub mod dual;
pub mod error;
pub mod executor;
pub mod listener;
pub mod operation;
pub mod outcome;
mod response;
pub mod retry;
pub mod schema;
pub mod session;

pub use auth::Principal;
pub use dual::{DualSessionHarness, SubscriptionSpec};
pub use error::{Error, ErrorKind};
pub use executor::QueryExecutor;
pub use listener::listen;
pub use operation::{Operation, OperationKind, PayloadCatalog};
pub use outcome::{DualOutcome, Event, RequestOutcome, SubscriptionOutcome, Termination};
pub use retry::{retry, BackoffPolicy};
pub use session::{Session, SessionTarget, WsProtocol};
