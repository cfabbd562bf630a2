mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::err;
pub use router::{after_response, handle_request, shutdown};
pub use types::{AppState, Outbox, Request};
