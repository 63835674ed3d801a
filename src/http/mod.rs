//! HTTP plumbing shared by the store, wiki and web API clients.

pub mod retrying_client;
pub mod transport;

pub use retrying_client::{HttpError, RetryPolicy, RetryingClient};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, TransportError, UreqTransport};
