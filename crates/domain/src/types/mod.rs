//! Request, response and event types

pub mod events;
pub mod http;
pub mod request;
pub mod response;

pub use events::{EventMetadata, NetworkEvent};
pub use http::{Headers, HttpMethod};
pub use request::{CachePolicy, Priority, Request, RequestBuilder};
pub use response::Response;
