//! Request/response envelope.
//!
//! # Data Flow
//! ```text
//! Transport request (axum)
//!     → context.rs (normalize method, path, headers, query, body)
//!     → RequestContext flows through middleware and into the handler
//!     → response.rs (status + JSON body + headers)
//!     → finalize(): Content-Type defaulted to application/json
//! ```

pub mod context;
pub mod method;
pub mod response;

pub use context::{RequestContext, RequestContextBuilder};
pub use method::Method;
pub use response::{ApiResponse, ResponseBody};
