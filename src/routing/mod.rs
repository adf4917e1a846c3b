//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (at startup):
//!     register(method, "/leads/:id", handler, options)
//!     → pattern.rs (compile into literal / parameter segments)
//!     → table.rs (store entry, immutable afterwards)
//!
//! Incoming request (method, path):
//!     → table.rs (collect entries whose method and pattern accept the path)
//!     → pick the most specific candidate
//!     → Return: MatchResult { route, path_params } or None (404)
//! ```
//!
//! # Design Decisions
//! - Specificity beats registration order: at the first segment where two
//!   candidate patterns differ, a literal outranks a `:param`. A literal route
//!   registered after an overlapping parameterized one is still reachable.
//! - Identical shapes fall back to registration order (first wins)
//! - Trailing slashes are significant (`/leads` != `/leads/`)
//! - No regex: segments are compared directly

pub mod pattern;
pub mod table;

pub use pattern::PathPattern;
pub use table::{Handler, HandlerResult, MatchResult, RouteEntry, RouteOptions, RouteTable};
