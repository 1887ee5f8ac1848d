//! Graph append API client
//!
//! Captures are delivered one block at a time to a single POST endpoint per
//! graph:
//!
//! ```text
//! POST {api_base_url}/api/graph/{graph}/append-blocks
//! Authorization: Bearer {token}
//!
//! { "location": { "page": { "title": ... }, "nest-under"?: { "string": ... } },
//!   "append-data": [ { "string": "<decorated content>" } ] }
//! ```
//!
//! HTTP 200 is success; anything else is a [`SendError`] carrying the status
//! code and the server's message. Transport failures have no status code and
//! are always retried with backoff, never latched.

mod client;
mod payload;

pub use client::{BlockSender, FailureClass, GraphClient, SendError};
pub use payload::{nest_target, render_block, AppendBody, AppendRequest, Location, TODO_MARKER};
