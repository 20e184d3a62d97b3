//! HTTP/1.1 and WebSocket multiplexing adapted onto a channel message ABI.
//!
//! A single listening socket is split by URL path across three node
//! kinds — request-reply HTTP, WebSocket echo, and WebSocket publish —
//! each translating its wire protocol into [`message::Inbound`]/
//! [`message::Outbound`] messages exchanged with an [`message::Upstream`]
//! consumer supplied by the hosting application. See `crate::dispatcher`
//! for the server entry point and `crate::node` for the three node kinds.

pub mod addr;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod method;
pub mod node;
pub mod ring;
pub mod rt_guard;
pub mod scheme;
pub mod session;
pub mod size;
pub mod status;

pub use dispatcher::{Builder, Dispatcher};
pub use error::{Error, Result};
pub use message::{Inbound, Outbound, Upstream};
pub use method::Method;
pub use node::{HttpNode, NodeHandle, NodeKind, WsEchoNode, WsPubNode};

#[cfg(any(test, feature = "test-util"))]
pub use message::RecordingUpstream;
