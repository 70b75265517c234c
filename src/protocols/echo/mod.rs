//! Tagged echo protocol.
//!
//! Raw bytes in, tagged text out. There is no framing: every successful
//! read produces exactly one response.
//!
//! ```text
//! Request:  ping
//! Response: [Poll] 服务器已收到: ping
//! ```
//!
//! The tag names the readiness strategy whose acceptor loop took the
//! connection, so a client can tell which listener served it.
//!
//! A session closes when the peer hangs up, on any read or write error,
//! after `idle_timeout` without input, or on shutdown. Closing always
//! removes the connection from its strategy's registry.

pub mod handler;
pub mod response;

pub use handler::{handle_connection, SessionContext};
