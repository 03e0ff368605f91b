//! # rnp-bridge - Cross-Process RPC Bridge
//!
//! Lets the editor-side UI process and the controller process call methods on
//! each other's objects, including passing functions as arguments that the
//! other side can invoke later.
//!
//! Depends on [`rnp_core`] for error handling.
//!
//! ## Public API
//!
//! ### Transport
//! - [`ChannelEnd`] - One side of an ordered, bidirectional message channel
//! - [`in_memory_pair()`] - Two connected ends in one process
//! - [`ndjson()`], [`stdio()`] - One JSON message per line over byte streams
//!
//! ### Messages
//! - [`BridgeMessage`] - `call` / `callResult` / `callback` envelope
//!
//! ### Calls
//! - [`RpcBridge`] - Outstanding calls, callback registry, object dispatch
//! - [`RemoteObject`] - Implemented by objects exposed to the peer
//! - [`Callback`], [`Arg`], [`Args`] - Call arguments

pub mod bridge;
pub mod callback;
pub mod channel;
pub mod message;
pub mod object;

pub use bridge::RpcBridge;
pub use callback::{Callback, CallbackIdentity};
pub use channel::{in_memory_pair, ndjson, stdio, ChannelEnd};
pub use message::{callback_marker, parse_callback_marker, BridgeMessage, CALLBACK_REF_KEY};
pub use object::{unknown_method, Arg, Args, CallFuture, RemoteObject};
