//! Control protocol between the signaling server and media nodes.
//!
//! Every message on a media node socket is one JSON text frame:
//!
//! - notification: `{"type":"notification","method":"...","data":{...}}`
//! - request: `{"type":"request","id":7,"method":"...","data":{...}}`
//! - response: `{"type":"response","id":7,"data":{...}}` or
//!   `{"type":"response","id":7,"error":"..."}`
//!
//! Payloads are opaque JSON objects; this crate does not interpret codec or
//! capability parameters.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod frame;
pub mod methods;

pub use codec::{decode_frame, encode_frame, CodecError};
pub use frame::{Frame, Notification, Request, RequestId, Response};
