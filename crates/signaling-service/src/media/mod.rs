//! Media node handles, routers and the entities living in them.
//!
//! # Modules
//!
//! - [`node`] - `MediaNode`: per-room connections, router provisioning, load
//! - [`router`] - `Router`: entity maps, inbound event dispatch, close cascade
//! - [`pipe`] - `pipe_to_router` and the shared pipe transport pair cache
//! - [`transport`] - WebRTC and pipe transports
//! - [`producer`] / [`consumer`] - media and data entities
//! - [`messages`] - router-scoped request plumbing and response payloads
//! - [`observer`] - typed observer lists and close signals

pub mod consumer;
pub mod messages;
pub mod node;
pub mod observer;
pub mod pipe;
pub mod producer;
pub mod router;
pub mod transport;

pub use consumer::{Consumer, DataConsumer};
pub use node::{MediaNode, MediaNodeOptions};
pub use pipe::{PipeToRouterOptions, PipeToRouterResult, PipeTransportPair};
pub use producer::{DataProducer, Producer};
pub use router::{Router, RouterOptions};
pub use transport::{
    ConsumeOptions, PipeTransport, ProduceDataOptions, ProduceOptions, WebRtcTransport,
};
