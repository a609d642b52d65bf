//! Signaling Server Media Control Plane Library
//!
//! This library connects a signaling server to a cluster of media nodes and
//! provisions per-room routing contexts on them:
//!
//! - Duplex request/notify RPC connections to media nodes, one per room
//! - Router provisioning with sticky, geographic and load-aware selection
//! - Inter-node media piping (`pipe_to_router`) over shared pipe transports
//!
//! # Architecture
//!
//! ```text
//! MediaService
//! ├── LoadBalancer (sticky → geo → load)
//! └── MediaNode (one per configured node)
//!     └── RpcConnection (one per room)
//!         └── Router
//!             ├── WebRtcTransport / PipeTransport
//!             └── Producer / Consumer / DataProducer / DataConsumer
//! ```
//!
//! # Key Design Decisions
//!
//! - **One connection per room**: a node failing one room leaves others intact
//! - **Node-reported close wins**: entities closed by the node are torn down
//!   locally without echoing a close back
//! - **One pipe pair per router pair**: concurrent pipes in either direction
//!   share one in-flight pairing
//!
//! # Modules
//!
//! - [`rpc`] - Media node connections and the `Connector` seam
//! - [`media`] - Media nodes, routers, transports and entities
//! - [`load_balancer`] - Media node selection chain
//! - [`room`] - Room and peer collaborators
//! - [`service`] - `MediaService::get_router`
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Metrics

pub mod config;
pub mod errors;
pub mod load_balancer;
pub mod media;
pub mod observability;
pub mod room;
pub mod rpc;
pub mod service;

pub use errors::SsError;
pub use service::MediaService;
