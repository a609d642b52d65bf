//! # Signaling Test Utilities
//!
//! Shared test utilities for the signaling server media control plane.
//!
//! ## Modules
//!
//! - `mock_media_node` - In-process media node speaking the control protocol
//! - `fixtures` - Media nodes, services, rooms and peers wired to mocks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mock = MockMediaNode::builder().id("mn-1").with_load(0.2).build();
//!     let service = fixtures::service(&[(&mock, 52.52, 13.40)]);
//!
//!     let room = Room::new("room-1");
//!     let router = service.get_router(&room, &TestPeer::new("alice").build()).await?;
//! }
//! ```

pub mod fixtures;
pub mod mock_media_node;

pub use fixtures::TestPeer;
pub use mock_media_node::{Handshake, MethodBehavior, MockMediaNode, MockMediaNodeBuilder};
