//! Sticky stage: prefer nodes already serving the room.

use crate::media::MediaNode;
use crate::room::MediaSession;

use std::collections::HashSet;

/// Open nodes hosting an open router of `room`, least loaded first.
#[must_use]
pub fn sticky_nodes(nodes: &[MediaNode], room: &dyn MediaSession) -> Vec<MediaNode> {
    let serving: HashSet<String> = room
        .routers()
        .iter()
        .filter(|router| !router.is_closed())
        .map(|router| router.media_node_id().to_string())
        .collect();

    let mut sticky: Vec<MediaNode> = nodes
        .iter()
        .filter(|node| !node.is_closed() && serving.contains(node.id()))
        .cloned()
        .collect();
    sticky.sort_by(|a, b| a.load().total_cmp(&b.load()));
    sticky
}
