//! Method names used on media node connections.
//!
//! Payload field names are camelCase. Every entity-scoped message carries a
//! `routerId` plus the entity id field (`producerId`, `consumerId`, ...).

// ============================================================================
// Handshake (node -> server)
// ============================================================================

/// Node accepted the connection; carries the initial `load` sample.
pub const MEDIA_NODE_READY: &str = "mediaNodeReady";
/// Node is draining and must not receive new rooms.
pub const MEDIA_NODE_DRAIN: &str = "mediaNodeDrain";

// ============================================================================
// Requests (server -> node)
// ============================================================================

pub const GET_ROUTER: &str = "getRouter";
pub const CAN_CONSUME: &str = "canConsume";
pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
pub const CONNECT_WEBRTC_TRANSPORT: &str = "connectWebRtcTransport";
pub const RESTART_ICE: &str = "restartIce";
pub const SET_MAX_INCOMING_BITRATE: &str = "setMaxIncomingBitrate";
pub const PRODUCE: &str = "produce";
pub const CONSUME: &str = "consume";
pub const PRODUCE_DATA: &str = "produceData";
pub const CONSUME_DATA: &str = "consumeData";
pub const SET_CONSUMER_PREFERRED_LAYERS: &str = "setConsumerPreferredLayers";
pub const CREATE_PIPE_TRANSPORT: &str = "createPipeTransport";
pub const CONNECT_PIPE_TRANSPORT: &str = "connectPipeTransport";
pub const CREATE_PIPE_PRODUCER: &str = "createPipeProducer";
pub const CREATE_PIPE_CONSUMER: &str = "createPipeConsumer";
pub const CREATE_PIPE_DATA_PRODUCER: &str = "createPipeDataProducer";
pub const CREATE_PIPE_DATA_CONSUMER: &str = "createPipeDataConsumer";

// ============================================================================
// Notifications (server -> node)
// ============================================================================

pub const CLOSE_ROUTER: &str = "closeRouter";
pub const CLOSE_WEBRTC_TRANSPORT: &str = "closeWebRtcTransport";
pub const CLOSE_PIPE_TRANSPORT: &str = "closePipeTransport";
pub const CLOSE_PRODUCER: &str = "closeProducer";
pub const CLOSE_PIPE_PRODUCER: &str = "closePipeProducer";
pub const PAUSE_PRODUCER: &str = "pauseProducer";
pub const RESUME_PRODUCER: &str = "resumeProducer";
pub const PAUSE_PIPE_PRODUCER: &str = "pausePipeProducer";
pub const RESUME_PIPE_PRODUCER: &str = "resumePipeProducer";
pub const CLOSE_CONSUMER: &str = "closeConsumer";
pub const CLOSE_PIPE_CONSUMER: &str = "closePipeConsumer";
pub const PAUSE_CONSUMER: &str = "pauseConsumer";
pub const RESUME_CONSUMER: &str = "resumeConsumer";
pub const CLOSE_DATA_PRODUCER: &str = "closeDataProducer";
pub const CLOSE_PIPE_DATA_PRODUCER: &str = "closePipeDataProducer";
pub const CLOSE_DATA_CONSUMER: &str = "closeDataConsumer";
pub const CLOSE_PIPE_DATA_CONSUMER: &str = "closePipeDataConsumer";

// ============================================================================
// Notifications (node -> server)
// ============================================================================

pub const NEW_ROUTER: &str = "newRouter";
pub const ROUTER_CLOSED: &str = "routerClosed";
pub const WEBRTC_TRANSPORT_CLOSED: &str = "webRtcTransportClosed";
pub const PIPE_TRANSPORT_CLOSED: &str = "pipeTransportClosed";
pub const PRODUCER_CLOSED: &str = "producerClosed";
pub const PRODUCER_PAUSED: &str = "producerPaused";
pub const PRODUCER_RESUMED: &str = "producerResumed";
pub const PRODUCER_SCORE: &str = "producerScore";
pub const PIPE_PRODUCER_CLOSED: &str = "pipeProducerClosed";
pub const PIPE_PRODUCER_PAUSED: &str = "pipeProducerPaused";
pub const PIPE_PRODUCER_RESUMED: &str = "pipeProducerResumed";
pub const CONSUMER_CLOSED: &str = "consumerClosed";
pub const CONSUMER_PAUSED: &str = "consumerPaused";
pub const CONSUMER_RESUMED: &str = "consumerResumed";
pub const CONSUMER_SCORE: &str = "consumerScore";
pub const CONSUMER_LAYERS_CHANGED: &str = "consumerLayersChanged";
pub const PIPE_CONSUMER_CLOSED: &str = "pipeConsumerClosed";
pub const PIPE_CONSUMER_PAUSED: &str = "pipeConsumerPaused";
pub const PIPE_CONSUMER_RESUMED: &str = "pipeConsumerResumed";
pub const DATA_PRODUCER_CLOSED: &str = "dataProducerClosed";
pub const PIPE_DATA_PRODUCER_CLOSED: &str = "pipeDataProducerClosed";
pub const DATA_CONSUMER_CLOSED: &str = "dataConsumerClosed";
pub const PIPE_DATA_CONSUMER_CLOSED: &str = "pipeDataConsumerClosed";

/// Generic error returned for requests no handler claimed.
pub const SERVER_ERROR: &str = "Server error";
