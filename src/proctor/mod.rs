pub mod broadcaster;
pub mod heartbeat;
pub mod registry;
pub mod server;
pub mod signaling;

pub use broadcaster::{EventSender, OutboundEvent, RoomBroadcaster, OUTBOUND_QUEUE_CAPACITY};
pub use heartbeat::{HeartbeatMonitor, HeartbeatOutcome};
pub use registry::{ConnectionMeta, PresenceRegistry, Role, RoomMembers};
pub use server::ProctorServer;
pub use signaling::{ProctorMessage, ProctorSignalingHandler};
