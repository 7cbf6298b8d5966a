mod messages;
mod registry;

pub use messages::{ClientEvent, RelayKind, ServerEvent};
pub use registry::{Member, Room, RoomRegistry};
