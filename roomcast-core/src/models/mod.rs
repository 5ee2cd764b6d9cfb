pub mod grants;
pub mod id;
pub mod messages;
pub mod request;
pub mod room_user;
pub mod user;
pub mod video;

pub use grants::{Grants, Permission, PermissionBits, Role};
pub use id::{ClientId, UserId};
pub use messages::RoomMessage;
pub use request::{EventContext, RoomEvent, RoomRequest};
pub use room_user::{ClientInfo, PlayerStatus, RoomUser, UserSummary};
pub use user::{Session, SessionKind, User};
pub use video::{Video, VideoRef};
