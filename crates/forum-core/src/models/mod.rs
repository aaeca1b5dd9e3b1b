pub mod like;
pub mod reply;
pub mod session;
pub mod thread;

pub use like::LikeEdge;
pub use reply::{NewReply, Reply};
pub use session::{Identity, Session, SessionUser};
pub use thread::{parse_tags, AuthorProfile, NewThread, Thread, ThreadStatus};
