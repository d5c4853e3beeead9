//! Conversation core: user records, conversation logs, and the synchronizer
//! that keeps both participants' views of a conversation in step.
//!
//! Every operation takes the acting [`Session`] explicitly and works against
//! injected store handles, so the same code runs over SQLite, in memory, or
//! against a test double.

pub mod conversations;
pub mod error;
pub mod media;
pub mod session;
pub mod sync;
pub mod users;

pub use conversations::ConversationLogs;
pub use error::{Result, SyncError};
pub use media::Media;
pub use session::{Session, SessionCache};
pub use sync::{FanOut, Synchronizer};
pub use users::{Profile, UserRecords};
