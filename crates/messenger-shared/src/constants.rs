/// Character substituted for reserved path characters in identity keys.
pub const KEY_SEPARATOR: char = '-';

/// Prefix of every conversation id; the rest is the first message's id.
pub const CONVERSATION_ID_PREFIX: &str = "conversation_";

/// Top-level document listing every registered user.
pub const USER_DIRECTORY_PATH: &str = "users";

/// Child of a user document holding the conversation summaries.
pub const CONVERSATIONS_CHILD: &str = "conversations";

/// Child of a conversation document holding the message log.
pub const MESSAGES_CHILD: &str = "messages";

/// Blob prefix for profile pictures.
pub const PROFILE_IMAGES_PREFIX: &str = "images";

/// Blob prefix for photos sent in a conversation.
pub const MESSAGE_IMAGES_PREFIX: &str = "message_images";

/// Blob prefix for videos sent in a conversation.
pub const MESSAGE_VIDEOS_PREFIX: &str = "message_videos";

/// Timestamp layout embedded in generated message ids (path-safe, millisecond
/// resolution).
pub const MESSAGE_ID_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";
