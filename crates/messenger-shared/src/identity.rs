use serde::{Deserialize, Serialize};

use crate::constants::KEY_SEPARATOR;

/// A user's identity as used in storage paths.
///
/// Built from an email address by [`normalize`]; the only characters that
/// survive the mapping are the ones the document store accepts in a path
/// segment. Every place that turns an email into a path goes through this
/// type, so the mapping is applied identically everywhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derive the key for an email address.
    pub fn from_email(email: &str) -> Self {
        normalize(email)
    }

    /// Borrow the key as a path segment.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this user's profile picture in blob storage.
    pub fn profile_picture_file_name(&self) -> String {
        format!("{}_profile_picture.png", self.0)
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdentityKey {
    /// Keys are normalized on the way in; normalizing an existing key is a no-op.
    fn from(raw: &str) -> Self {
        normalize(raw)
    }
}

/// Map a raw identifier (normally an email) to its storage key.
///
/// 1. every `.` and `@` becomes `-`;
/// 2. scanning from the second character, a `-` is inserted before any digit
///    whose predecessor is neither `-` nor another digit, so a digit run is
///    always delimited from the letters before it.
///
/// The function is total and idempotent.
pub fn normalize(raw: &str) -> IdentityKey {
    let mut key = String::with_capacity(raw.len() + 4);
    let mut prev: Option<char> = None;

    for ch in raw.chars() {
        let ch = match ch {
            '.' | '@' => KEY_SEPARATOR,
            other => other,
        };

        if ch.is_ascii_digit() {
            if let Some(p) = prev {
                if p != KEY_SEPARATOR && !p.is_ascii_digit() {
                    key.push(KEY_SEPARATOR);
                }
            }
        }

        key.push(ch);
        prev = Some(ch);
    }

    IdentityKey(key)
}
