//! Path grammar and JSON tree navigation shared by the store backends.
//!
//! A path is a `/`-separated list of non-empty segments. Segments may not
//! contain `.`, `#`, `$`, `[` or `]`; identity keys are built so that they
//! never do.

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

const RESERVED: &[char] = &['.', '#', '$', '[', ']'];

/// Split and validate a path.
pub fn segments(path: &str) -> Result<Vec<&str>> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }

    let segs: Vec<&str> = path.split('/').collect();
    for seg in &segs {
        if seg.is_empty() {
            return Err(invalid("empty segment"));
        }
        if seg.contains(RESERVED) {
            return Err(invalid("reserved character"));
        }
    }
    Ok(segs)
}

/// Borrow the value at `segs` below `root`, if any. Arrays are indexed by
/// decimal segments.
pub fn get<'v>(root: &'v Value, segs: &[&str]) -> Option<&'v Value> {
    let mut node = root;
    for seg in segs {
        node = match node {
            Value::Object(map) => map.get(*seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Write `value` at `segs` below `root`, creating intermediate objects.
/// Writing `Value::Null` removes the entry.
pub fn set(root: &mut Value, segs: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = segs.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for (depth, seg) in parents.iter().enumerate() {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match { node } {
            Value::Object(map) => map.entry(seg.to_string()).or_insert(Value::Null),
            Value::Array(items) => match seg.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return Err(StoreError::NotAnObject(segs[..=depth].join("/"))),
            },
            _ => return Err(StoreError::NotAnObject(segs[..depth].join("/"))),
        };
    }

    if node.is_null() {
        if value.is_null() {
            return Ok(());
        }
        *node = Value::Object(Map::new());
    }

    match node {
        Value::Object(map) => {
            if value.is_null() {
                map.remove(*last);
            } else {
                map.insert(last.to_string(), value);
            }
            Ok(())
        }
        Value::Array(items) => match last.parse::<usize>().ok() {
            Some(i) if i < items.len() => {
                items[i] = value;
                Ok(())
            }
            _ => Err(StoreError::NotAnObject(parents.join("/"))),
        },
        _ => Err(StoreError::NotAnObject(parents.join("/"))),
    }
}

/// Whether a write to `written` can change what a reader of `watched` sees.
pub fn overlaps(written: &str, watched: &str) -> bool {
    fn is_prefix(prefix: &str, path: &str) -> bool {
        path.strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(false)
    }
    is_prefix(written, watched) || is_prefix(watched, written)
}
