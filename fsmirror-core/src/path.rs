// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device path abstraction
//!
//! A [`DevicePath`] is a `device:/sub/path` string. The device name selects a
//! backend in the [`DeviceRegistry`](crate::DeviceRegistry); the subpath is
//! handed to that backend as-is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MirrorError, MirrorResult};

/// Separates the device name from the subpath.
pub const DEVICE_SEPARATOR: char = ':';
/// Separates subpath segments.
pub const PATH_SEPARATOR: char = '/';
/// Characters no subpath may contain.
pub const FORBIDDEN_CHARACTERS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\'];
/// Longest subpath a backend accepts, separator included.
pub const MAX_PATH: usize = 0x301;

/// Path on a named device, e.g. `sdmc:/switch/dump.bin`.
///
/// Always normalized: one separator after the device, no doubled separators,
/// no trailing separator except for the device root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DevicePath {
    buffer: String,
    device_end: usize,
    capacity: usize,
}

impl DevicePath {
    /// Parses and normalizes a raw `device:/path` string.
    pub fn parse(raw: &str) -> MirrorResult<Self> {
        let device_end = raw
            .find(DEVICE_SEPARATOR)
            .ok_or_else(|| MirrorError::InvalidPath(format!("{raw}: no device separator")))?;

        let device = &raw[..device_end];
        if device.is_empty() || device.contains(PATH_SEPARATOR) {
            return Err(MirrorError::InvalidPath(format!("{raw}: bad device name")));
        }

        let rest = &raw[device_end + 1..];
        if rest.is_empty() {
            return Err(MirrorError::InvalidPath(format!("{raw}: empty path")));
        }
        if rest.contains(FORBIDDEN_CHARACTERS) {
            return Err(MirrorError::InvalidPath(format!(
                "{raw}: forbidden character in path"
            )));
        }

        let capacity = MAX_PATH + device.len() + 1;
        let mut buffer = String::with_capacity(raw.len() + 1);
        buffer.push_str(device);
        buffer.push(DEVICE_SEPARATOR);
        buffer.push(PATH_SEPARATOR);
        push_segments(&mut buffer, rest);

        let path = Self {
            buffer,
            device_end,
            capacity,
        };
        path.check_capacity(path.buffer.len())?;
        Ok(path)
    }

    /// Root of `device`, e.g. `sdmc:/`.
    pub fn root(device: &str) -> MirrorResult<Self> {
        Self::parse(&format!("{device}{DEVICE_SEPARATOR}{PATH_SEPARATOR}"))
    }

    /// Returns the same path with a different capacity limit.
    pub fn with_capacity(mut self, capacity: usize) -> MirrorResult<Self> {
        self.capacity = capacity;
        self.check_capacity(self.buffer.len())?;
        Ok(self)
    }

    pub fn device(&self) -> &str {
        &self.buffer[..self.device_end]
    }

    /// Backend-ready path, always beginning with `/`.
    pub fn subpath(&self) -> &str {
        &self.buffer[self.device_end + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True for a bare device root such as `sdmc:/`.
    pub fn is_root(&self) -> bool {
        self.subpath().len() <= 1
    }

    /// Last path segment; `None` for the device root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.subpath().rsplit(PATH_SEPARATOR).next()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let slash = self.find_last_of(PATH_SEPARATOR)?;
        // Keep the root separator when the parent is the device root.
        let end = if slash == self.device_end + 1 { slash + 1 } else { slash };
        self.prefix(end).ok()
    }

    /// Appends `segment` with exactly one separator in between.
    ///
    /// Leading, trailing and doubled separators in `segment` are dropped.
    pub fn join(&self, segment: impl AsRef<str>) -> MirrorResult<Self> {
        let segment = segment.as_ref();
        if segment.contains(FORBIDDEN_CHARACTERS) {
            return Err(MirrorError::InvalidPath(format!(
                "{segment}: forbidden character in path"
            )));
        }

        let mut joined = self.clone();
        let mut tail = String::with_capacity(segment.len());
        push_segments(&mut tail, segment);
        if tail.is_empty() {
            return Ok(joined);
        }

        let needs_separator = !joined.buffer.ends_with(PATH_SEPARATOR);
        let needed = joined.buffer.len() + usize::from(needs_separator) + tail.len();
        joined.check_capacity(needed)?;

        if needs_separator {
            joined.buffer.push(PATH_SEPARATOR);
        }
        joined.buffer.push_str(&tail);
        Ok(joined)
    }

    /// Appends `raw` verbatim. Only the capacity is checked.
    pub fn unchecked_append(&self, raw: &str) -> MirrorResult<Self> {
        let mut appended = self.clone();
        appended.check_capacity(appended.buffer.len() + raw.len())?;
        appended.buffer.push_str(raw);
        Ok(appended)
    }

    /// Path truncated to its first `length` bytes.
    pub fn prefix(&self, length: usize) -> MirrorResult<Self> {
        let mut length = length.min(self.buffer.len());
        while !self.buffer.is_char_boundary(length) {
            length -= 1;
        }

        let mut buffer = self.buffer[..length].to_string();
        let device_end = buffer.find(DEVICE_SEPARATOR).ok_or_else(|| {
            MirrorError::InvalidPath(format!("{}: prefix {length} cuts the device", self.buffer))
        })?;

        if buffer.len() == device_end + 1 {
            buffer.push(PATH_SEPARATOR);
        }
        while buffer.len() > device_end + 2 && buffer.ends_with(PATH_SEPARATOR) {
            buffer.pop();
        }

        Ok(Self {
            buffer,
            device_end,
            capacity: self.capacity,
        })
    }

    pub fn find_first_of(&self, ch: char) -> Option<usize> {
        self.find_first_of_from(ch, 0)
    }

    /// First occurrence of `ch` at or after byte offset `from`.
    pub fn find_first_of_from(&self, ch: char, from: usize) -> Option<usize> {
        self.buffer.get(from..)?.find(ch).map(|i| i + from)
    }

    pub fn find_last_of(&self, ch: char) -> Option<usize> {
        self.buffer.rfind(ch)
    }

    /// Last occurrence of `ch` at or before byte offset `from`.
    pub fn find_last_of_from(&self, ch: char, from: usize) -> Option<usize> {
        let end = from.saturating_add(1).min(self.buffer.len());
        self.buffer.get(..end)?.rfind(ch)
    }

    fn check_capacity(&self, needed: usize) -> MirrorResult<()> {
        if needed > self.capacity {
            return Err(MirrorError::CapacityExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// Appends the non-empty `/`-separated segments of `raw` to `buffer`.
fn push_segments(buffer: &mut String, raw: &str) {
    for (i, segment) in raw
        .split(PATH_SEPARATOR)
        .filter(|s| !s.is_empty())
        .enumerate()
    {
        if i > 0 {
            buffer.push(PATH_SEPARATOR);
        }
        buffer.push_str(segment);
    }
}

impl PartialEq for DevicePath {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl Eq for DevicePath {}

impl std::hash::Hash for DevicePath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.buffer.hash(state);
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

impl FromStr for DevicePath {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DevicePath {
    type Error = MirrorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for DevicePath {
    type Error = MirrorError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DevicePath> for String {
    fn from(path: DevicePath) -> Self {
        path.buffer
    }
}

impl AsRef<str> for DevicePath {
    fn as_ref(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let path = DevicePath::parse("sdmc:/switch/dump.bin").unwrap();
        assert_eq!(path.device(), "sdmc");
        assert_eq!(path.subpath(), "/switch/dump.bin");
        assert_eq!(path.as_str(), "sdmc:/switch/dump.bin");
    }

    #[test]
    fn test_parse_normalizes_separators() {
        let path = DevicePath::parse("sdmc:///switch//dumps///").unwrap();
        assert_eq!(path.as_str(), "sdmc:/switch/dumps");

        let path = DevicePath::parse("sys:Contents").unwrap();
        assert_eq!(path.as_str(), "sys:/Contents");
    }

    #[test]
    fn test_parse_root() {
        let path = DevicePath::parse("sdmc:/").unwrap();
        assert_eq!(path.subpath(), "/");
        assert!(path.is_root());

        let path = DevicePath::parse("sdmc:////").unwrap();
        assert_eq!(path.as_str(), "sdmc:/");
        assert_eq!(DevicePath::root("save").unwrap().as_str(), "save:/");
    }

    #[test]
    fn test_parse_rejects_missing_device() {
        assert!(matches!(
            DevicePath::parse("/switch/file"),
            Err(MirrorError::InvalidPath(_))
        ));
        assert!(DevicePath::parse(":/switch").is_err());
        assert!(DevicePath::parse("a/b:/c").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_subpath() {
        assert!(matches!(
            DevicePath::parse("sdmc:"),
            Err(MirrorError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_parse_rejects_forbidden_characters() {
        for raw in [
            "sdmc:/a<b", "sdmc:/a>b", "sdmc:/a:b", "sdmc:/a\"b", "sdmc:/a|b", "sdmc:/a?b",
            "sdmc:/a*b", "sdmc:/a\\b",
        ] {
            assert!(DevicePath::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        for raw in ["sdmc:/", "sdmc://a//b/", "sys:Contents/registered", "save:/x/y.bin"] {
            let first = DevicePath::parse(raw).unwrap();
            let rebuilt = format!("{}:{}", first.device(), first.subpath());
            let second = DevicePath::parse(&rebuilt).unwrap();
            assert_eq!(first, second);
            assert_eq!(DevicePath::parse(&second.to_string()).unwrap(), second);
        }
    }

    #[test]
    fn test_join() {
        let root = DevicePath::parse("sdmc:/").unwrap();
        let path = root.join("switch").unwrap().join("dump.bin").unwrap();
        assert_eq!(path.as_str(), "sdmc:/switch/dump.bin");
    }

    #[test]
    fn test_join_never_doubles_separators() {
        let bases = ["sdmc:/", "sdmc:/a", "sdmc:/a/b"];
        let segments = ["x", "/x", "x/", "//x//", "x//y", "///x/y///"];
        for base in bases {
            let base = DevicePath::parse(base).unwrap();
            for segment in segments {
                let joined = base.join(segment).unwrap();
                assert!(!joined.subpath().contains("//"), "{joined}");
                assert!(!joined.subpath().ends_with('/'), "{joined}");
                assert!(joined.as_str().starts_with(base.as_str()));
            }
        }
    }

    #[test]
    fn test_join_empty_segment_is_noop() {
        let base = DevicePath::parse("sdmc:/a").unwrap();
        assert_eq!(base.join("///").unwrap(), base);
    }

    #[test]
    fn test_join_rejects_forbidden_characters() {
        let base = DevicePath::parse("sdmc:/a").unwrap();
        assert!(matches!(base.join("b:c"), Err(MirrorError::InvalidPath(_))));
    }

    #[test]
    fn test_join_fails_when_capacity_exceeded() {
        let base = DevicePath::parse("sdmc:/a").unwrap().with_capacity(12).unwrap();
        assert!(base.join("bcd").is_ok());
        let err = base.join("bcdefgh").unwrap_err();
        assert!(matches!(
            err,
            MirrorError::CapacityExceeded {
                needed: 15,
                capacity: 12
            }
        ));
    }

    #[test]
    fn test_default_capacity_accepts_max_path() {
        let base = DevicePath::parse("sdmc:/").unwrap();
        assert_eq!(base.capacity(), MAX_PATH + 5);
        let long = "a".repeat(MAX_PATH - 1);
        assert!(base.join(&long).is_ok());
        assert!(base.join(format!("{long}b")).is_err());
    }

    #[test]
    fn test_unchecked_append() {
        let base = DevicePath::parse("sdmc:/dump").unwrap();
        let path = base.unchecked_append(".zip").unwrap();
        assert_eq!(path.as_str(), "sdmc:/dump.zip");
        assert_eq!(path.device(), "sdmc");
    }

    #[test]
    fn test_prefix() {
        let path = DevicePath::parse("sdmc:/a/b/c").unwrap();
        assert_eq!(path.prefix(7).unwrap().as_str(), "sdmc:/a");
        assert_eq!(path.prefix(8).unwrap().as_str(), "sdmc:/a");
        assert_eq!(path.prefix(5).unwrap().as_str(), "sdmc:/");
        assert_eq!(path.prefix(100).unwrap(), path);
        assert!(path.prefix(3).is_err());
    }

    #[test]
    fn test_find_first_and_last_of() {
        let path = DevicePath::parse("sdmc:/a/b").unwrap();
        assert_eq!(path.find_first_of('/'), Some(5));
        assert_eq!(path.find_first_of_from('/', 6), Some(7));
        assert_eq!(path.find_first_of_from('/', 8), None);
        assert_eq!(path.find_last_of('/'), Some(7));
        assert_eq!(path.find_last_of_from('/', 6), Some(5));
        assert_eq!(path.find_first_of('#'), None);
        assert_eq!(path.find_first_of_from('/', 100), None);
    }

    #[test]
    fn test_name_and_parent() {
        let path = DevicePath::parse("sdmc:/a/b.txt").unwrap();
        assert_eq!(path.name(), Some("b.txt"));
        let parent = path.parent().unwrap();
        assert_eq!(parent.as_str(), "sdmc:/a");
        let root = parent.parent().unwrap();
        assert_eq!(root.as_str(), "sdmc:/");
        assert!(root.parent().is_none());
        assert!(root.name().is_none());
    }

    #[test]
    fn test_from_str() {
        let path: DevicePath = "save:/x".parse().unwrap();
        assert_eq!(path.device(), "save");
        assert!("nope".parse::<DevicePath>().is_err());
    }
}
