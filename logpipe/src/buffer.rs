//! Arena-style string storage shared by events, tags and batches.
//!
//! Every string an event references is copied once into a [`SourceBuffer`]
//! and handed out as a [`StringView`], a reference-counted slice of the
//! arena chunk. Views stay valid for as long as any clone of them is alive,
//! which is what lets batches move events between containers without
//! re-copying payload bytes: a sealed batch records the buffers its events
//! were allocated from and the views themselves pin the backing memory.

use std::fmt;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};

const CHUNK_CAPACITY: usize = 4096;

/// A cheaply cloneable, immutable UTF-8 view into a [`SourceBuffer`] chunk.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StringView(Bytes);

impl StringView {
    /// View over a static string, used for well-known keys.
    pub fn from_static(s: &'static str) -> Self {
        StringView(Bytes::from_static(s.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        // Views are only ever constructed from `&str`, so this cannot fail.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for StringView {
    fn from(s: String) -> Self {
        StringView(Bytes::from(s.into_bytes()))
    }
}

impl From<&str> for StringView {
    fn from(s: &str) -> Self {
        StringView(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl AsRef<str> for StringView {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

// Byte-wise ordering and hashing match `[u8]`, so maps keyed by views can be
// probed with plain byte slices.
impl std::borrow::Borrow<[u8]> for StringView {
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for StringView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for StringView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for StringView {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for StringView {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Bump arena handing out [`StringView`]s backed by shared chunks.
///
/// A group owns one buffer; batches built from the group keep a handle so
/// accounting can follow which arenas a batch still references.
#[derive(Default)]
pub struct SourceBuffer {
    chunk: Mutex<BytesMut>,
}

impl SourceBuffer {
    pub fn new() -> Self {
        SourceBuffer {
            chunk: Mutex::new(BytesMut::with_capacity(CHUNK_CAPACITY)),
        }
    }

    /// Copy `s` into the arena and return a view of the copy.
    pub fn copy_string(&self, s: &str) -> StringView {
        let mut chunk = self.chunk.lock().unwrap_or_else(|e| e.into_inner());
        if chunk.capacity() < s.len() {
            *chunk = BytesMut::with_capacity(CHUNK_CAPACITY.max(s.len()));
        }
        chunk.extend_from_slice(s.as_bytes());
        // `split` leaves the remaining capacity in place, so consecutive
        // copies keep filling the same allocation until it runs out.
        StringView(chunk.split().freeze())
    }
}

impl fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBuffer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_string_round_trips() {
        let buffer = SourceBuffer::new();
        let view = buffer.copy_string("hello");
        assert_eq!(view.as_str(), "hello");
        assert_eq!(view.len(), 5);
    }

    #[test]
    fn views_outlive_the_buffer() {
        let buffer = SourceBuffer::new();
        let view = buffer.copy_string("survivor");
        drop(buffer);
        assert_eq!(view.as_str(), "survivor");
    }

    #[test]
    fn large_strings_get_their_own_chunk() {
        let buffer = SourceBuffer::new();
        let big = "x".repeat(3 * CHUNK_CAPACITY);
        let small = buffer.copy_string("small");
        let view = buffer.copy_string(&big);
        assert_eq!(view.len(), big.len());
        assert_eq!(small.as_str(), "small");
    }
}
