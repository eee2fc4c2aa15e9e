//! Two-pass, allocation-free-on-the-hot-path SLS `LogGroup` writer.
//!
//! Callers first compute the exact output size with the `*_size` helpers,
//! then [`LogGroupWriter::prepare`] a buffer of that size and emit fields in
//! a second pass. The log timestamp is clamped to `2^28` so its varint is
//! always five bytes, which is what makes the single-pass size computation
//! possible without knowing the timestamp yet.
//!
//! Field tags (SLS `sls_logs.proto`):
//! `Log = LogGroup#1`, `Log.Time = #1`, `Log.Contents = #2`,
//! `Log.Time_ns = #4 (fixed32)`, `Topic = #3`, `Source = #4`,
//! `MachineUUID = #5`, `LogTags = #6`; content/tag pairs nest `Key = #1`,
//! `Value = #2`.

/// Minimum encoded log time; `1 << 28` keeps the varint at five bytes.
pub const MIN_LOG_TIME: u32 = 1 << 28;

/// Number of bytes a base-128 varint needs for `v`.
pub fn varint_size(v: u32) -> usize {
    if v < (1 << 7) {
        1
    } else if v < (1 << 14) {
        2
    } else if v < (1 << 21) {
        3
    } else if v < (1 << 28) {
        4
    } else {
        5
    }
}

fn push_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn push_fixed32(buf: &mut Vec<u8>, mut value: u32) {
    for _ in 0..4 {
        buf.push((value & 0xFF) as u8);
        value >>= 8;
    }
}

/// Encoded size of a length-delimited string field of `len` bytes.
pub fn string_field_size(len: usize) -> usize {
    1 + varint_size(len as u32) + len
}

/// Encoded size of one `Contents` entry.
pub fn log_content_size(key_len: usize, value_len: usize) -> usize {
    let body = string_field_size(key_len) + string_field_size(value_len);
    body + 1 + varint_size(body as u32)
}

/// Encoded size of one `LogTags` entry; same shape as a content pair.
pub fn log_tag_size(key_len: usize, value_len: usize) -> usize {
    log_content_size(key_len, value_len)
}

/// Encoded size of one log holding `content_size` bytes of content entries.
///
/// Returns `(total, body)`: `body` is what [`LogGroupWriter::start_log`]
/// wants, `total` includes the log's own tag and length prefix.
pub fn log_size(content_size: usize, has_ns: bool) -> (usize, usize) {
    // Time varint is pinned to 5 bytes by the MIN_LOG_TIME clamp.
    let mut body = content_size + 1 + 5;
    if has_ns {
        body += 1 + 4;
    }
    (body + 1 + varint_size(body as u32), body)
}

/// The emit pass.
#[derive(Debug, Default)]
pub struct LogGroupWriter {
    buf: Vec<u8>,
}

impl LogGroupWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset and reserve the exact output size computed by the first pass.
    pub fn prepare(&mut self, size: usize) {
        self.buf.clear();
        self.buf.reserve(size);
    }

    /// Open a log entry whose body is exactly `body_size` bytes.
    pub fn start_log(&mut self, body_size: usize) {
        self.buf.push(0x0A);
        push_varint(&mut self.buf, body_size as u32);
    }

    pub fn add_time(&mut self, time: u32) {
        self.buf.push(0x08);
        push_varint(&mut self.buf, time.max(MIN_LOG_TIME));
    }

    pub fn add_time_ns(&mut self, time_ns: u32) {
        self.buf.push(0x25);
        push_fixed32(&mut self.buf, time_ns);
    }

    pub fn add_content(&mut self, key: &str, value: &str) {
        self.add_content_with(key, value.len(), |buf| buf.extend_from_slice(value.as_bytes()));
    }

    /// Content entry with a streamed value: the closure must append exactly
    /// `value_len` bytes. Used for composed values such as the metric
    /// `__labels__` payload.
    pub fn add_content_with(
        &mut self,
        key: &str,
        value_len: usize,
        write_value: impl FnOnce(&mut Vec<u8>),
    ) {
        self.buf.push(0x12);
        push_varint(
            &mut self.buf,
            (string_field_size(key.len()) + string_field_size(value_len)) as u32,
        );
        self.buf.push(0x0A);
        push_varint(&mut self.buf, key.len() as u32);
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.push(0x12);
        push_varint(&mut self.buf, value_len as u32);
        write_value(&mut self.buf);
    }

    pub fn add_topic(&mut self, topic: &str) {
        self.buf.push(0x1A);
        self.add_string(topic);
    }

    pub fn add_source(&mut self, source: &str) {
        self.buf.push(0x22);
        self.add_string(source);
    }

    pub fn add_machine_uuid(&mut self, uuid: &str) {
        self.buf.push(0x2A);
        self.add_string(uuid);
    }

    pub fn add_log_tag(&mut self, key: &str, value: &str) {
        self.buf.push(0x32);
        push_varint(
            &mut self.buf,
            (string_field_size(key.len()) + string_field_size(value.len())) as u32,
        );
        self.buf.push(0x0A);
        push_varint(&mut self.buf, key.len() as u32);
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.push(0x12);
        push_varint(&mut self.buf, value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn add_string(&mut self, value: &str) {
        push_varint(&mut self.buf, value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
