//! Bounded terminal output buffer (SPEC_FULL.md §4.5).
//!
//! Grounded on `agent/src/serial/ring_buffer.rs`'s fixed-capacity byte
//! ring, extended with the spec's second cap: a bridge only ever keeps
//! the last ~256KB *or* the last 500 lines, whichever is smaller, so a
//! late subscriber's replay never grows unbounded even when output is
//! mostly short lines.

use std::collections::VecDeque;

pub const MAX_BYTES: usize = 256 * 1024;
pub const MAX_LINES: usize = 500;

/// Replay buffer for one bridged session. Oldest bytes are dropped from
/// the front once either cap is exceeded.
pub struct RingBuffer {
    data: VecDeque<u8>,
    newline_count: usize,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            data: VecDeque::new(),
            newline_count: 0,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            self.data.push_back(byte);
            if byte == b'\n' {
                self.newline_count += 1;
            }
        }
        self.enforce_caps();
    }

    fn enforce_caps(&mut self) {
        while self.data.len() > MAX_BYTES {
            if let Some(b) = self.data.pop_front() {
                if b == b'\n' {
                    self.newline_count -= 1;
                }
            }
        }
        while self.newline_count > MAX_LINES {
            match self.data.pop_front() {
                Some(b'\n') => self.newline_count -= 1,
                Some(_) => continue,
                None => break,
            }
        }
    }

    pub fn read_all(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Replay as UTF-8 lines for the `buffer` outbound message
    /// (SPEC_FULL.md §4.6). Invalid UTF-8 bytes are replaced rather than
    /// dropped so partial multi-byte sequences at the trim boundary don't
    /// corrupt the rest of the replay.
    pub fn read_lines(&self) -> Vec<String> {
        let bytes = self.read_all();
        String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.newline_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_small() {
        let mut rb = RingBuffer::new();
        rb.write(b"hello");
        assert_eq!(rb.read_all(), b"hello");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn byte_cap_trims_oldest() {
        let mut rb = RingBuffer::new();
        rb.write(&vec![b'x'; MAX_BYTES + 100]);
        assert_eq!(rb.len(), MAX_BYTES);
    }

    #[test]
    fn line_cap_trims_oldest_lines() {
        let mut rb = RingBuffer::new();
        for i in 0..(MAX_LINES + 10) {
            rb.write(format!("line {i}\n").as_bytes());
        }
        let lines = rb.read_lines();
        assert!(lines.len() <= MAX_LINES + 1);
        assert!(!lines.iter().any(|l| l == "line 0"));
        assert!(lines.iter().any(|l| l == &format!("line {}", MAX_LINES + 9)));
    }

    #[test]
    fn clear_empties_buffer() {
        let mut rb = RingBuffer::new();
        rb.write(b"data");
        rb.clear();
        assert!(rb.is_empty());
        assert!(rb.read_all().is_empty());
    }
}
