//! Buffered emission of generated text.
//!
//! Raw increments accumulate in a [`StreamBuffer`] until the running buffer
//! holds enough characters or any boundary character, then the buffer is
//! sanitized and emitted as one chunk. Sanitizing removes control markers and
//! keeps back any bytes that cannot be emitted yet:
//!
//! - an incomplete UTF-8 sequence at the end of the buffer
//! - a trailing proper prefix of a control marker (so a marker split across
//!   two increments is still removed)
//!
//! Kept-back bytes start the next flush. At end of stream an incomplete
//! sequence is dropped and everything else is emitted.

use parley_config::StreamConfig;
use tracing::debug;

/// When to flush and what to strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush once the buffer holds at least this many characters.
    pub min_chars: usize,
    /// Flush as soon as any of these characters is buffered.
    pub boundary_chars: Vec<char>,
    /// Removed from every emitted chunk.
    pub control_markers: Vec<String>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl FlushPolicy {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            min_chars: config.min_flush_chars,
            boundary_chars: config.boundary_chars.chars().collect(),
            control_markers: config
                .control_markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
        }
    }
}

/// Text accumulator for a single generation call.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    policy: FlushPolicy,
    pending: Vec<u8>,
}

impl StreamBuffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            pending: Vec::new(),
        }
    }

    /// Append an increment and flush if the policy says so.
    pub fn push(&mut self, piece: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(piece);
        if self.should_flush() {
            self.flush()
        } else {
            None
        }
    }

    /// Whether the decodable part of the buffer meets a flush condition.
    pub fn should_flush(&self) -> bool {
        let end = incomplete_tail_start(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..end]);
        let mut count = 0;
        for c in text.chars() {
            count += 1;
            if count >= self.policy.min_chars || self.policy.boundary_chars.contains(&c) {
                return true;
            }
        }
        false
    }

    /// Sanitize and emit the buffer, keeping back bytes that are not
    /// complete yet. Returns `None` when nothing is left to emit.
    pub fn flush(&mut self) -> Option<String> {
        self.drain(false)
    }

    /// Final flush at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.drain(true)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes currently buffered, including kept-back ones.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn drain(&mut self, last: bool) -> Option<String> {
        let mut tail = self.pending.split_off(incomplete_tail_start(&self.pending));
        let text = self.strip_markers(&String::from_utf8_lossy(&self.pending));
        self.pending.clear();

        let keep = if last {
            if !tail.is_empty() {
                debug!(bytes = tail.len(), "Dropping incomplete trailing character");
                tail.clear();
            }
            0
        } else {
            self.marker_prefix_len(&text)
        };

        let (emit, held) = text.split_at(text.len() - keep);
        self.pending.extend_from_slice(held.as_bytes());
        self.pending.append(&mut tail);

        (!emit.is_empty()).then(|| emit.to_owned())
    }

    fn strip_markers(&self, text: &str) -> String {
        let mut out = text.to_owned();
        // Removing one marker can join the halves of another.
        loop {
            let before = out.len();
            for marker in &self.policy.control_markers {
                if out.contains(marker.as_str()) {
                    out = out.replace(marker.as_str(), "");
                }
            }
            if out.len() == before {
                return out;
            }
        }
    }

    /// Length of the longest proper marker prefix `text` ends with.
    fn marker_prefix_len(&self, text: &str) -> usize {
        self.policy
            .control_markers
            .iter()
            .filter_map(|marker| {
                (1..marker.len())
                    .rev()
                    .find(|&n| marker.is_char_boundary(n) && text.ends_with(&marker[..n]))
            })
            .max()
            .unwrap_or(0)
    }
}

/// Index where a trailing incomplete UTF-8 sequence begins, or `bytes.len()`
/// when the buffer ends on a complete character.
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let start = len - back;
        let lead = bytes[start];
        if lead & 0xC0 == 0x80 {
            continue;
        }
        let width = match lead {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if start + width > len { start } else { len };
    }
    len
}
