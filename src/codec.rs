//! Streaming parser and serializer for the radio's wire framing:
//!
//! ```text
//! 0x7E | len_hi | len_lo | payload[len] | 0xFF - (sum(payload) & 0xFF)
//! ```
//!
//! The parser is resumable. Feed it whatever the bus produced, in chunks of
//! any size; complete, checksum-valid payloads queue up in arrival order.

use core::{cmp::min, mem};

use alloc::{
    collections::VecDeque,
    vec::Vec,
};

use crate::error::{Error, Result};

/// Marks the start of every frame.
pub const SYNC: u8 = 0x7E;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseState {
    /// Between frames, skipping idle bytes.
    Seeking,
    GotSync,
    GotLengthHi,
    Accumulating,
    AwaitingChecksum,
}

#[derive(Debug)]
pub struct FrameCodec {
    state: ParseState,
    declared: usize,
    buf: Vec<u8>,
    frames: VecDeque<Vec<u8>>,
    total_marking_bytes: u64,
    marking_bytes_since_sync: u32,
    frames_completed: u32,
    checksum_errors: u32,
    last_bad: Option<(Vec<u8>, u8)>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: ParseState::Seeking,
            declared: 0,
            buf: Vec::new(),
            frames: VecDeque::new(),
            total_marking_bytes: 0,
            marking_bytes_since_sync: 0,
            frames_completed: 0,
            checksum_errors: 0,
            last_bad: None,
        }
    }

    /// Advance the parser over `bytes`.
    ///
    /// The whole chunk is always consumed. A frame with a bad check byte is
    /// dropped, the parser goes back to seeking, and the first such failure
    /// in the chunk is returned; frames after it are still queued.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Result<()> {
        let mut failure = None;

        while let Some(&next) = bytes.first() {
            match self.state {
                ParseState::Seeking => match bytes.iter().position(|b| *b == SYNC) {
                    Some(at) => {
                        self.total_marking_bytes += at as u64;
                        self.marking_bytes_since_sync = 0;
                        self.state = ParseState::GotSync;
                        bytes = &bytes[at + 1..];
                    }
                    None => {
                        self.total_marking_bytes += bytes.len() as u64;
                        self.marking_bytes_since_sync =
                            self.marking_bytes_since_sync.saturating_add(bytes.len() as u32);
                        bytes = &[];
                    }
                },
                ParseState::GotSync => {
                    self.declared = (next as usize) << 8;
                    self.state = ParseState::GotLengthHi;
                    bytes = &bytes[1..];
                }
                ParseState::GotLengthHi => {
                    self.declared |= next as usize;
                    self.buf.clear();
                    self.buf.reserve(self.declared);
                    self.state = if self.declared == 0 {
                        ParseState::AwaitingChecksum
                    } else {
                        ParseState::Accumulating
                    };
                    bytes = &bytes[1..];
                }
                ParseState::Accumulating => {
                    let take = min(self.declared - self.buf.len(), bytes.len());
                    self.buf.extend_from_slice(&bytes[..take]);
                    bytes = &bytes[take..];
                    if self.buf.len() == self.declared {
                        self.state = ParseState::AwaitingChecksum;
                    }
                }
                ParseState::AwaitingChecksum => {
                    bytes = &bytes[1..];
                    self.state = ParseState::Seeking;
                    let payload = mem::take(&mut self.buf);
                    if checksum(&payload).wrapping_add(next) == 0xFF {
                        self.frames.push_back(payload);
                        self.frames_completed = self.frames_completed.wrapping_add(1);
                    } else {
                        log::trace!("dropping {} byte frame, check byte 0x{:02x}", payload.len(), next);
                        self.checksum_errors = self.checksum_errors.wrapping_add(1);
                        self.last_bad = Some((payload.clone(), next));
                        if failure.is_none() {
                            failure = Some(Error::Checksum { payload, check: next });
                        }
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The oldest complete payload.
    pub fn dequeue_one(&mut self) -> Result<Vec<u8>> {
        self.frames.pop_front().ok_or(Error::Empty)
    }

    /// Whether the parser is part-way through a frame.
    pub fn in_progress(&self) -> bool {
        self.state != ParseState::Seeking
    }

    /// Abandon any partial frame. Queued frames and counters are kept.
    pub fn reset_parse(&mut self) {
        self.state = ParseState::Seeking;
        self.declared = 0;
        self.buf.clear();
    }

    /// Frame `payload` for the wire.
    pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(SYNC);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out.push(0xFF - checksum(payload));
        Ok(out)
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.frames.iter().map(Vec::as_slice)
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn total_marking_bytes(&self) -> u64 {
        self.total_marking_bytes
    }

    /// Idle bytes seen since the last sync byte.
    pub fn marking_bytes_since_sync(&self) -> u32 {
        self.marking_bytes_since_sync
    }

    pub fn frames_completed(&self) -> u32 {
        self.frames_completed
    }

    pub fn checksum_errors(&self) -> u32 {
        self.checksum_errors
    }

    /// The most recent rejected payload and its check byte.
    pub fn last_bad(&self) -> Option<(&[u8], u8)> {
        self.last_bad.as_ref().map(|(p, c)| (p.as_slice(), *c))
    }
}

fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
