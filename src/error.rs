use core::fmt;

use alloc::vec::Vec;

use crate::{
    platform::Millis,
    radio::Pin,
};

pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong in the runtime or on the radio link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// An awaited future did not resolve within its budget.
    Timeout,

    /// A frame arrived whose check byte does not match its payload.
    /// The parser has already resynchronised.
    Checksum { payload: Vec<u8>, check: u8 },

    /// No complete frame is queued.
    Empty,

    /// The radio kept sending bytes without completing a frame.
    FrameOverrun { read: usize },

    /// The radio never signalled data within the requested time.
    FrameWaitTimeout { waited: Millis },

    /// The radio rejected a command with a non-zero status.
    CommandStatus { command: [u8; 2], status: u8 },

    /// A future's result was read before it was set, or set twice.
    InvalidState,

    /// A new request picked a sequence number whose previous request
    /// is still waiting for its response.
    SequenceCollision(u8),

    /// Command names are exactly two ASCII characters.
    InvalidCommand,

    /// A frame too short for its declared type.
    MalformedFrame { kind: u8, len: usize },

    /// Payloads are limited by the 16-bit length field.
    PayloadTooLarge(usize),

    /// The SPI transfer failed.
    Spi,

    /// A pin could not be driven or sampled.
    Pin(Pin),

    /// The loop stopped before the awaited task completed.
    Stopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "timed out"),
            Error::Checksum { payload, check } => write!(
                f,
                "bad checksum: sum(frame) = 0x{:x}, check byte = 0x{:x}",
                payload.iter().fold(0u32, |acc, b| acc + *b as u32),
                check
            ),
            Error::Empty => write!(f, "no complete frame queued"),
            Error::FrameOverrun { read } => {
                write!(f, "read {} bytes without completing a frame", read)
            }
            Error::FrameWaitTimeout { waited } => write!(f, "no frame within {}ms", waited),
            Error::CommandStatus { command, status } => write!(
                f,
                "command {}{} failed with status {}",
                command[0] as char, command[1] as char, status
            ),
            Error::InvalidState => write!(f, "future in wrong state"),
            Error::SequenceCollision(seq) => {
                write!(f, "sequence number {} still has a request in flight", seq)
            }
            Error::InvalidCommand => write!(f, "command names are two ASCII characters"),
            Error::MalformedFrame { kind, len } => {
                write!(f, "frame type 0x{:02x} too short ({} bytes)", kind, len)
            }
            Error::PayloadTooLarge(len) => write!(f, "payload of {} bytes does not fit a frame", len),
            Error::Spi => write!(f, "SPI transfer failed"),
            Error::Pin(pin) => write!(f, "pin {:?} failed", pin),
            Error::Stopped => write!(f, "loop stopped before completion"),
        }
    }
}
