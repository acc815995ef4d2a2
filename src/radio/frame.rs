//! API frame payloads: building requests and taking responses apart.
//!
//! Byte 0 of every payload is the frame type. Requests and the responses
//! that answer them carry a sequence number in byte 1.

use core::fmt::{self, Display, Formatter};

use alloc::{
    string::String,
    vec::Vec,
};

use crate::error::{Error, Result};

/// A radio's 64-bit hardware address.
pub type Address = [u8; 8];

/// Delivered to every radio in range.
pub const BROADCAST: Address = [0, 0, 0, 0, 0, 0, 0xFF, 0xFF];

pub const COMMAND_REQUEST: u8 = 0x08;
pub const TRANSMIT_REQUEST: u8 = 0x10;
pub const COMMAND_RESPONSE: u8 = 0x88;
pub const MODEM_STATUS: u8 = 0x8A;
pub const TRANSMIT_STATUS: u8 = 0x8B;
pub const RECEIVE: u8 = 0x90;

/// Commands whose response data is a big-endian integer.
const INT_COMMANDS: [&[u8; 2]; 9] = [b"%V", b"DB", b"ER", b"GD", b"HV", b"ID", b"PL", b"TP", b"VR"];

/// Commands whose response data is ASCII text.
const TEXT_COMMANDS: [&[u8; 2]; 2] = [b"NI", b"VL"];

/// Build a local command request. `name` is two ASCII characters.
pub fn command_request(seq: u8, name: &[u8], param: Option<&[u8]>) -> Result<Vec<u8>> {
    if name.len() != 2 || !name.is_ascii() {
        return Err(Error::InvalidCommand);
    }
    let param = param.unwrap_or(&[]);
    let mut frame = Vec::with_capacity(4 + param.len());
    frame.extend_from_slice(&[COMMAND_REQUEST, seq]);
    frame.extend_from_slice(name);
    frame.extend_from_slice(param);
    Ok(frame)
}

/// Build a transmit request using the default routing options.
pub fn transmit_request(seq: u8, dest: &Address, ack: bool, payload: &[u8]) -> Vec<u8> {
    let options = if ack { 0x00 } else { 0x01 };
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&[TRANSMIT_REQUEST, seq]);
    frame.extend_from_slice(dest);
    // reserved, then maximum broadcast radius
    frame.extend_from_slice(&[0xFF, 0xFE, 0x00, options]);
    frame.extend_from_slice(payload);
    frame
}

/// The radio's answer to a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub command: [u8; 2],
    pub status: u8,
    pub data: Vec<u8>,
}

impl CommandResponse {
    /// The decoded value, or the status the radio rejected the command with.
    pub fn into_value(self) -> Result<Value> {
        if self.status != 0 {
            return Err(Error::CommandStatus {
                command: self.command,
                status: self.status,
            });
        }
        Ok(Value::decode(self.command, &self.data))
    }
}

/// Outcome of a transmit request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransmitStatus {
    pub retries: u8,
    pub delivery: u8,
    pub discovery: u8,
}

impl TransmitStatus {
    pub fn delivered(&self) -> bool {
        self.delivery == 0
    }
}

/// A decoded command response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn decode(command: [u8; 2], data: &[u8]) -> Value {
        if INT_COMMANDS.contains(&&command) && data.len() <= 8 {
            return Value::Int(data.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64));
        }
        if TEXT_COMMANDS.contains(&&command) {
            if let Ok(text) = core::str::from_utf8(data) {
                return Value::Text(String::from(text));
            }
        }
        Value::Bytes(data.to_vec())
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", Hex(b, ' ')),
        }
    }
}

/// A parsed frame borrowing from the raw payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    CommandResponse {
        seq: u8,
        command: [u8; 2],
        status: u8,
        data: &'a [u8],
    },
    ModemStatus(u8),
    TransmitStatus {
        seq: u8,
        status: TransmitStatus,
    },
    Receive {
        source: Address,
        options: u8,
        payload: &'a [u8],
    },
    /// Some other frame type; the radio may send more kinds than we use.
    Unknown {
        kind: u8,
        body: &'a [u8],
    },
}

impl<'a> Frame<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Frame<'a>> {
        let kind = match raw.first() {
            Some(kind) => *kind,
            None => return Err(Error::MalformedFrame { kind: 0, len: 0 }),
        };
        let needed = match kind {
            COMMAND_RESPONSE => 5,
            MODEM_STATUS => 2,
            TRANSMIT_STATUS => 7,
            RECEIVE => 12,
            _ => 1,
        };
        if raw.len() < needed {
            return Err(Error::MalformedFrame { kind, len: raw.len() });
        }

        Ok(match kind {
            COMMAND_RESPONSE => Frame::CommandResponse {
                seq: raw[1],
                command: [raw[2], raw[3]],
                status: raw[4],
                data: &raw[5..],
            },
            MODEM_STATUS => Frame::ModemStatus(raw[1]),
            TRANSMIT_STATUS => Frame::TransmitStatus {
                seq: raw[1],
                status: TransmitStatus {
                    retries: raw[4],
                    delivery: raw[5],
                    discovery: raw[6],
                },
            },
            RECEIVE => {
                let mut source = [0u8; 8];
                source.copy_from_slice(&raw[1..9]);
                Frame::Receive {
                    source,
                    options: raw[11],
                    payload: &raw[12..],
                }
            }
            _ => Frame::Unknown { kind, body: &raw[1..] },
        })
    }

    pub fn kind(&self) -> u8 {
        match self {
            Frame::CommandResponse { .. } => COMMAND_RESPONSE,
            Frame::ModemStatus(_) => MODEM_STATUS,
            Frame::TransmitStatus { .. } => TRANSMIT_STATUS,
            Frame::Receive { .. } => RECEIVE,
            Frame::Unknown { kind, .. } => *kind,
        }
    }
}

fn frame_name(kind: u8) -> Option<&'static str> {
    Some(match kind {
        COMMAND_RESPONSE => "AT Command Response",
        MODEM_STATUS => "Modem Status",
        TRANSMIT_STATUS => "Transmit Status",
        RECEIVE => "RX Indicator (AO=0)",
        0x91 => "Explicit Rx Indicator (AO=1)",
        0x95 => "Node Identification Indicator (AO=0)",
        0x97 => "Remote Command Response",
        _ => return None,
    })
}

impl Display for Frame<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match frame_name(self.kind()) {
            Some(name) => name,
            None => {
                if let Frame::Unknown { kind, body } = self {
                    return write!(f, "Unknown frame 0x{:02x} {}", kind, Hex(body, ' '));
                }
                "?"
            }
        };
        write!(f, "{}:", name)?;

        match self {
            Frame::CommandResponse { seq, command, status, data } => {
                write!(f, " id 0x{:x} {}{} ", seq, command[0] as char, command[1] as char)?;
                match status {
                    0 => write!(f, "OK")?,
                    1 => write!(f, "ERR")?,
                    2 => write!(f, "Invalid Cmd")?,
                    3 => write!(f, "Invalid Param")?,
                    other => write!(f, "status {}", other)?,
                }
                if !data.is_empty() {
                    write!(f, " {}", Hex(data, ' '))?;
                }
                Ok(())
            }
            Frame::ModemStatus(status) => match status {
                0x00 => write!(f, " HW reset"),
                0x01 => write!(f, " Watchdog reset"),
                0x0B => write!(f, " Network Woke Up"),
                0x0C => write!(f, " Network Went To Sleep"),
                other => write!(f, " 0x{:02x}", other),
            },
            Frame::TransmitStatus { seq, status } => {
                write!(f, " id 0x{:x}, {} retries, ", seq, status.retries)?;
                match status.delivery {
                    0x00 => write!(f, "Success")?,
                    0x01 => write!(f, "MAC ACK Failure")?,
                    0x21 => write!(f, "Network ACK Failure")?,
                    0x25 => write!(f, "Route Not Found")?,
                    0x74 => write!(f, "Payload too large")?,
                    0x75 => write!(f, "Indirect message unrequested")?,
                    other => write!(f, "delivery 0x{:02x}", other)?,
                }
                match status.discovery {
                    0x00 => write!(f, ", No Discovery Overhead"),
                    0x02 => write!(f, ", Route Discovery"),
                    other => write!(f, ", discovery 0x{:02x}", other),
                }
            }
            Frame::Receive { source, options, payload } => write!(
                f,
                " from {}, options 0x{:x} data {}",
                Hex(source, ':'),
                options,
                Hex(payload, ' ')
            ),
            Frame::Unknown { body, .. } => write!(f, " {}", Hex(body, ' ')),
        }
    }
}

/// Lower-case hex, one separator between bytes.
pub struct Hex<'a>(pub &'a [u8], pub char);

impl Display for Hex<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", self.1)?;
            }
            write!(f, "{:x}", b)?;
        }
        Ok(())
    }
}
