//! A radio that lives in memory, for tests. It answers the commands and
//! transmit requests the driver sends, loops packets addressed to itself
//! back as received data, and signals attention while it has bytes queued.

use core::{cell::RefCell, convert::Infallible};

use alloc::{collections::VecDeque, rc::Rc, vec::Vec};
use embedded_hal::{digital, spi};

use crate::{
    codec::FrameCodec,
    error::{Error, Result},
    radio::{Address, Bus, Pin},
};

struct Device {
    address: Address,
    reset_low: bool,
    silent: bool,
    outgoing: VecDeque<u8>,
    incoming: FrameCodec,
}

impl Device {
    fn receive(&mut self, bytes: &[u8]) {
        let _ = self.incoming.feed(bytes);
        while let Ok(frame) = self.incoming.dequeue_one() {
            if !self.silent {
                self.respond(&frame);
            }
        }
    }

    fn respond(&mut self, frame: &[u8]) {
        match frame.first() {
            Some(0x08) if frame.len() >= 4 => {
                let seq = frame[1];
                let command = [frame[2], frame[3]];
                let param = &frame[4..];
                let (status, data) = match &command {
                    b"SH" => (0, self.address[..4].to_vec()),
                    b"SL" => (0, self.address[4..].to_vec()),
                    b"TP" => (0, Vec::from([0x00, 0x19])),
                    b"NI" => (0, Vec::from(&b"sim"[..])),
                    _ if !param.is_empty() => (0, Vec::new()),
                    _ => (2, Vec::new()),
                };
                let mut response = Vec::from([0x88, seq, command[0], command[1], status]);
                response.extend_from_slice(&data);
                self.send(&response);
            }
            Some(0x10) if frame.len() >= 14 => {
                let seq = frame[1];
                let to_self = frame[2..10] == self.address;
                if to_self {
                    self.send(&[0x8B, seq, 0xFF, 0xFE, 0, 0x00, 0x00]);
                    let mut rx = Vec::from([0x90]);
                    rx.extend_from_slice(&self.address);
                    rx.extend_from_slice(&[0xFF, 0xFE, 0x01]);
                    rx.extend_from_slice(&frame[14..]);
                    self.send(&rx);
                } else {
                    self.send(&[0x8B, seq, 0xFF, 0xFE, 2, 0x21, 0x00]);
                }
            }
            _ => {}
        }
    }

    fn send(&mut self, payload: &[u8]) {
        self.outgoing.extend(FrameCodec::encode(payload).unwrap());
    }
}

#[derive(Clone)]
pub(crate) struct SimRadio {
    device: Rc<RefCell<Device>>,
}

impl SimRadio {
    pub(crate) fn new(address: Address) -> Self {
        Self {
            device: Rc::new(RefCell::new(Device {
                address,
                reset_low: false,
                silent: false,
                outgoing: VecDeque::new(),
                incoming: FrameCodec::new(),
            })),
        }
    }

    /// Queue raw bytes for the driver to read.
    pub(crate) fn inject(&self, bytes: &[u8]) {
        self.device.borrow_mut().outgoing.extend(bytes.iter().copied());
    }

    /// Stop answering requests.
    pub(crate) fn set_silent(&self, silent: bool) {
        self.device.borrow_mut().silent = silent;
    }
}

impl Bus for SimRadio {
    fn transfer(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut device = self.device.borrow_mut();
        let sent = buf.to_vec();
        for b in buf.iter_mut() {
            *b = device.outgoing.pop_front().unwrap_or(0xFF);
        }
        device.receive(&sent);
        Ok(())
    }

    fn read_pin(&mut self, pin: Pin) -> Result<bool> {
        let device = self.device.borrow();
        match pin {
            Pin::Attention => Ok(device.reset_low || device.outgoing.is_empty()),
            _ => Err(Error::Pin(pin)),
        }
    }

    fn write_pin(&mut self, pin: Pin, high: bool) -> Result<()> {
        let mut device = self.device.borrow_mut();
        if pin == Pin::Reset {
            if !high {
                device.reset_low = true;
                device.outgoing.clear();
                device.incoming = FrameCodec::new();
            } else if device.reset_low {
                device.reset_low = false;
                // modem status: hardware reset
                device.send(&[0x8A, 0x00]);
            }
        }
        Ok(())
    }
}

/// The simulated radio behind `embedded-hal`'s SPI bus.
pub(crate) struct SimSpi(SimRadio);

impl SimSpi {
    pub(crate) fn new(radio: SimRadio) -> Self {
        Self(radio)
    }
}

impl spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl spi::SpiBus for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> core::result::Result<(), Infallible> {
        words.fill(0xFF);
        self.transfer_in_place(words)
    }

    fn write(&mut self, words: &[u8]) -> core::result::Result<(), Infallible> {
        let mut scratch = words.to_vec();
        self.transfer_in_place(&mut scratch)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> core::result::Result<(), Infallible> {
        let mut scratch = write.to_vec();
        scratch.resize(read.len().max(write.len()), 0xFF);
        self.transfer_in_place(&mut scratch)?;
        read.copy_from_slice(&scratch[..read.len()]);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> core::result::Result<(), Infallible> {
        let _ = Bus::transfer(&mut self.0, words);
        Ok(())
    }

    fn flush(&mut self) -> core::result::Result<(), Infallible> {
        Ok(())
    }
}

/// One of the simulated radio's lines as an `embedded-hal` pin.
pub(crate) struct SimPin {
    radio: SimRadio,
    pin: Pin,
}

impl SimPin {
    pub(crate) fn new(radio: SimRadio, pin: Pin) -> Self {
        Self { radio, pin }
    }
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl digital::OutputPin for SimPin {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        let _ = self.radio.write_pin(self.pin, false);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        let _ = self.radio.write_pin(self.pin, true);
        Ok(())
    }
}

impl digital::InputPin for SimPin {
    fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(self.radio.read_pin(self.pin).unwrap_or(true))
    }

    fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}
