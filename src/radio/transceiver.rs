//! Byte-level access to the radio: pin sequencing, full-duplex frame
//! exchange, and the codec that the read-back bytes feed.
//!
//! Everything here is synchronous. The waiting (reset pulse, attention
//! polling, pacing between reads) happens in `RadioLink`, which never
//! holds the transceiver across a suspension point.

use alloc::{vec, vec::Vec};

use crate::{
    codec::FrameCodec,
    error::Result,
    radio::{Bus, Pin},
};

pub(crate) struct Transceiver<B> {
    bus: B,
    codec: FrameCodec,
    hunk: Vec<u8>,
    checksum_errors: u32,
}

impl<B: Bus> Transceiver<B> {
    pub(crate) fn new(bus: B, hunk_len: usize) -> Self {
        Self {
            bus,
            codec: FrameCodec::new(),
            hunk: vec![0xFF; hunk_len.max(1)],
            checksum_errors: 0,
        }
    }

    /// Hold the radio in reset with DOUT low, which selects SPI mode once
    /// reset is released.
    pub(crate) fn begin_reset(&mut self) -> Result<()> {
        self.bus.write_pin(Pin::Reset, false)?;
        self.bus.write_pin(Pin::Dout, false)
    }

    pub(crate) fn release_reset(&mut self) -> Result<()> {
        self.bus.write_pin(Pin::Reset, true)
    }

    /// Whether the radio has data for us. The line is active low.
    pub(crate) fn attention(&mut self) -> Result<bool> {
        Ok(!self.bus.read_pin(Pin::Attention)?)
    }

    /// The radio is up; start parsing from scratch.
    pub(crate) fn finish_reset(&mut self) -> Result<()> {
        self.bus.write_pin(Pin::Dout, true)?;
        self.codec = FrameCodec::new();
        Ok(())
    }

    /// Frame and send `payload`. The radio may be sending at the same
    /// time; whatever comes back goes into the codec.
    pub(crate) fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut wire = FrameCodec::encode(payload)?;
        self.exchange(&mut wire)
    }

    /// Clock one hunk of idle bytes out to read what the radio has.
    /// Returns the number of bytes read.
    pub(crate) fn read_hunk(&mut self) -> Result<usize> {
        let mut hunk = core::mem::take(&mut self.hunk);
        hunk.fill(0xFF);
        let result = self.exchange(&mut hunk);
        let len = hunk.len();
        self.hunk = hunk;
        result.map(|_| len)
    }

    fn exchange(&mut self, buf: &mut [u8]) -> Result<()> {
        self.bus.write_pin(Pin::Select, false)?;
        let transferred = self.bus.transfer(buf);
        self.bus.write_pin(Pin::Select, true)?;
        transferred?;

        let before = self.codec.checksum_errors();
        if let Err(e) = self.codec.feed(buf) {
            log::warn!("{}", e);
        }
        let failed = self.codec.checksum_errors().wrapping_sub(before);
        self.checksum_errors = self.checksum_errors.wrapping_add(failed);
        Ok(())
    }

    pub(crate) fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub(crate) fn codec_mut(&mut self) -> &mut FrameCodec {
        &mut self.codec
    }

    /// Checksum failures seen since the transceiver was created, across
    /// resets.
    pub(crate) fn checksum_errors(&self) -> u32 {
        self.checksum_errors
    }
}
