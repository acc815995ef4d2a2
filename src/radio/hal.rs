use embedded_hal::{
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};

use crate::{
    error::{Error, Result},
    radio::{Bus, Pin},
};

/// [`Bus`] over `embedded-hal` peripherals: an SPI bus with select driven
/// by hand, three outputs and the attention input.
pub struct HalBus<SPI, RST, DOUT, SEL, ATTN> {
    spi: SPI,
    reset: RST,
    dout: DOUT,
    select: SEL,
    attention: ATTN,
}

impl<SPI, RST, DOUT, SEL, ATTN> HalBus<SPI, RST, DOUT, SEL, ATTN>
where
    SPI: SpiBus,
    RST: OutputPin,
    DOUT: OutputPin,
    SEL: OutputPin,
    ATTN: InputPin,
{
    pub fn new(spi: SPI, reset: RST, dout: DOUT, select: SEL, attention: ATTN) -> Self {
        Self {
            spi,
            reset,
            dout,
            select,
            attention,
        }
    }

    pub fn release(self) -> (SPI, RST, DOUT, SEL, ATTN) {
        (self.spi, self.reset, self.dout, self.select, self.attention)
    }
}

impl<SPI, RST, DOUT, SEL, ATTN> Bus for HalBus<SPI, RST, DOUT, SEL, ATTN>
where
    SPI: SpiBus,
    RST: OutputPin,
    DOUT: OutputPin,
    SEL: OutputPin,
    ATTN: InputPin,
{
    fn transfer(&mut self, buf: &mut [u8]) -> Result<()> {
        self.spi.transfer_in_place(buf).map_err(|_| Error::Spi)?;
        self.spi.flush().map_err(|_| Error::Spi)
    }

    fn read_pin(&mut self, pin: Pin) -> Result<bool> {
        match pin {
            Pin::Attention => self.attention.is_high().map_err(|_| Error::Pin(pin)),
            // outputs are write-only here
            _ => Err(Error::Pin(pin)),
        }
    }

    fn write_pin(&mut self, pin: Pin, high: bool) -> Result<()> {
        let driven = match pin {
            Pin::Reset => drive(&mut self.reset, high).map_err(|_| ()),
            Pin::Dout => drive(&mut self.dout, high).map_err(|_| ()),
            Pin::Select => drive(&mut self.select, high).map_err(|_| ()),
            Pin::Attention => Err(()),
        };
        driven.map_err(|_| Error::Pin(pin))
    }
}

fn drive<P: OutputPin>(pin: &mut P, high: bool) -> core::result::Result<(), P::Error> {
    if high {
        pin.set_high()
    } else {
        pin.set_low()
    }
}
