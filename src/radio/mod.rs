//! Driver for a packet radio spoken to over SPI.
//!
//! A [`RadioLink`] owns the transceiver and runs a background pump task
//! that reads frames and dispatches them by type. Requests carry a
//! sequence number; the pump resolves the [`Future`] registered under that
//! number when the matching response arrives. Received packets queue up
//! for [`RadioLink::rx`].

mod frame;
mod hal;
mod transceiver;
mod waiters;

#[cfg(test)]
pub(crate) mod sim;

use core::{
    cell::{Cell, RefCell},
    cmp::min,
};

use alloc::{
    collections::VecDeque,
    rc::Rc,
    vec::Vec,
};
use heapless::FnvIndexMap;

pub use self::{
    frame::{
        command_request, transmit_request, Address, CommandResponse, Frame, Hex, TransmitStatus,
        Value, BROADCAST,
    },
    hal::HalBus,
};
use self::{
    transceiver::Transceiver,
    waiters::{FrameWaitTable, Waiter},
};
use crate::{
    config::RadioConfig,
    error::{Error, Result},
    executor::Scheduler,
    future::Future,
    platform::Millis,
    task::defer,
};

/// The lines between the CPU and the radio.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pin {
    /// Active low.
    Reset,
    /// Held low through reset to select SPI mode.
    Dout,
    /// SPI select, active low.
    Select,
    /// Asserted (low) while the radio has data for us.
    Attention,
}

/// What the driver needs from the board.
pub trait Bus {
    /// Full-duplex transfer: `buf` is sent and replaced with what came back.
    fn transfer(&mut self, buf: &mut [u8]) -> Result<()>;
    fn read_pin(&mut self, pin: Pin) -> Result<bool>;
    fn write_pin(&mut self, pin: Pin, high: bool) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Resetting,
    /// Reset done, own address not known yet.
    AddressPending,
    Ready,
}

/// A packet received over the air.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub source: Address,
    pub payload: Vec<u8>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames handed to dispatch.
    pub frames: u32,
    pub unknown_frames: u32,
    pub malformed_frames: u32,
    /// Responses nobody was waiting for.
    pub orphaned: u32,
    pub collisions: u32,
    pub checksum_errors: u32,
    pub overruns: u32,
    pub resets: u32,
}

const ADDRESS_HIGH: u8 = 0b01;
const ADDRESS_LOW: u8 = 0b10;

struct Shared<B> {
    sched: Scheduler,
    config: RadioConfig,
    xcvr: RefCell<Transceiver<B>>,
    state: Cell<LinkState>,
    sequence: Cell<u8>,
    waiting: RefCell<FrameWaitTable>,
    received: RefCell<VecDeque<Packet>>,
    arrival: RefCell<Option<Future<()>>>,
    address: Cell<Address>,
    halves: Cell<u8>,
    values: RefCell<FnvIndexMap<[u8; 2], Value, 32>>,
    modem_status: Cell<Option<u8>>,
    pump_running: Cell<bool>,
    stats: Cell<LinkStats>,
}

/// Handle to one radio. Clones share the same link.
pub struct RadioLink<B> {
    shared: Rc<Shared<B>>,
}

impl<B> Clone for RadioLink<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B: Bus + 'static> RadioLink<B> {
    pub fn new(sched: &Scheduler, bus: B) -> Self {
        Self::with_config(sched, bus, RadioConfig::default())
    }

    pub fn with_config(sched: &Scheduler, bus: B, config: RadioConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                sched: sched.clone(),
                config,
                xcvr: RefCell::new(Transceiver::new(bus, config.rx_hunk_len)),
                state: Cell::new(LinkState::Uninitialized),
                sequence: Cell::new(0),
                waiting: RefCell::new(FrameWaitTable::new()),
                received: RefCell::new(VecDeque::new()),
                arrival: RefCell::new(None),
                address: Cell::new([0; 8]),
                halves: Cell::new(0),
                values: RefCell::new(FnvIndexMap::new()),
                modem_status: Cell::new(None),
                pump_running: Cell::new(false),
                stats: Cell::new(LinkStats::default()),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // bring-up
    // ------------------------------------------------------------------------

    /// Reset the radio, start the frame pump and learn our own address.
    pub async fn start(&self) -> Result<()> {
        self.hard_reset().await?;
        self.ensure_pump();

        self.shared.state.set(LinkState::AddressPending);
        let timeout = self.shared.config.command_timeout_ms;
        let high = self.send_command(b"SH", None)?;
        let low = self.send_command(b"SL", None)?;
        self.wait_response(high, timeout).await?.into_value()?;
        self.wait_response(low, timeout).await?.into_value()?;

        let address = self.address().ok_or(Error::InvalidState)?;
        self.shared.state.set(LinkState::Ready);
        log::info!("radio ready, address {}", Hex(&address, ':'));
        Ok(())
    }

    /// Hard-reset the radio, keeping what we know about it.
    ///
    /// The radio forgets requests in flight, so their slots are freed here.
    /// Callers waiting with a timeout time out; a caller waiting without
    /// one is never resolved.
    pub async fn reset(&self) -> Result<()> {
        let dropped = self.shared.waiting.borrow_mut().clear();
        if dropped > 0 {
            log::warn!("reset dropped {} requests in flight", dropped);
        }
        self.hard_reset().await
    }

    async fn hard_reset(&self) -> Result<()> {
        let config = self.shared.config;
        self.shared.state.set(LinkState::Resetting);
        self.with_xcvr(|x| x.begin_reset())?;
        self.shared.sched.sleep(config.reset_pulse_ms).await;
        self.with_xcvr(|x| x.release_reset())?;

        // no fixed limit: the radio signals when it is up
        while !self.with_xcvr(|x| x.attention())? {
            self.shared.sched.sleep(config.attention_poll_ms).await;
        }
        self.with_xcvr(|x| x.finish_reset())?;

        self.bump(|s| s.resets += 1);
        self.shared.state.set(if self.address().is_some() {
            LinkState::Ready
        } else {
            LinkState::AddressPending
        });
        log::debug!("radio reset");
        Ok(())
    }

    fn ensure_pump(&self) {
        if !self.shared.pump_running.replace(true) {
            let link = self.clone();
            self.shared
                .sched
                .spawn("radio-pump", async move { link.get_and_process_frames().await });
        }
    }

    // ------------------------------------------------------------------------
    // requests
    // ------------------------------------------------------------------------

    /// Send a command. The returned future resolves with the radio's
    /// response.
    pub fn send_command(&self, name: &[u8], param: Option<&[u8]>) -> Result<Future<CommandResponse>> {
        let seq = self.next_sequence();
        let request = command_request(seq, name, param)?;
        let future = Future::new(&self.shared.sched);
        self.send_request(seq, &request, Waiter::Command(future.clone()))?;
        Ok(future)
    }

    /// Send a command and wait for its decoded value.
    pub async fn command(&self, name: &[u8], param: Option<&[u8]>, timeout: Option<Millis>) -> Result<Value> {
        let future = self.send_command(name, param)?;
        self.wait_response(future, timeout).await?.into_value()
    }

    /// Transmit `payload` to `dest`. The returned future resolves with the
    /// delivery report.
    pub fn tx(&self, payload: &[u8], dest: &Address, ack: bool) -> Result<Future<TransmitStatus>> {
        let seq = self.next_sequence();
        let request = transmit_request(seq, dest, ack, payload);
        let future = Future::new(&self.shared.sched);
        self.send_request(seq, &request, Waiter::Transmit(future.clone()))?;
        Ok(future)
    }

    /// Transmit and wait for the delivery report.
    pub async fn transmit(&self, payload: &[u8], dest: &Address, ack: bool, timeout: Option<Millis>) -> Result<TransmitStatus> {
        let future = self.tx(payload, dest, ack)?;
        self.wait_transmit(future, timeout).await
    }

    /// The oldest received packet, waiting for one if none is queued.
    pub async fn rx(&self, timeout: Option<Millis>) -> Result<Packet> {
        let sched = &self.shared.sched;
        let deadline = timeout.map(|t| sched.time().saturating_add(t));
        loop {
            if let Some(packet) = self.shared.received.borrow_mut().pop_front() {
                return Ok(packet);
            }
            // another receiver may drain the queue before we run again
            let arrival = self.arrival();
            let remaining = deadline.map(|d| d.saturating_sub(sched.time()));
            sched.wait_for(&arrival, remaining).await?;
        }
    }

    // The number the next request will use. It is only taken once the
    // request is built, so a refused request does not use one up.
    fn next_sequence(&self) -> u8 {
        match self.shared.sequence.get().wrapping_add(1) {
            0 => 1,
            seq => seq,
        }
    }

    fn send_request(&self, seq: u8, request: &[u8], waiter: Waiter) -> Result<()> {
        self.shared.sequence.set(seq);
        if let Err(e) = self.shared.waiting.borrow_mut().register(seq, waiter) {
            log::warn!("{}", e);
            self.bump(|s| s.collisions += 1);
            return Err(e);
        }
        let sent = self.with_xcvr(|x| x.send_frame(request));
        if sent.is_err() {
            self.shared.waiting.borrow_mut().take(seq);
        }
        sent
    }

    async fn wait_response(&self, future: Future<CommandResponse>, timeout: Option<Millis>) -> Result<CommandResponse> {
        let result = self.shared.sched.wait_for(&future, timeout).await;
        if result.is_err() {
            self.shared.waiting.borrow_mut().evict(&Waiter::Command(future));
        }
        result
    }

    async fn wait_transmit(&self, future: Future<TransmitStatus>, timeout: Option<Millis>) -> Result<TransmitStatus> {
        let result = self.shared.sched.wait_for(&future, timeout).await;
        if result.is_err() {
            self.shared.waiting.borrow_mut().evict(&Waiter::Transmit(future));
        }
        result
    }

    fn arrival(&self) -> Future<()> {
        let mut slot = self.shared.arrival.borrow_mut();
        if let Some(future) = slot.as_ref() {
            if !future.done() {
                return future.clone();
            }
        }
        let future = Future::new(&self.shared.sched);
        *slot = Some(future.clone());
        future
    }

    // ------------------------------------------------------------------------
    // reading frames
    // ------------------------------------------------------------------------

    /// The next frame from the radio: one already parsed, else the rest of
    /// a partly read one, else whatever arrives within `timeout`.
    pub async fn get_frame(&self, timeout: Option<Millis>) -> Result<Vec<u8>> {
        if let Ok(frame) = self.with_xcvr(|x| x.codec_mut().dequeue_one()) {
            return Ok(frame);
        }

        if !self.with_xcvr(|x| x.codec().in_progress()) {
            let sched = &self.shared.sched;
            let config = &self.shared.config;
            let mut poll = config.attention_poll_ms;
            let t0 = sched.time();
            while !self.attention()? {
                let waited = sched.time() - t0;
                let pause = match timeout {
                    Some(limit) if waited >= limit => {
                        return Err(Error::FrameWaitTimeout { waited: limit });
                    }
                    Some(limit) => min(poll, limit - waited),
                    None => poll,
                };
                sched.sleep(pause).await;
                // back off while the line stays quiet
                poll = min(poll.saturating_mul(2), config.attention_idle_poll_ms.max(poll));
            }
        }

        self.read_frame().await
    }

    // Keep reading until a frame completes, but not forever: a wedged link
    // can send idle bytes indefinitely.
    async fn read_frame(&self) -> Result<Vec<u8>> {
        let limit = self.shared.config.frame_read_limit;
        let mut read = 0;
        loop {
            if let Ok(frame) = self.with_xcvr(|x| x.codec_mut().dequeue_one()) {
                return Ok(frame);
            }
            if read >= limit {
                log::warn!("read {} bytes and have no frame yet", read);
                self.bump(|s| s.overruns += 1);
                return Err(Error::FrameOverrun { read });
            }
            read += self.with_xcvr(|x| x.read_hunk())?;
            defer().await;
        }
    }

    fn attention(&self) -> Result<bool> {
        // the reset sequence owns the line until it completes
        if self.shared.state.get() == LinkState::Resetting {
            return Ok(false);
        }
        self.with_xcvr(|x| x.attention())
    }

    async fn get_and_process_frames(self) {
        log::debug!("frame pump running");
        loop {
            match self.get_frame(None).await {
                Ok(frame) => self.process_frame(&frame),
                Err(Error::FrameOverrun { .. }) => {
                    self.with_xcvr(|x| x.codec_mut().reset_parse());
                }
                Err(e) => {
                    log::warn!("frame pump: {}", e);
                    self.shared.sched.sleep(self.shared.config.attention_poll_ms.max(1)).await;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------------

    fn process_frame(&self, raw: &[u8]) {
        self.bump(|s| s.frames += 1);
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("{}", e);
                self.bump(|s| s.malformed_frames += 1);
                return;
            }
        };
        log::trace!("{}", frame);

        match frame {
            Frame::CommandResponse { seq, command, status, data } => {
                if status != 0 {
                    log::debug!("{}", frame);
                }
                self.consume_command_response(seq, CommandResponse {
                    command,
                    status,
                    data: data.to_vec(),
                })
            }
            Frame::ModemStatus(status) => {
                log::info!("{}", frame);
                self.shared.modem_status.set(Some(status));
            }
            Frame::TransmitStatus { seq, status } => {
                if status.retries != 0 || !status.delivered() {
                    log::info!("{}", frame);
                }
                self.consume_transmit_status(seq, status)
            }
            Frame::Receive { source, payload, .. } => self.consume_rx(Packet {
                source,
                payload: payload.to_vec(),
            }),
            Frame::Unknown { .. } => {
                log::debug!("frame not consumed: {}", frame);
                self.bump(|s| s.unknown_frames += 1);
            }
        }
    }

    fn consume_command_response(&self, seq: u8, response: CommandResponse) {
        if response.status == 0 {
            self.learn(&response);
        }
        let waiter = self.shared.waiting.borrow_mut().take(seq);
        match waiter {
            Some(Waiter::Command(future)) => {
                if future.set_result(response).is_err() {
                    log::warn!("response {} resolved twice", seq);
                }
            }
            Some(other) => {
                log::warn!("command response for transmit request {}", seq);
                let _ = self.shared.waiting.borrow_mut().register(seq, other);
            }
            None => self.orphan(seq),
        }
    }

    fn consume_transmit_status(&self, seq: u8, status: TransmitStatus) {
        let waiter = self.shared.waiting.borrow_mut().take(seq);
        match waiter {
            Some(Waiter::Transmit(future)) => {
                if future.set_result(status).is_err() {
                    log::warn!("transmit status {} resolved twice", seq);
                }
            }
            Some(other) => {
                log::warn!("transmit status for command request {}", seq);
                let _ = self.shared.waiting.borrow_mut().register(seq, other);
            }
            None => self.orphan(seq),
        }
    }

    fn consume_rx(&self, packet: Packet) {
        self.shared.received.borrow_mut().push_back(packet);
        let arrival = self.shared.arrival.borrow_mut().take();
        if let Some(arrival) = arrival {
            if !arrival.done() {
                let _ = arrival.set_result(());
            }
        }
    }

    fn orphan(&self, seq: u8) {
        log::warn!("nobody waiting for response {}", seq);
        self.bump(|s| s.orphaned += 1);
    }

    // Remember the value; the two address queries also fill in our address.
    fn learn(&self, response: &CommandResponse) {
        let bit = match &response.command {
            b"SH" => ADDRESS_HIGH,
            b"SL" => ADDRESS_LOW,
            _ => 0,
        };
        if bit != 0 {
            // the radio drops leading zero bytes
            let data = &response.data;
            let n = min(4, data.len());
            let mut half = [0u8; 4];
            half[4 - n..].copy_from_slice(&data[data.len() - n..]);

            let mut address = self.shared.address.get();
            let at = if bit == ADDRESS_HIGH { 0 } else { 4 };
            address[at..at + 4].copy_from_slice(&half);
            self.shared.address.set(address);
            self.shared.halves.set(self.shared.halves.get() | bit);
        }

        let value = Value::decode(response.command, &response.data);
        if self.shared.values.borrow_mut().insert(response.command, value).is_err() {
            log::warn!("attribute table full, not keeping {}", Hex(&response.command, ' '));
        }
    }

    // ------------------------------------------------------------------------
    // state
    // ------------------------------------------------------------------------

    /// Our hardware address, once both halves are known.
    pub fn address(&self) -> Option<Address> {
        if self.shared.halves.get() == ADDRESS_HIGH | ADDRESS_LOW {
            Some(self.shared.address.get())
        } else {
            None
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    /// Last modem status reported by the radio.
    pub fn modem_status(&self) -> Option<u8> {
        self.shared.modem_status.get()
    }

    /// Packets queued for `rx`.
    pub fn rx_available(&self) -> usize {
        self.shared.received.borrow().len()
    }

    /// Last successful response to the named command.
    pub fn value(&self, name: &[u8; 2]) -> Option<Value> {
        self.shared.values.borrow().get(name).cloned()
    }

    /// Requests still waiting for their response.
    pub fn pending_requests(&self) -> usize {
        self.shared.waiting.borrow().pending()
    }

    pub fn stats(&self) -> LinkStats {
        let mut stats = self.shared.stats.get();
        stats.checksum_errors = self.shared.xcvr.borrow().checksum_errors();
        stats
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.sched
    }

    fn with_xcvr<R>(&self, f: impl FnOnce(&mut Transceiver<B>) -> R) -> R {
        f(&mut *self.shared.xcvr.borrow_mut())
    }

    fn bump(&self, update: impl FnOnce(&mut LinkStats)) {
        let mut stats = self.shared.stats.get();
        update(&mut stats);
        self.shared.stats.set(stats);
    }
}
