use crate::{
    error::{Error, Result},
    future::Future,
    radio::frame::{CommandResponse, TransmitStatus},
};

/// Whoever is waiting on a sequence number's response frame.
pub(crate) enum Waiter {
    Command(Future<CommandResponse>),
    Transmit(Future<TransmitStatus>),
}

impl Waiter {
    fn same(&self, other: &Waiter) -> bool {
        match (self, other) {
            (Waiter::Command(a), Waiter::Command(b)) => a.same(b),
            (Waiter::Transmit(a), Waiter::Transmit(b)) => a.same(b),
            _ => false,
        }
    }
}

/// One slot per sequence number. A slot holds at most one waiter; a
/// request can only take a slot once the previous response has arrived or
/// its requester gave up.
pub(crate) struct FrameWaitTable {
    slots: [Option<Waiter>; 256],
}

impl FrameWaitTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub(crate) fn register(&mut self, seq: u8, waiter: Waiter) -> Result<()> {
        let slot = &mut self.slots[seq as usize];
        if slot.is_some() {
            return Err(Error::SequenceCollision(seq));
        }
        *slot = Some(waiter);
        Ok(())
    }

    /// Claim the waiter for an arriving response.
    pub(crate) fn take(&mut self, seq: u8) -> Option<Waiter> {
        self.slots[seq as usize].take()
    }

    /// Drop `waiter` from whichever slot still holds it.
    pub(crate) fn evict(&mut self, waiter: &Waiter) -> bool {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map_or(false, |w| w.same(waiter)) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Drop every waiter. Returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let mut dropped = 0;
        for slot in self.slots.iter_mut() {
            if slot.take().is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    pub(crate) fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
