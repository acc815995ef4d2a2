//! Tunables for the scheduler and the radio link.

use crate::platform::Millis;

#[derive(Copy, Clone, Debug)]
pub struct SchedulerConfig {
    /// The idle hook only runs when the loop knows it will sit idle at
    /// least this long.
    pub idle_hook_threshold_ms: Millis,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_hook_threshold_ms: 6,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RadioConfig {
    /// Bytes clocked out of the radio per read.
    pub rx_hunk_len: usize,
    /// Give up on a frame after reading this many bytes. Must exceed the
    /// longest frame the radio sends.
    pub frame_read_limit: usize,
    /// How often to sample the attention line when a wait for data starts.
    pub attention_poll_ms: Millis,
    /// The interval doubles while the line stays quiet, up to this.
    pub attention_idle_poll_ms: Millis,
    /// How long reset is held low. Noticeably less than 10ms fails.
    pub reset_pulse_ms: Millis,
    /// Budget for the address queries issued by `start`.
    pub command_timeout_ms: Option<Millis>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            rx_hunk_len: 16,
            frame_read_limit: 300,
            attention_poll_ms: 1,
            attention_idle_poll_ms: 8,
            reset_pulse_ms: 10,
            command_timeout_ms: Some(1000),
        }
    }
}
