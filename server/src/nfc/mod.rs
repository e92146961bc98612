pub mod controller;
pub mod framer;
pub mod mock;
pub mod transport;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::NfcError;

pub use controller::Pn532;
pub use mock::MockPn532;

/// Outcome of a bounded wait for tag activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPoll {
    /// An external reader activated the emulated tag.
    Detected,
    /// Nothing happened within the allotted time.
    Timeout,
}

/// How tag activation is observed after `TgInitAsTarget`.
///
/// Both variants occur in the wild depending on firmware revision: some
/// chips deliver a delayed TgInitAsTarget response once an initiator shows
/// up, others only answer an explicit TgGetData poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionStrategy {
    /// Passively wait for the delayed TgInitAsTarget response frame.
    #[default]
    InitResponse,
    /// Actively issue TgGetData each poll round; status 0x00 means active.
    TgGetData,
}

/// PN532 attachment parameters.
#[derive(Debug, Clone)]
pub struct Pn532Config {
    pub i2c_bus: u32,
    pub i2c_address: u16,
    /// Bound on the initialization handshake response.
    pub ready_timeout: Duration,
    /// Command retries after a missing ACK.
    pub max_retries: u32,
    pub detection: DetectionStrategy,
}

impl Default for Pn532Config {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            i2c_address: 0x24,
            ready_timeout: Duration::from_secs(3),
            max_retries: 2,
            detection: DetectionStrategy::InitResponse,
        }
    }
}

/// Contract between the session worker and whatever emulates the tag.
///
/// Exactly one implementation is alive per process: the real [`Pn532`]
/// driver, or [`MockPn532`] when `USE_MOCK_PN532` is set. The worker owns
/// it outright, so the hardware never sees two commands in flight.
#[async_trait]
pub trait TagEmulator: Send {
    /// Bring the controller up; must succeed before any other call.
    async fn initialize(&mut self) -> Result<(), NfcError>;

    /// Start emulating a Type-4 tag carrying `ndef`.
    async fn init_as_target(&mut self, ndef: &[u8]) -> Result<(), NfcError>;

    /// Wait for an external reader to pick up the emulated tag.
    async fn wait_for_tag(&mut self, timeout: Duration) -> Result<TagPoll, NfcError>;

    /// Recover after a failed session: settle, then initialize again.
    async fn reinitialize(&mut self) -> Result<(), NfcError>;
}
