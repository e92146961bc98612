//! Hardware-free stand-in for the PN532 controller.
//!
//! Selected with `USE_MOCK_PN532` so the session pipeline and the HTTP
//! facade can be exercised on machines without a controller attached. A
//! simulated phone "taps" after a few seconds, always inside the caller's
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;

use crate::error::NfcError;
use crate::nfc::{TagEmulator, TagPoll};

/// Simulated TgInitAsTarget round-trip.
const INIT_DELAY: Duration = Duration::from_millis(1000);

/// Simulated tap arrives uniformly within this window.
const TAP_DELAY_MIN_MS: u64 = 3000;
const TAP_DELAY_MAX_MS: u64 = 7000;

/// Margin kept below the caller's timeout so the simulated tap lands in time.
const TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// Recovery pause, mirroring the real driver.
const REINIT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct MockPn532 {
    initialized: bool,
    last_ndef: Option<Vec<u8>>,
}

impl MockPn532 {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TagEmulator for MockPn532 {
    async fn initialize(&mut self) -> Result<(), NfcError> {
        self.initialized = true;
        tracing::info!("mock PN532 ready");
        Ok(())
    }

    async fn init_as_target(&mut self, ndef: &[u8]) -> Result<(), NfcError> {
        if !self.initialized {
            return Err(NfcError::NotInitialized);
        }
        sleep(INIT_DELAY).await;
        self.last_ndef = Some(ndef.to_vec());
        Ok(())
    }

    async fn wait_for_tag(&mut self, timeout: Duration) -> Result<TagPoll, NfcError> {
        if !self.initialized {
            return Err(NfcError::NotInitialized);
        }
        if let Some(ndef) = &self.last_ndef {
            tracing::debug!("mock emulating a {} byte NDEF message", ndef.len());
        }
        let tap_after = Duration::from_millis(
            rand::thread_rng().gen_range(TAP_DELAY_MIN_MS..=TAP_DELAY_MAX_MS),
        );
        sleep(tap_after.min(timeout.saturating_sub(TIMEOUT_MARGIN))).await;
        Ok(TagPoll::Detected)
    }

    async fn reinitialize(&mut self) -> Result<(), NfcError> {
        self.initialized = false;
        sleep(REINIT_DELAY).await;
        self.initialize().await
    }
}
