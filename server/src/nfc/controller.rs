//! Command-level PN532 driver (UM0701-02 §7).
//!
//! Only the four commands the bridge needs are implemented. Every exchange
//! follows the same shape: flush stale bytes, write one information frame,
//! collect the ACK, then (for commands that answer) poll the ready bit and
//! feed reads through the framer until a response frame falls out.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use crate::error::NfcError;
use crate::nfc::framer::{ACK_FRAME, Frame, Framer};
use crate::nfc::transport::Transport;
use crate::nfc::{DetectionStrategy, Pn532Config, TagEmulator, TagPoll};

/// PN532 command codes (UM0701-02 §7.1). The bridge only issues four of
/// these, but the vocabulary is kept whole for reference.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Command {
    Diagnose = 0x00,
    GetFirmwareVersion = 0x02,
    GetGeneralStatus = 0x04,
    ReadRegister = 0x06,
    WriteRegister = 0x08,
    ReadGpio = 0x0C,
    WriteGpio = 0x0E,
    SetSerialBaudRate = 0x10,
    SetParameters = 0x12,
    SamConfiguration = 0x14,
    PowerDown = 0x16,
    RfConfiguration = 0x32,
    InDataExchange = 0x40,
    InCommunicateThru = 0x42,
    InDeselect = 0x44,
    InListPassiveTarget = 0x4A,
    InPsl = 0x4E,
    InAtr = 0x50,
    InRelease = 0x52,
    InSelect = 0x54,
    InAutoPoll = 0x60,
    TgGetData = 0x86,
    TgGetInitiatorCommand = 0x88,
    TgGetTargetStatus = 0x8A,
    TgInitAsTarget = 0x8C,
    TgSetData = 0x8E,
    TgResponseToInitiator = 0x90,
    TgSetGeneralBytes = 0x92,
    TgSetMetaData = 0x94,
}

impl Command {
    /// Response code carried in the first payload byte of the reply.
    fn response_code(self) -> u8 {
        self as u8 + 1
    }
}

/// ACK must arrive this quickly after a command write.
const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Settle time before every command write.
const PRE_COMMAND_DELAY: Duration = Duration::from_millis(50);

/// Pause after closing the chip before bringing it up again.
const REINIT_DELAY: Duration = Duration::from_secs(1);

/// Cadence of the ready-bit poll while expecting an ACK or response.
const READY_POLL: Duration = Duration::from_millis(5);

/// Cadence of the tag-activation poll.
const TAG_POLL: Duration = Duration::from_millis(100);

/// Per-round response bound when actively polling TgGetData.
const TG_GET_DATA_TIMEOUT: Duration = Duration::from_millis(200);

/// Flush reads allowed before a command while the ready bit stays set.
const MAX_FLUSH_READS: usize = 3;

/// Bytes per bus read while draining a response.
const READ_CHUNK: usize = 64;

/// Largest NDEF message that fits TgInitAsTarget's general bytes inside a
/// single normal frame: 255 LEN budget minus TFI, command and the 37-byte
/// emulation parameter block.
const MAX_TARGET_NDEF_LEN: usize = 216;

/// `{IC, Ver, Rev, Support}` from GetFirmwareVersion.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub version: u8,
    pub revision: u8,
    pub support: u8,
}

pub struct Pn532<T> {
    transport: T,
    framer: Framer,
    config: Pn532Config,
    initialized: bool,
}

impl<T: Transport> Pn532<T> {
    pub fn new(transport: T, config: Pn532Config) -> Self {
        Self {
            transport,
            framer: Framer::new(),
            config,
            initialized: false,
        }
    }

    /// Write a bare ACK frame, which cancels whatever command the chip may
    /// still have in flight.
    fn abort(&mut self) -> Result<(), NfcError> {
        self.transport.write(&ACK_FRAME)?;
        Ok(())
    }

    /// Drop whatever the chip still has queued so the next exchange starts
    /// clean, then let the bus settle.
    async fn flush(&mut self) -> Result<(), NfcError> {
        self.framer.clear();
        for _ in 0..MAX_FLUSH_READS {
            if !self.transport.is_ready()? {
                break;
            }
            let _ = self.transport.read(READ_CHUNK)?;
        }
        sleep(PRE_COMMAND_DELAY).await;
        Ok(())
    }

    /// Write one command frame and consume its ACK, retrying a missing ACK
    /// up to the configured budget.
    async fn send_command(&mut self, command: Command, args: &[u8]) -> Result<(), NfcError> {
        let mut payload = Vec::with_capacity(1 + args.len());
        payload.push(command as u8);
        payload.extend_from_slice(args);
        let frame = Framer::build_information_frame(&payload);

        let mut attempt = 0;
        loop {
            self.flush().await?;
            self.transport.write(&frame)?;
            match self.await_ack().await {
                Ok(()) => return Ok(()),
                Err(NfcError::AckTimeout(_)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "PN532: no ACK for {command:?}, retry {attempt}/{}",
                        self.config.max_retries
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn await_ack(&mut self) -> Result<(), NfcError> {
        let deadline = Instant::now() + ACK_TIMEOUT;
        loop {
            if self.transport.is_ready()? {
                let chunk = self.transport.read(READ_CHUNK)?;
                self.framer.feed(&chunk);
                if self.framer.try_extract_ack() {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(NfcError::AckTimeout(ACK_TIMEOUT));
            }
            sleep(READY_POLL).await;
        }
    }

    /// Poll the ready bit and feed reads through the framer until a full
    /// response frame arrives.
    async fn await_response(&mut self, timeout: Duration) -> Result<Vec<u8>, NfcError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.transport.is_ready()? {
                let chunk = self.transport.read(READ_CHUNK)?;
                self.framer.feed(&chunk);
                match self.framer.try_extract_frame() {
                    Some(Frame::Response(payload)) => return Ok(payload),
                    Some(Frame::SyntaxError) => return Err(NfcError::Syntax),
                    None => {}
                }
            }
            if Instant::now() >= deadline {
                return Err(NfcError::ResponseTimeout(timeout));
            }
            sleep(READY_POLL).await;
        }
    }

    async fn get_firmware_version(&mut self) -> Result<FirmwareVersion, NfcError> {
        self.send_command(Command::GetFirmwareVersion, &[]).await?;
        let payload = self.await_response(self.config.ready_timeout).await?;
        if payload.first() != Some(&Command::GetFirmwareVersion.response_code())
            || payload.len() < 5
        {
            return Err(NfcError::UnexpectedResponse);
        }
        Ok(FirmwareVersion {
            ic: payload[1],
            version: payload[2],
            revision: payload[3],
            support: payload[4],
        })
    }

    /// SAMConfiguration: normal mode, default timeout, IRQ pin unused.
    /// Acknowledgement is all the bridge cares about.
    async fn sam_configuration(&mut self) -> Result<(), NfcError> {
        self.send_command(Command::SamConfiguration, &[0x01, 0x14, 0x01])
            .await
    }

    /// TgInitAsTarget with the fixed Type-4 emulation block and the NDEF
    /// message as general bytes. Returns once the ACK is in; the response
    /// frame only materializes when an initiator activates the target and
    /// is picked up by the tag wait.
    async fn tg_init_as_target(&mut self, ndef: &[u8]) -> Result<(), NfcError> {
        if ndef.len() > MAX_TARGET_NDEF_LEN {
            return Err(NfcError::MessageTooLarge(ndef.len()));
        }
        let mut args = Vec::with_capacity(37 + ndef.len());
        args.push(0x00); // mode
        args.extend_from_slice(&[0x04, 0x00]); // SENS_RES
        args.extend_from_slice(&[0x12, 0x34, 0x56]); // NFCID1t
        args.push(0x20); // SEL_RES: ISO/IEC 14443-4
        args.extend_from_slice(&[0u8; 18]); // FeliCa params
        args.extend_from_slice(&[0u8; 10]); // NFCID3t
        args.push(ndef.len() as u8);
        args.extend_from_slice(ndef);
        args.push(0x00); // no Tk bytes
        self.send_command(Command::TgInitAsTarget, &args).await
    }

    async fn poll_for_activation(&mut self, timeout: Duration) -> Result<TagPoll, NfcError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.config.detection {
                DetectionStrategy::InitResponse => {
                    if self.transport.is_ready()? {
                        let chunk = self.transport.read(READ_CHUNK)?;
                        self.framer.feed(&chunk);
                        match self.framer.try_extract_frame() {
                            Some(Frame::Response(_)) => return Ok(TagPoll::Detected),
                            Some(Frame::SyntaxError) => return Err(NfcError::Syntax),
                            None => {}
                        }
                    }
                }
                DetectionStrategy::TgGetData => {
                    self.send_command(Command::TgGetData, &[]).await?;
                    match self.await_response(TG_GET_DATA_TIMEOUT).await {
                        Ok(payload) => {
                            if payload.first() == Some(&Command::TgGetData.response_code())
                                && payload.get(1) == Some(&0x00)
                            {
                                return Ok(TagPoll::Detected);
                            }
                            // Non-zero status: no initiator yet.
                        }
                        Err(NfcError::ResponseTimeout(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(TagPoll::Timeout);
            }
            sleep(TAG_POLL).await;
        }
    }
}

#[async_trait]
impl<T: Transport> TagEmulator for Pn532<T> {
    async fn initialize(&mut self) -> Result<(), NfcError> {
        self.initialized = false;
        // Cancel any command a previous run may have left in flight.
        let _ = self.abort();
        let version = self.get_firmware_version().await?;
        tracing::debug!(
            "PN532 IC {:#04x}, firmware {}.{}, support {:#04x}",
            version.ic,
            version.version,
            version.revision,
            version.support
        );
        self.sam_configuration().await?;
        self.initialized = true;
        tracing::info!("PN532 initialized");
        Ok(())
    }

    async fn init_as_target(&mut self, ndef: &[u8]) -> Result<(), NfcError> {
        if !self.initialized {
            return Err(NfcError::NotInitialized);
        }
        self.tg_init_as_target(ndef).await
    }

    async fn wait_for_tag(&mut self, timeout: Duration) -> Result<TagPoll, NfcError> {
        if !self.initialized {
            return Err(NfcError::NotInitialized);
        }
        self.poll_for_activation(timeout).await
    }

    async fn reinitialize(&mut self) -> Result<(), NfcError> {
        tracing::info!("PN532: reinitializing");
        self.initialized = false;
        self.framer.clear();
        sleep(REINIT_DELAY).await;
        self.initialize().await
    }
}
