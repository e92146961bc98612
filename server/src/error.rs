use std::time::Duration;

use thiserror::Error;

/// Raw I2C bus failure, reported by the transport layer.
#[derive(Debug, Clone, Error)]
#[error("I2C bus error: {0}")]
pub struct TransportError(pub String);

/// Failures of the PN532 command layer.
///
/// The session worker maps every variant into a session status transition;
/// none of these ever escapes as a panic.
#[derive(Debug, Error)]
pub enum NfcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The command was written but no ACK frame showed up in time.
    #[error("no ACK within {0:?}")]
    AckTimeout(Duration),
    /// The PN532 answered with its single-byte 0x7F error frame.
    #[error("PN532 reported a syntax error")]
    Syntax,
    /// No well-formed response frame arrived before the deadline.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
    /// A frame parsed but did not carry the expected response code.
    #[error("unexpected response from PN532")]
    UnexpectedResponse,
    /// The TgInitAsTarget argument block exceeds a single normal frame.
    #[error("NDEF message too large for the target frame ({0} bytes)")]
    MessageTooLarge(usize),
    /// A command was issued before `initialize` succeeded.
    #[error("controller is not initialized")]
    NotInitialized,
}

/// NDEF message construction failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NdefError {
    /// The abbreviated URL does not fit the one-byte payload length of a
    /// short record plus the one-byte general-bytes length of TgInitAsTarget.
    #[error("URL too long for a short NDEF record ({len} bytes after abbreviation)")]
    UrlTooLong { len: usize },
    /// Decoder input is not a single-record URI message.
    #[error("not a single-record NDEF URI message")]
    Malformed,
}
