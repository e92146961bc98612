//! PN532 frame building and streaming parsing (UM0701-02 §6.2).
//!
//! I2C reads split and merge frames arbitrarily: an ACK may arrive glued to
//! the response that follows it, a response may span several reads, and every
//! read is prefixed by the controller's ready-status byte. The framer is
//! therefore a resumable parser over an append-only receive buffer with
//! explicit resynchronization rules, not a parse-one-read function.

/// Frame start sequence, preceded on the wire by any amount of idle bytes.
const PREAMBLE: [u8; 3] = [0x00, 0x00, 0xFF];

/// Trailing postamble byte of information frames.
const POSTAMBLE: u8 = 0x00;

/// The fixed six-byte acknowledge frame (§6.2.1.3).
pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// Frame identifier, host to PN532.
pub const TFI_HOST_TO_PN532: u8 = 0xD4;

/// Frame identifier, PN532 to host.
pub const TFI_PN532_TO_HOST: u8 = 0xD5;

/// Application-level syntax error marker (§6.2.1.5).
const ERROR_TFI: u8 = 0x7F;

/// A complete frame extracted from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Information frame from the PN532; payload is everything after the
    /// TFI byte, so it starts with the response code (command + 1).
    Response(Vec<u8>),
    /// The single-byte 0x7F error frame: the PN532 rejected the last command.
    SyntaxError,
}

/// Streaming receive-side parser plus the transmit-side frame builder.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `payload` in an information frame addressed to the PN532.
    ///
    /// `len` counts the TFI plus payload; both `len` and the data checksum
    /// are two's-complement sums modulo 256.
    pub fn build_information_frame(payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() < 0xFF, "payload exceeds normal frame size");

        let len = payload.len() as u8 + 1;
        let mut sum = TFI_HOST_TO_PN532;
        for &byte in payload {
            sum = sum.wrapping_add(byte);
        }

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&PREAMBLE);
        frame.push(len);
        frame.push(len.wrapping_neg());
        frame.push(TFI_HOST_TO_PN532);
        frame.extend_from_slice(payload);
        frame.push(sum.wrapping_neg());
        frame.push(POSTAMBLE);
        frame
    }

    /// Append a chunk read from the bus.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Drop everything buffered so far.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Scan for the ACK frame; consume through its last byte when found.
    pub fn try_extract_ack(&mut self) -> bool {
        match find(&self.buf, &ACK_FRAME) {
            Some(pos) => {
                self.buf.drain(..pos + ACK_FRAME.len());
                true
            }
            None => false,
        }
    }

    /// Try to extract the next complete information frame.
    ///
    /// Returns `None` when no full frame has arrived yet. On a length
    /// checksum, data checksum or TFI violation the three bytes at the
    /// current frame start are dropped and the scan restarts, so one
    /// corrupt frame cannot wedge the stream.
    pub fn try_extract_frame(&mut self) -> Option<Frame> {
        loop {
            let start = match find(&self.buf, &PREAMBLE) {
                Some(start) => start,
                None => {
                    // Keep the tail so a preamble split across reads survives.
                    if self.buf.len() > 2 {
                        self.buf.drain(..self.buf.len() - 2);
                    }
                    return None;
                }
            };
            if start > 0 {
                self.buf.drain(..start);
            }

            // Layout: 00 00 FF len lcs tfi data… dcs 00
            if self.buf.len() < 5 {
                return None;
            }
            let len = self.buf[3] as usize;
            if self.buf[3].wrapping_add(self.buf[4]) != 0 || len == 0 {
                self.buf.drain(..PREAMBLE.len());
                continue;
            }

            let dcs_index = 5 + len;
            if self.buf.len() <= dcs_index {
                return None;
            }
            let body_sum = self.buf[5..dcs_index]
                .iter()
                .fold(self.buf[dcs_index], |sum, &b| sum.wrapping_add(b));
            if body_sum != 0 {
                self.buf.drain(..PREAMBLE.len());
                continue;
            }

            let frame = match self.buf[5] {
                ERROR_TFI if len == 1 => Some(Frame::SyntaxError),
                TFI_PN532_TO_HOST => Some(Frame::Response(self.buf[6..dcs_index].to_vec())),
                _ => None,
            };

            match frame {
                Some(frame) => {
                    // Consume through the checksum, plus the postamble when
                    // it has already arrived.
                    let mut end = dcs_index + 1;
                    if self.buf.get(end) == Some(&POSTAMBLE) {
                        end += 1;
                    }
                    self.buf.drain(..end);
                    return Some(frame);
                }
                None => {
                    self.buf.drain(..PREAMBLE.len());
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
