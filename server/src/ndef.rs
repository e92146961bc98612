//! NDEF URI record encoding (NFC Forum RTD-URI 1.0).
//!
//! The bridge only ever transmits a single short-record URI message: the
//! receipt URL the tapping phone should open. Encoding is bit-exact; the
//! decoder is the inverse and exists so tests can verify round-trips.

use crate::error::NdefError;

/// Record header: MB=1, ME=1, CF=0, SR=1, IL=0, TNF=001 (well-known).
const HEADER: u8 = 0xD1;

/// Well-known type "U" (URI).
const TYPE_URI: u8 = 0x55;

/// Upper bound on the whole message so it fits the one-byte general-bytes
/// length field of TgInitAsTarget.
const MAX_MESSAGE_LEN: usize = 255;

/// URI abbreviation table, indexed by prefix code (RTD-URI 1.0 §3.2.2).
///
/// Code 0x00 means "no abbreviation"; the full URL follows verbatim.
const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// Find the longest matching abbreviation for `url`.
///
/// Several prefixes share a stem (`urn:` vs `urn:epc:id:`, `http://` vs
/// `http://www.`), so the scan keeps the longest hit rather than the first.
fn abbreviate(url: &str) -> (u8, &str) {
    let mut code = 0u8;
    let mut matched = 0usize;
    for (i, prefix) in URI_PREFIXES.iter().enumerate().skip(1) {
        if prefix.len() > matched && url.starts_with(prefix) {
            code = i as u8;
            matched = prefix.len();
        }
    }
    (code, &url[matched..])
}

/// Encode `url` as a single-record NDEF message.
///
/// Layout: `D1 01 <payload_len> 55 <prefix_code> <remainder>`.
pub fn encode_uri(url: &str) -> Result<Vec<u8>, NdefError> {
    let (code, remainder) = abbreviate(url);
    let payload_len = 1 + remainder.len();
    if payload_len > 0xFF || 4 + payload_len > MAX_MESSAGE_LEN {
        return Err(NdefError::UrlTooLong {
            len: remainder.len(),
        });
    }

    let mut message = Vec::with_capacity(4 + payload_len);
    message.push(HEADER);
    message.push(0x01); // type length
    message.push(payload_len as u8);
    message.push(TYPE_URI);
    message.push(code);
    message.extend_from_slice(remainder.as_bytes());
    Ok(message)
}

/// Decode a message produced by [`encode_uri`] back into the original URL.
pub fn decode_uri(message: &[u8]) -> Result<String, NdefError> {
    if message.len() < 5 {
        return Err(NdefError::Malformed);
    }
    if message[0] != HEADER || message[1] != 0x01 || message[3] != TYPE_URI {
        return Err(NdefError::Malformed);
    }
    let payload_len = message[2] as usize;
    if payload_len < 1 || message.len() != 4 + payload_len {
        return Err(NdefError::Malformed);
    }
    let prefix = URI_PREFIXES
        .get(message[4] as usize)
        .ok_or(NdefError::Malformed)?;
    let remainder = std::str::from_utf8(&message[5..]).map_err(|_| NdefError::Malformed)?;
    Ok(format!("{prefix}{remainder}"))
}
