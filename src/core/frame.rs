use anyhow::Context;

use crate::core::catalog::MAX_PAYLOAD_LEN;

/// Bytes ahead of the payload in a kernel CAN FD frame: id (4), len, flags, 2 reserved
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest 29-bit identifier
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// A frame exactly as it came off the bus
///
/// `bytes_read` is what the transport actually delivered (header included),
/// which may be less than the header plus the declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// Declared payload length
    pub len: u8,
    /// Payload storage, only the first `len` bytes are meaningful
    pub data: [u8; MAX_PAYLOAD_LEN],
    /// Total bytes received for this frame
    pub bytes_read: usize,
}

/// Why a frame was discarded before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameRejection {
    #[error("only {bytes_read} bytes received, need a header and at least one data byte")]
    TooShort { bytes_read: usize },

    #[error("{bytes_read} bytes received but header declares {declared} data bytes")]
    Truncated { bytes_read: usize, declared: u8 },

    #[error("declared length {declared} exceeds {max} bytes", max = MAX_PAYLOAD_LEN)]
    Oversized { declared: u8 },
}

impl RawFrame {
    /// Build a complete frame; payloads longer than 64 bytes are cut
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_PAYLOAD_LEN);
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            len: len as u8,
            data,
            bytes_read: FRAME_HEADER_LEN + len,
        }
    }

    /// Override the received byte count (short reads)
    pub fn with_bytes_read(mut self, bytes_read: usize) -> Self {
        self.bytes_read = bytes_read;
        self
    }

    /// Override the declared length without touching the payload
    pub fn with_declared_len(mut self, len: u8) -> Self {
        self.len = len;
        self
    }

    /// The declared payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(MAX_PAYLOAD_LEN)]
    }

    /// Check if this is an extended (29-bit) CAN ID
    pub fn is_extended(&self) -> bool {
        self.id > 0x7FF
    }

    /// Receive-side validity check
    pub fn check(&self) -> Result<(), FrameRejection> {
        if self.bytes_read < FRAME_HEADER_LEN + 1 {
            return Err(FrameRejection::TooShort {
                bytes_read: self.bytes_read,
            });
        }
        if self.bytes_read < FRAME_HEADER_LEN + self.len as usize {
            return Err(FrameRejection::Truncated {
                bytes_read: self.bytes_read,
                declared: self.len,
            });
        }
        if self.len as usize > MAX_PAYLOAD_LEN {
            return Err(FrameRejection::Oversized { declared: self.len });
        }
        Ok(())
    }

    /// Get data as hex string
    pub fn hex_data(&self) -> String {
        self.payload()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse a candump-style `ID#HEXDATA` token such as `123#DEADBEEF`
    pub fn parse_candump(token: &str) -> anyhow::Result<Self> {
        let (id, data) = token
            .split_once('#')
            .ok_or_else(|| anyhow::anyhow!("Missing '#' in frame '{}'", token))?;
        let id = u32::from_str_radix(id, 16)
            .map_err(|e| anyhow::anyhow!("Bad CAN ID '{}': {}", id, e))?;
        if id > EXTENDED_ID_MASK {
            anyhow::bail!("CAN ID 0x{:X} does not fit in 29 bits", id);
        }
        let data = parse_hex(data)?;
        if data.len() > MAX_PAYLOAD_LEN {
            anyhow::bail!("Frame 0x{:X} carries {} bytes, max is {}", id, data.len(), MAX_PAYLOAD_LEN);
        }
        Ok(Self::new(id, &data))
    }
}

/// Parse hex string to data bytes
pub fn parse_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
    let hex = hex.replace(' ', "");
    // Strip 0x or 0X prefix if present
    let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(&hex);

    if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid hex digit {:?}", bad);
    }
    if hex.len() % 2 != 0 {
        anyhow::bail!("Hex string must have even length");
    }

    // All ASCII from here, so byte pairs are char pairs
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            Ok(u8::from_str_radix(pair, 16)?)
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .context("Failed to parse hex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_frame_passes() {
        let frame = RawFrame::new(0x123, &[1, 2, 3]);
        assert_eq!(frame.bytes_read, 11);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert!(frame.check().is_ok());
    }

    #[test]
    fn test_short_frames_rejected() {
        let empty = RawFrame::new(0x123, &[]);
        assert_eq!(empty.check(), Err(FrameRejection::TooShort { bytes_read: 8 }));

        let truncated = RawFrame::new(0x123, &[0; 8]).with_bytes_read(12);
        assert_eq!(
            truncated.check(),
            Err(FrameRejection::Truncated {
                bytes_read: 12,
                declared: 8
            })
        );

        let oversized = RawFrame::new(0x123, &[0; 8])
            .with_declared_len(70)
            .with_bytes_read(200);
        assert_eq!(oversized.check(), Err(FrameRejection::Oversized { declared: 70 }));
    }

    #[test]
    fn test_parse_candump() {
        let frame = RawFrame::parse_candump("1A0#DEADBEEF").unwrap();
        assert_eq!(frame.id, 0x1A0);
        assert_eq!(frame.payload(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(frame.hex_data(), "DE AD BE EF");
        assert!(!frame.is_extended());

        assert!(RawFrame::parse_candump("1A0DEADBEEF").is_err());
        assert!(RawFrame::parse_candump("1A0#ABC").is_err());
        assert!(RawFrame::parse_candump("FFFFFFFF#00").is_err());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x01 02").unwrap(), vec![1, 2]);
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_non_ascii_hex_is_error() {
        // Even byte length, but the second pair would split a UTF-8 char
        assert!(parse_hex("a\u{e9}1").is_err());
        assert!(parse_hex("\u{e9}\u{e9}").is_err());
        assert!(RawFrame::parse_candump("1A0#a\u{e9}1").is_err());
        assert!(RawFrame::parse_candump("1A0#+1").is_err());
    }
}
