//! Samsung MDC binary framing.
//!
//! ## Wire format
//!
//! **Command frame**:
//! ```text
//! header:      u8   0xAA
//! command:     u8
//! display_id:  u8
//! data_length: u8
//! data:        [u8; data_length]
//! checksum:    u8   sum of the preceding bytes mod 256
//! ```
//!
//! **Reply frame** uses command `0xFF` and carries
//! `'A' | 'N', r-cmd, values...` as data. `'N'` (NAK) is followed by an
//! error code.
//!
//! The header byte is part of the checksum by default; Samsung firmware
//! sums from the command byte onward, selectable with
//! [`ChecksumScope::ExcludeHeader`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::WallError;
use crate::message::{AssetRef, CommandKind, InputSource, PowerState, Reply, StatusReport};

// ── Constants ────────────────────────────────────────────────────

/// First byte of every MDC frame.
pub const MDC_HEADER: u8 = 0xAA;

/// Command byte of reply frames.
pub const MDC_REPLY: u8 = 0xFF;

pub const MDC_ACK: u8 = b'A';
pub const MDC_NAK: u8 = b'N';

/// Header, command, display id, length.
pub const MDC_PREFIX_LEN: usize = 4;

/// Smallest possible frame: prefix plus checksum.
pub const MDC_MIN_FRAME_LEN: usize = MDC_PREFIX_LEN + 1;

/// Sub-command of the launcher command that sets the URL to play.
pub const LAUNCHER_URL_ADDRESS: u8 = 0x82;

// ── Configuration ────────────────────────────────────────────────

/// Which bytes contribute to the frame checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumScope {
    /// Every byte before the checksum, header included.
    #[default]
    IncludeHeader,
    /// Every byte after the header and before the checksum.
    ExcludeHeader,
}

/// MDC command table.
///
/// Only the subset needed for power, volume, input, status and content
/// launch is modelled; the bytes are configurable per firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdcConfig {
    pub checksum: ChecksumScope,
    pub power: u8,
    pub volume: u8,
    pub input: u8,
    pub status: u8,
    pub launcher: u8,
}

impl Default for MdcConfig {
    fn default() -> Self {
        Self {
            checksum: ChecksumScope::IncludeHeader,
            power: 0x11,
            volume: 0x12,
            input: 0x14,
            status: 0x00,
            launcher: 0xC7,
        }
    }
}

impl MdcConfig {
    /// The command byte used for a command kind.
    pub fn command_byte(&self, kind: &CommandKind) -> u8 {
        match kind {
            CommandKind::Power(_) => self.power,
            CommandKind::Volume(_) => self.volume,
            CommandKind::Input(_) => self.input,
            CommandKind::Status => self.status,
            CommandKind::Deploy(_) => self.launcher,
        }
    }
}

/// Sum `bytes` modulo 256 according to `scope`.
///
/// `bytes` is everything in the frame before the checksum byte.
pub fn checksum(bytes: &[u8], scope: ChecksumScope) -> u8 {
    let counted = match scope {
        ChecksumScope::IncludeHeader => bytes,
        ChecksumScope::ExcludeHeader => bytes.get(1..).unwrap_or_default(),
    };
    counted.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ── MdcFrame ─────────────────────────────────────────────────────

/// One MDC frame, without header and checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdcFrame {
    pub command: u8,
    pub display_id: u8,
    pub data: Vec<u8>,
}

impl MdcFrame {
    pub fn new(command: u8, display_id: u8, data: Vec<u8>) -> Result<Self, WallError> {
        if data.len() > u8::MAX as usize {
            return Err(WallError::InvalidCommand(format!(
                "MDC data too long: {} bytes (max {})",
                data.len(),
                u8::MAX
            )));
        }
        Ok(Self {
            command,
            display_id,
            data,
        })
    }

    /// Build an ACK reply for `r_cmd` carrying `values`.
    pub fn ack(display_id: u8, r_cmd: u8, values: &[u8]) -> Result<Self, WallError> {
        let mut data = Vec::with_capacity(values.len() + 2);
        data.push(MDC_ACK);
        data.push(r_cmd);
        data.extend_from_slice(values);
        Self::new(MDC_REPLY, display_id, data)
    }

    /// Build a NAK reply for `r_cmd` with an error code.
    pub fn nak(display_id: u8, r_cmd: u8, code: u8) -> Self {
        Self {
            command: MDC_REPLY,
            display_id,
            data: vec![MDC_NAK, r_cmd, code],
        }
    }

    /// Total encoded length including header and checksum.
    pub fn encoded_len(&self) -> usize {
        MDC_MIN_FRAME_LEN + self.data.len()
    }

    /// Serialize to wire bytes.
    pub fn encode(&self, scope: ChecksumScope) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(MDC_HEADER);
        buf.put_u8(self.command);
        buf.put_u8(self.display_id);
        buf.put_u8(self.data.len() as u8);
        buf.put_slice(&self.data);
        let sum = checksum(&buf, scope);
        buf.put_u8(sum);
        buf.freeze()
    }

    /// Parse and validate one complete frame.
    ///
    /// Header, length and checksum are checked; any mismatch is a
    /// protocol error, never a connection error.
    pub fn parse(bytes: &[u8], scope: ChecksumScope) -> Result<Self, WallError> {
        if bytes.len() < MDC_MIN_FRAME_LEN {
            return Err(WallError::InvalidFrameLength {
                expected: MDC_MIN_FRAME_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0] != MDC_HEADER {
            return Err(WallError::InvalidHeader(bytes[0]));
        }
        let data_len = bytes[3] as usize;
        let expected = MDC_MIN_FRAME_LEN + data_len;
        if bytes.len() != expected {
            return Err(WallError::InvalidFrameLength {
                expected,
                actual: bytes.len(),
            });
        }
        let body = &bytes[..expected - 1];
        let wanted = checksum(body, scope);
        let actual = bytes[expected - 1];
        if wanted != actual {
            return Err(WallError::ChecksumMismatch {
                expected: wanted,
                actual,
            });
        }
        Ok(Self {
            command: bytes[1],
            display_id: bytes[2],
            data: bytes[MDC_PREFIX_LEN..expected - 1].to_vec(),
        })
    }
}

// ── MdcCodec ─────────────────────────────────────────────────────

/// Translates commands for one display into MDC frames and back.
#[derive(Debug, Clone)]
pub struct MdcCodec {
    display_id: u8,
    config: MdcConfig,
}

impl MdcCodec {
    pub fn new(display_id: u8, config: MdcConfig) -> Self {
        Self { display_id, config }
    }

    pub fn display_id(&self) -> u8 {
        self.display_id
    }

    pub fn config(&self) -> &MdcConfig {
        &self.config
    }

    /// Build the command frame for `kind`.
    pub fn frame_for(&self, kind: &CommandKind) -> Result<MdcFrame, WallError> {
        kind.validate()?;
        let data = match kind {
            CommandKind::Power(p) => vec![*p as u8],
            CommandKind::Volume(v) => vec![*v],
            CommandKind::Input(src) => vec![src.code()],
            CommandKind::Status => Vec::new(),
            CommandKind::Deploy(asset) => {
                let mut data = Vec::with_capacity(asset.as_str().len() + 1);
                data.push(LAUNCHER_URL_ADDRESS);
                data.extend_from_slice(asset.as_str().as_bytes());
                data
            }
        };
        MdcFrame::new(self.config.command_byte(kind), self.display_id, data)
    }

    /// Encode `kind` to wire bytes.
    pub fn encode(&self, kind: &CommandKind) -> Result<Bytes, WallError> {
        Ok(self.frame_for(kind)?.encode(self.config.checksum))
    }

    /// Decode the reply to `kind` into a normalised [`Reply`].
    pub fn decode(&self, kind: &CommandKind, bytes: &[u8]) -> Result<Reply, WallError> {
        let frame = MdcFrame::parse(bytes, self.config.checksum)?;
        if frame.display_id != self.display_id {
            return Err(WallError::DisplayIdMismatch {
                expected: self.display_id,
                actual: frame.display_id,
            });
        }
        let sent = self.config.command_byte(kind);
        if frame.command != MDC_REPLY || frame.data.len() < 2 {
            return Err(WallError::MalformedResponse(format!(
                "not an MDC reply: command {:#04x}, {} data bytes",
                frame.command,
                frame.data.len()
            )));
        }
        let (status, r_cmd, values) = (frame.data[0], frame.data[1], &frame.data[2..]);
        if r_cmd != sent {
            return Err(WallError::UnexpectedReply {
                expected: sent,
                actual: r_cmd,
            });
        }
        match status {
            MDC_ACK => self.interpret_ack(kind, values),
            MDC_NAK => Err(WallError::Rejected {
                command: r_cmd,
                code: values.first().copied().unwrap_or_default(),
            }),
            other => Err(WallError::MalformedResponse(format!(
                "unknown ack byte {other:#04x}"
            ))),
        }
    }

    fn interpret_ack(&self, kind: &CommandKind, values: &[u8]) -> Result<Reply, WallError> {
        let first = || {
            values
                .first()
                .copied()
                .ok_or_else(|| WallError::MalformedResponse("ack without value".into()))
        };
        let reply = match kind {
            CommandKind::Power(_) => Reply::Ack(CommandKind::Power(PowerState::try_from(first()?)?)),
            CommandKind::Volume(_) => Reply::Ack(CommandKind::Volume(first()?)),
            CommandKind::Input(_) => Reply::Ack(CommandKind::Input(InputSource::try_from(first()?)?)),
            CommandKind::Status => Reply::Status(StatusReport {
                power: values.first().map(|b| PowerState::try_from(*b)).transpose()?,
                volume: values.get(1).copied(),
                mute: values.get(2).map(|b| *b != 0),
                input: values.get(3).map(|b| InputSource::try_from(*b)).transpose()?,
            }),
            CommandKind::Deploy(sent) => match values {
                [LAUNCHER_URL_ADDRESS, url @ ..] if !url.is_empty() => {
                    let url = String::from_utf8(url.to_vec()).map_err(|e| {
                        WallError::MalformedResponse(format!("launcher url: {e}"))
                    })?;
                    Reply::Ack(CommandKind::Deploy(AssetRef::new(url)))
                }
                _ => Reply::Ack(CommandKind::Deploy(sent.clone())),
            },
        };
        Ok(reply)
    }

    /// Build the ACK a display would send for `kind`.
    ///
    /// Used by emulators and tests; `status` answers status queries.
    pub fn synthetic_ack(&self, kind: &CommandKind, status: StatusReport) -> Result<MdcFrame, WallError> {
        let values = match kind {
            CommandKind::Status => vec![
                status.power.map(|p| p as u8).unwrap_or_default(),
                status.volume.unwrap_or_default(),
                status.mute.map(u8::from).unwrap_or_default(),
                status.input.map(InputSource::code).unwrap_or_default(),
            ],
            _ => self.frame_for(kind)?.data,
        };
        MdcFrame::ack(self.display_id, self.config.command_byte(kind), &values)
    }
}

// ── MdcFramer ────────────────────────────────────────────────────

/// Splits a byte stream into raw MDC frames using the length byte.
///
/// Frames are not validated here; [`MdcFrame::parse`] does that, so a
/// corrupt frame surfaces as a protocol error without poisoning the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct MdcFramer;

impl tokio_util::codec::Decoder for MdcFramer {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MDC_PREFIX_LEN {
            return Ok(None);
        }
        let frame_len = MDC_MIN_FRAME_LEN + src[3] as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(frame_len).freeze()))
    }
}

impl tokio_util::codec::Encoder<Bytes> for MdcFramer {
    type Error = std::io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
