//! Wire format for single-frame file and command transfers
//!
//! Exactly one frame travels per connection:
//!
//! ```text
//! [i32 name_len][name_len bytes, UTF-8][i64 payload_len][payload_len bytes]
//! ```
//!
//! Integers are little-endian. Both length fields are always written and always
//! read, including for command frames, which carry a payload length of zero. A
//! frame is only complete once exactly `payload_len` bytes have followed the
//! length field; there is no delimiter.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, trace};

/// Reserved name asking the receiving side to group and centre everything it has loaded
pub const CENTER_BATCH_COMMAND: &str = "__CMD_CENTER_BATCH__";

/// Maximum accepted name length (4KB by default)
pub const DEFAULT_MAX_NAME_LEN: usize = 4 * 1024;

/// Maximum accepted payload length (2GB by default)
pub const DEFAULT_MAX_PAYLOAD_LEN: u64 = 2 * 1024 * 1024 * 1024;

/// Size of the copy buffer used when streaming payloads
pub const CHUNK_SIZE: usize = 8 * 1024;

const NAME_LEN_BYTES: usize = 4;
const PAYLOAD_LEN_BYTES: usize = 8;

/// Part of a frame, used to give errors some context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSection {
    NameLength,
    Name,
    PayloadLength,
    Payload,
}

impl fmt::Display for FrameSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NameLength => "name length",
            Self::Name => "name",
            Self::PayloadLength => "payload length",
            Self::Payload => "payload",
        };
        f.write_str(label)
    }
}

/// Protocol error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("IO error writing payload: {0}")]
    Write(io::Error),

    #[error("Truncated frame: {section} declared {expected} bytes, stream closed after {received}")]
    TruncatedFrame {
        section: FrameSection,
        expected: u64,
        received: u64,
    },

    #[error("Invalid {section} length {length} (maximum {max})")]
    InvalidLength {
        section: FrameSection,
        length: i64,
        max: u64,
    },

    #[error("Frame name is not valid UTF-8")]
    InvalidName,
}

/// A complete frame held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Number of bytes this frame occupies on the wire
    pub fn wire_size(&self) -> usize {
        NAME_LEN_BYTES + self.name.len() + PAYLOAD_LEN_BYTES + self.payload.len()
    }
}

/// Frame header, classified once at decode time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameHeader {
    /// A file transfer; `payload_len` bytes of file content follow
    File { name: String, payload_len: u64 },
    /// An out-of-band command; any payload is not file content
    Command { name: String, payload_len: u64 },
}

impl FrameHeader {
    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Command { name, .. } => name,
        }
    }

    pub fn payload_len(&self) -> u64 {
        match self {
            Self::File { payload_len, .. } | Self::Command { payload_len, .. } => *payload_len,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Self::Command { .. })
    }
}

/// A fully decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    File(Frame),
    Command(String),
}

/// Protocol handler for reading and writing frames
#[derive(Debug, Clone)]
pub struct Protocol {
    max_name_len: usize,
    max_payload_len: u64,
    commands: HashSet<String>,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            commands: HashSet::from([CENTER_BATCH_COMMAND.to_string()]),
        }
    }
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum name length
    pub fn with_max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// Set the maximum payload length
    pub fn with_max_payload_len(mut self, len: u64) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Register an additional reserved command name
    pub fn with_command(mut self, name: impl Into<String>) -> Self {
        self.commands.insert(name.into());
        self
    }

    pub fn max_payload_len(&self) -> u64 {
        self.max_payload_len
    }

    /// Exact, case-sensitive match against the reserved command names
    pub fn is_command(&self, name: &str) -> bool {
        self.commands.contains(name)
    }

    /// Encode a frame into a fresh buffer
    pub fn encode(&self, name: &str, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut buffer =
            Vec::with_capacity(NAME_LEN_BYTES + name.len() + PAYLOAD_LEN_BYTES + payload.len());
        self.write_frame(&mut buffer, name, payload)?;
        Ok(buffer)
    }

    /// Write a complete frame to a stream
    pub fn write_frame<W: Write>(
        &self,
        writer: &mut W,
        name: &str,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        self.write_header(writer, name, payload.len() as u64)?;
        writer.write_all(payload)?;
        writer.flush()?;
        trace!("Frame '{}' written ({} payload bytes)", name, payload.len());
        Ok(())
    }

    /// Write the name and payload length; the caller streams the payload afterwards
    pub fn write_header<W: Write>(
        &self,
        writer: &mut W,
        name: &str,
        payload_len: u64,
    ) -> Result<(), ProtocolError> {
        let name_len = i32::try_from(name.len()).map_err(|_| ProtocolError::InvalidLength {
            section: FrameSection::Name,
            length: i64::try_from(name.len()).unwrap_or(i64::MAX),
            max: i32::MAX as u64,
        })?;
        let payload_len_field =
            i64::try_from(payload_len).map_err(|_| ProtocolError::InvalidLength {
                section: FrameSection::Payload,
                length: i64::MAX,
                max: i64::MAX as u64,
            })?;

        let mut name_len_bytes = [0u8; NAME_LEN_BYTES];
        LittleEndian::write_i32(&mut name_len_bytes, name_len);
        let mut payload_len_bytes = [0u8; PAYLOAD_LEN_BYTES];
        LittleEndian::write_i64(&mut payload_len_bytes, payload_len_field);

        writer.write_all(&name_len_bytes)?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(&payload_len_bytes)?;
        Ok(())
    }

    /// Read and classify a frame header, leaving the stream at the first payload byte
    pub fn read_header<R: Read>(&self, reader: &mut R) -> Result<FrameHeader, ProtocolError> {
        let mut name_len_bytes = [0u8; NAME_LEN_BYTES];
        read_section(reader, &mut name_len_bytes, FrameSection::NameLength)?;
        let name_len = LittleEndian::read_i32(&name_len_bytes);
        if name_len < 0 || name_len as usize > self.max_name_len {
            return Err(ProtocolError::InvalidLength {
                section: FrameSection::Name,
                length: name_len as i64,
                max: self.max_name_len as u64,
            });
        }

        let mut name_bytes = vec![0u8; name_len as usize];
        read_section(reader, &mut name_bytes, FrameSection::Name)?;
        let name = String::from_utf8(name_bytes).map_err(|_| ProtocolError::InvalidName)?;

        let mut payload_len_bytes = [0u8; PAYLOAD_LEN_BYTES];
        read_section(reader, &mut payload_len_bytes, FrameSection::PayloadLength)?;
        let payload_len = LittleEndian::read_i64(&payload_len_bytes);
        if payload_len < 0 || payload_len as u64 > self.max_payload_len {
            return Err(ProtocolError::InvalidLength {
                section: FrameSection::Payload,
                length: payload_len,
                max: self.max_payload_len,
            });
        }
        let payload_len = payload_len as u64;

        debug!("Frame header: name='{}', payload={} bytes", name, payload_len);

        if self.is_command(&name) {
            Ok(FrameHeader::Command { name, payload_len })
        } else {
            Ok(FrameHeader::File { name, payload_len })
        }
    }

    /// Stream exactly `len` payload bytes from `reader` into `writer`
    ///
    /// Fails with [`ProtocolError::TruncatedFrame`] if the reader hits end of
    /// stream first; nothing short of the declared length counts as success.
    pub fn copy_payload<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        len: u64,
    ) -> Result<u64, ProtocolError> {
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut copied = 0u64;

        while copied < len {
            let want = (len - copied).min(CHUNK_SIZE as u64) as usize;
            let read = match reader.read(&mut buffer[..want]) {
                Ok(0) => {
                    return Err(ProtocolError::TruncatedFrame {
                        section: FrameSection::Payload,
                        expected: len,
                        received: copied,
                    })
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer
                .write_all(&buffer[..read])
                .map_err(ProtocolError::Write)?;
            copied += read as u64;
        }

        trace!("Copied {} payload bytes", copied);
        Ok(copied)
    }

    /// Consume and discard `len` payload bytes
    pub fn skip_payload<R: Read>(&self, reader: &mut R, len: u64) -> Result<u64, ProtocolError> {
        self.copy_payload(reader, &mut io::sink(), len)
    }

    /// Decode one complete frame, holding the payload in memory
    pub fn decode<R: Read>(&self, reader: &mut R) -> Result<DecodedFrame, ProtocolError> {
        match self.read_header(reader)? {
            FrameHeader::Command { name, payload_len } => {
                self.skip_payload(reader, payload_len)?;
                Ok(DecodedFrame::Command(name))
            }
            FrameHeader::File { name, payload_len } => {
                let capacity = payload_len.min(CHUNK_SIZE as u64 * 128) as usize;
                let mut payload = Vec::with_capacity(capacity);
                self.copy_payload(reader, &mut payload, payload_len)?;
                Ok(DecodedFrame::File(Frame { name, payload }))
            }
        }
    }
}

/// Fill `buf` completely, reporting how far we got if the stream ends early
fn read_section<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    section: FrameSection,
) -> Result<(), ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ProtocolError::TruncatedFrame {
                    section,
                    expected: buf.len() as u64,
                    received: filled as u64,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_write_read() {
        let protocol = Protocol::default();
        let payload = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_vec();

        let bytes = protocol.encode("tri.obj", &payload).unwrap();
        let frame = Frame::new("tri.obj", payload.clone());
        assert_eq!(bytes.len(), frame.wire_size());

        let decoded = protocol.decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, DecodedFrame::File(frame));
    }

    #[test]
    fn test_edge_frames_round_trip() {
        let protocol = Protocol::default();
        let cases: Vec<(&str, Vec<u8>)> = vec![
            ("", vec![]),
            ("", b"nameless".to_vec()),
            ("empty.obj", vec![]),
            ("é模型.obj", vec![]),
            ("é模型.obj", "v 0 0 0 # ü\n".as_bytes().to_vec()),
            ("x", vec![255; 70000]),
        ];

        for (name, payload) in cases {
            let bytes = protocol.encode(name, &payload).unwrap();
            assert_eq!(&bytes[0..4], &(name.len() as i32).to_le_bytes(), "{name:?}");

            let decoded = protocol.decode(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(
                decoded,
                DecodedFrame::File(Frame::new(name, payload.clone())),
                "{name:?} with {} bytes",
                payload.len()
            );
        }
    }

    #[test]
    fn test_wire_layout() {
        let protocol = Protocol::default();
        let bytes = protocol.encode("ab", &[9, 8, 7]).unwrap();

        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..6], b"ab");
        assert_eq!(&bytes[6..14], &3i64.to_le_bytes());
        assert_eq!(&bytes[14..], &[9, 8, 7]);
    }

    #[test]
    fn test_command_frame_reads_length_field() {
        let protocol = Protocol::default();
        let bytes = protocol.encode(CENTER_BATCH_COMMAND, &[]).unwrap();
        assert_eq!(bytes.len(), 4 + CENTER_BATCH_COMMAND.len() + 8);

        let mut cursor = Cursor::new(bytes);
        let header = protocol.read_header(&mut cursor).unwrap();
        assert!(header.is_command());
        assert_eq!(header.payload_len(), 0);
        // Header consumed the whole frame, length field included
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }

    #[test]
    fn test_command_name_is_case_sensitive() {
        let protocol = Protocol::default();
        let bytes = protocol.encode("__cmd_center_batch__", &[]).unwrap();
        let header = protocol.read_header(&mut Cursor::new(bytes)).unwrap();
        assert!(!header.is_command());
    }

    #[test]
    fn test_custom_command() {
        let protocol = Protocol::default().with_command("__CMD_CLEAR__");
        let bytes = protocol.encode("__CMD_CLEAR__", &[]).unwrap();
        let decoded = protocol.decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, DecodedFrame::Command("__CMD_CLEAR__".to_string()));
    }

    #[test]
    fn test_truncated_payload() {
        let protocol = Protocol::default();
        let mut bytes = protocol.encode("big.obj", &[1u8; 100]).unwrap();
        bytes.truncate(bytes.len() - 50);

        let result = protocol.decode(&mut Cursor::new(bytes));
        match result {
            Err(ProtocolError::TruncatedFrame {
                section,
                expected,
                received,
            }) => {
                assert_eq!(section, FrameSection::Payload);
                assert_eq!(expected, 100);
                assert_eq!(received, 50);
            }
            other => panic!("expected TruncatedFrame, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_header() {
        let protocol = Protocol::default();
        let bytes = protocol.encode("name.obj", &[]).unwrap();

        let result = protocol.read_header(&mut Cursor::new(&bytes[..6]));
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedFrame {
                section: FrameSection::Name,
                ..
            })
        ));

        let result = protocol.read_header(&mut Cursor::new(&bytes[..2]));
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedFrame {
                section: FrameSection::NameLength,
                ..
            })
        ));
    }

    #[test]
    fn test_negative_name_length() {
        let protocol = Protocol::default();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-5i32).to_le_bytes());

        let result = protocol.read_header(&mut Cursor::new(bytes));
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidLength { length: -5, .. })
        ));
    }

    #[test]
    fn test_payload_length_ceiling() {
        let protocol = Protocol::default().with_max_payload_len(16);
        let bytes = protocol.encode("a.obj", &[0u8; 17]).unwrap();

        let result = protocol.decode(&mut Cursor::new(bytes));
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidLength {
                section: FrameSection::Payload,
                length: 17,
                max: 16,
            })
        ));
    }

    #[test]
    fn test_negative_payload_length() {
        let protocol = Protocol::default();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(b'x');
        bytes.extend_from_slice(&(-1i64).to_le_bytes());

        let result = protocol.read_header(&mut Cursor::new(bytes));
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidLength { length: -1, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_name() {
        let protocol = Protocol::default();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(&0i64.to_le_bytes());

        let result = protocol.read_header(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(ProtocolError::InvalidName)));
    }

    #[test]
    fn test_copy_payload_spans_chunks() {
        let protocol = Protocol::default();
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let bytes = protocol.encode("chunky.bin", &payload).unwrap();

        let mut cursor = Cursor::new(bytes);
        let header = protocol.read_header(&mut cursor).unwrap();
        let mut out = Vec::new();
        let copied = protocol
            .copy_payload(&mut cursor, &mut out, header.payload_len())
            .unwrap();

        assert_eq!(copied as usize, payload.len());
        assert_eq!(out, payload);
    }
}
