//! Constants and header codecs for the wire protocol.
//!
//! A request frame is `REQ_HEADER || body || attachment` and a response frame
//! is `RESP_HEADER || body || attachment`. Headers are fixed-size and
//! little-endian. The body is an opaque byte string produced by the payload
//! codec; the attachment is an uninterpreted sidecar whose length is carried
//! in the header.

/// Protocol identification byte carried in every request header.
pub const MAGIC: u8 = 0x21;

/// Length of a request frame header in bytes.
pub const REQ_HEADER_LEN: usize = 21;
/// Length of a response frame header in bytes.
pub const RESP_HEADER_LEN: usize = 13;

/// Maximum body or attachment length expressible in a header field.
pub const MAX_BODY_LEN: u64 = u32::MAX as u64;

/// Whether a body or attachment of `len` bytes fits the 32-bit length field.
#[must_use]
pub const fn fits_length_field(len: u64) -> bool {
    len <= MAX_BODY_LEN
}

/// Read a little-endian u32 from the provided byte slice.
pub fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Read a little-endian u64 from the provided byte slice.
pub fn read_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

/// Write a little-endian u32 to the provided byte slice.
pub fn write_u32(buf: &mut [u8], val: u32) {
    buf.copy_from_slice(&val.to_le_bytes());
}

/// Write a little-endian u64 to the provided byte slice.
pub fn write_u64(buf: &mut [u8], val: u64) {
    buf.copy_from_slice(&val.to_le_bytes());
}

/// Header stamped in front of every outbound request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Protocol identification byte; receivers reject a mismatch.
    pub magic: u8,
    /// Stable 64-bit identifier of the remote function.
    pub function_id: u64,
    /// Body length in bytes (header end to attachment start).
    pub length: u32,
    /// Attachment length in bytes; zero when no attachment follows.
    pub attach_length: u32,
    /// Client-assigned sequence number echoed by the server.
    pub seq_num: u32,
}

impl RequestHeader {
    /// Parse a request header from a fixed-size buffer.
    #[must_use]
    pub fn from_bytes(buf: &[u8; REQ_HEADER_LEN]) -> Self {
        Self {
            magic: buf[0],
            function_id: read_u64(&buf[1..9]),
            length: read_u32(&buf[9..13]),
            attach_length: read_u32(&buf[13..17]),
            seq_num: read_u32(&buf[17..21]),
        }
    }

    /// Stamp the header into the first [`REQ_HEADER_LEN`] bytes of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`REQ_HEADER_LEN`].
    pub fn write_bytes(&self, buf: &mut [u8]) {
        buf[0] = self.magic;
        write_u64(&mut buf[1..9], self.function_id);
        write_u32(&mut buf[9..13], self.length);
        write_u32(&mut buf[13..17], self.attach_length);
        write_u32(&mut buf[17..21], self.seq_num);
    }
}

/// Header preceding every inbound response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Body length in bytes.
    pub length: u32,
    /// Attachment length in bytes; zero when no attachment follows.
    pub attach_length: u32,
    /// Sequence number of the request this response answers.
    pub seq_num: u32,
    /// Application error byte: `0` success, `0xFF` structured error record,
    /// anything else a server error code whose message forms the body.
    pub err_code: u8,
}

impl ResponseHeader {
    /// Parse a response header from a fixed-size buffer.
    #[must_use]
    pub fn from_bytes(buf: &[u8; RESP_HEADER_LEN]) -> Self {
        Self {
            length: read_u32(&buf[0..4]),
            attach_length: read_u32(&buf[4..8]),
            seq_num: read_u32(&buf[8..12]),
            err_code: buf[12],
        }
    }

    /// Stamp the header into the first [`RESP_HEADER_LEN`] bytes of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`RESP_HEADER_LEN`].
    pub fn write_bytes(&self, buf: &mut [u8]) {
        write_u32(&mut buf[0..4], self.length);
        write_u32(&mut buf[4..8], self.attach_length);
        write_u32(&mut buf[8..12], self.seq_num);
        buf[12] = self.err_code;
    }
}
