// Length-prefixed message framing over TCP.
//
// Each frame is a 16-bit little-endian unsigned content size followed by
// that many bytes of UTF-8 JSON payload. The size excludes the prefix.
// Peers may append a single trailing newline to the payload; it is
// stripped on read. Both `read_frame` and `write_frame` operate on raw
// bytes — JSON encoding and decoding happen in `message.rs`.
//
// The 16-bit prefix caps payloads at 65535 bytes; `write_frame` refuses
// larger messages rather than silently truncating the length.

use std::fmt;
use std::io::{self, Read, Write};

/// Maximum frame payload size, the ceiling of the 16-bit length prefix.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Why a frame could not be read or written.
#[derive(Debug)]
pub enum FrameError {
    /// The remote endpoint closed the connection cleanly (EOF at a frame
    /// boundary).
    RemoteClosed,
    /// The stream ended in the middle of a frame.
    Truncated { expected: usize, read: usize },
    /// The payload handed to `write_frame` does not fit in a frame.
    TooLarge { size: usize },
    /// Any other I/O failure.
    Io(io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::RemoteClosed => write!(f, "Remote endpoint closed"),
            FrameError::Truncated { expected, read } => {
                write!(f, "Truncated frame: expected {expected} bytes, read {read}")
            }
            FrameError::TooLarge { size } => {
                write!(f, "Message too large: {size} bytes (max {MAX_FRAME_SIZE})")
            }
            FrameError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Read from `reader` until `buf` is full or EOF. Returns the number of
/// bytes actually read; short counts signal a truncated stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one length-prefixed frame. A trailing newline in the payload is
/// stripped.
///
/// Returns `RemoteClosed` if the stream ends exactly between frames, and
/// `Truncated` if it ends mid-prefix or mid-payload.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 2];
    let n = read_full(reader, &mut len_buf).map_err(FrameError::Io)?;
    if n == 0 {
        return Err(FrameError::RemoteClosed);
    }
    if n < len_buf.len() {
        return Err(FrameError::Truncated {
            expected: len_buf.len(),
            read: n,
        });
    }

    let len = u16::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    let n = read_full(reader, &mut payload).map_err(FrameError::Io)?;
    if n < len {
        return Err(FrameError::Truncated {
            expected: len,
            read: n,
        });
    }

    if payload.last() == Some(&b'\n') {
        payload.pop();
    }
    Ok(payload)
}

/// Write one length-prefixed frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
        });
    }
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (payload.len() as u16).to_le_bytes();
    writer.write_all(&len_bytes).map_err(FrameError::Io)?;
    writer.write_all(payload).map_err(FrameError::Io)?;
    writer.flush().map_err(FrameError::Io)?;
    Ok(())
}
