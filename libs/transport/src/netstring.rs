//! Incremental netstring framing.

/// An error while decoding a netstring frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix contains something other than ASCII digits.
    #[error("malformed netstring length prefix")]
    MalformedLength,

    /// The frame terminator is not a comma.
    #[error("missing netstring terminator")]
    MissingTerminator,

    /// The declared length exceeds the allowed maximum.
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    Oversized(usize),
}

/// Frames larger than this are treated as protocol corruption.
const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Encodes a payload as a netstring: `<len>:<bytes>,`.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let prefix = payload.len().to_string();
    let mut framed = Vec::with_capacity(prefix.len() + payload.len() + 2);
    framed.extend_from_slice(prefix.as_bytes());
    framed.push(b':');
    framed.extend_from_slice(payload);
    framed.push(b',');
    framed
}

/// An incremental netstring decoder.
///
/// Feed arbitrary byte chunks with [NetstringDecoder::feed] and drain
/// complete frames with [NetstringDecoder::next_frame]. Once a decode
/// error is returned the stream is corrupt and must be discarded.
#[derive(Debug, Default)]
pub struct NetstringDecoder {
    buffer: Vec<u8>,
}

impl NetstringDecoder {
    /// Constructs an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes read from the stream.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let colon = match self.buffer.iter().position(|byte| *byte == b':') {
            Some(position) => position,
            None => {
                // Nothing but digits may precede the first colon.
                if self.buffer.iter().any(|byte| !byte.is_ascii_digit()) {
                    return Err(FrameError::MalformedLength);
                }
                return Ok(None);
            }
        };

        let prefix = &self.buffer[..colon];
        if prefix.is_empty() || prefix.iter().any(|byte| !byte.is_ascii_digit()) {
            return Err(FrameError::MalformedLength);
        }
        let length: usize = std::str::from_utf8(prefix)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or(FrameError::MalformedLength)?;
        if length > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized(length));
        }

        // Wait for the payload and the trailing comma.
        let end = colon + 1 + length;
        if self.buffer.len() < end + 1 {
            return Ok(None);
        }
        if self.buffer[end] != b',' {
            return Err(FrameError::MissingTerminator);
        }

        let payload = self.buffer[colon + 1..end].to_vec();
        self.buffer.drain(..=end);
        Ok(Some(payload))
    }

    /// Drains every complete buffered frame.
    pub fn frames(&mut self) -> Result<Vec<Vec<u8>>, FrameError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
