//! Newline-delimited JSON framing for the tool transport.
//!
//! Each message is one compact JSON object followed by `\n`. A line that is
//! not valid JSON for the expected type decodes to `Frame::Malformed` so the
//! peer can answer with a parse error and keep the stream open. Only I/O
//! failures and oversized lines end the stream.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum line length (16 MB)
pub const DEFAULT_MAX_LENGTH: usize = 16 * 1024 * 1024;

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    /// A well-formed message
    Message(T),
    /// A line that did not parse, with the parser's reason
    Malformed(String),
}

/// Newline-delimited JSON codec.
#[derive(Debug)]
pub struct NdJsonCodec<T> {
    _phantom: PhantomData<T>,
    max_length: usize,
}

impl<T> NdJsonCodec<T> {
    /// Create a new codec with the default max length.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LENGTH)
    }

    /// Create a new codec with custom max length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            _phantom: PhantomData,
            max_length,
        }
    }

    fn too_large(&self, len: usize) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} > {}", len, self.max_length),
        )
    }
}

impl<T> Default for NdJsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for NdJsonCodec<T> {
    fn clone(&self) -> Self {
        Self::with_max_length(self.max_length)
    }
}

impl<T: DeserializeOwned> Decoder for NdJsonCodec<T> {
    type Item = Frame<T>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_length {
                    return Err(self.too_large(src.len()));
                }
                return Ok(None);
            };

            if pos > self.max_length {
                return Err(self.too_large(pos));
            }

            let line = src.split_to(pos);
            src.advance(1);

            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(match serde_json::from_slice(line) {
                Ok(msg) => Frame::Message(msg),
                Err(e) => Frame::Malformed(e.to_string()),
            }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // A final line without a trailing newline still counts.
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        src.put_u8(b'\n');
        self.decode(src)
    }
}

impl<T: Serialize> Encoder<T> for NdJsonCodec<T> {
    type Error = std::io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        // Compact serialization never contains a raw newline.
        let json = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;

        if json.len() > self.max_length {
            return Err(self.too_large(json.len()));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        id: u32,
        text: String,
    }

    fn msg(id: u32, text: &str) -> TestMessage {
        TestMessage { id, text: text.into() }
    }

    #[test]
    fn test_clone_keeps_max_length() {
        let mut codec = NdJsonCodec::<TestMessage>::with_max_length(10).clone();
        let mut buf = BytesMut::new();
        assert!(codec.encode(msg(1, "this is far too long"), &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg(1, "line\nbreak"), &mut buf).unwrap();
        assert_eq!(buf[buf.len() - 1], b'\n');
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_partial_line_waits() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::new();
        let mut buf = BytesMut::from(&br#"{"id":1,"text":"hel"#[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\"}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Message(msg(1, "hello"))));
    }

    #[test]
    fn test_multiple_messages_and_blank_lines() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg(1, "first"), &mut buf).unwrap();
        buf.extend_from_slice(b"\n  \r\n");
        codec.encode(msg(2, "second"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Message(msg(1, "first"))));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Message(msg(2, "second"))));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_crlf_line_ending() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":3,\"text\":\"x\"}\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Message(msg(3, "x"))));
    }

    #[test]
    fn test_malformed_line_does_not_end_stream() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::new();
        let mut buf = BytesMut::from(&b"not json\n{\"id\":4,\"text\":\"ok\"}\n"[..]);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Frame::Malformed(_))));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Message(msg(4, "ok"))));
    }

    #[test]
    fn test_decode_eof_without_trailing_newline() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::new();
        let mut buf = BytesMut::from(&br#"{"id":5,"text":"tail"}"#[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Frame::Message(msg(5, "tail"))));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec: NdJsonCodec<TestMessage> = NdJsonCodec::with_max_length(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(msg(1, "this is far too long"), &mut buf).is_err());

        let mut buf = BytesMut::from(&b"{\"id\":1,\"text\":\"this is far too long\"}"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
