use bytes::BytesMut;
use std::io::ErrorKind;

use crate::buf::BufQueue;
use crate::codec::byte_to_message_decoder::MessageDecoder;
use crate::error::Error;

/// Line terminators accepted by [LineBasedFrameDecoder].
#[derive(Default, PartialEq, Eq)]
pub enum TerminatorType {
    /// Both `\n` and `\r\n`
    #[default]
    Both,
    /// `\n` only
    Newline,
    /// `\r\n` only
    CarriageNewline,
}

/// A decoder that splits the received bytes on line endings.
///
/// Lines longer than `max_length` are discarded until the next terminator and
/// reported as inbound exceptions.
#[derive(Default)]
pub struct LineBasedFrameDecoder {
    max_length: usize,
    strip_delimiter: bool,
    terminator_type: TerminatorType,

    discarding: bool,
}

impl LineBasedFrameDecoder {
    /// Creates a new LineBasedFrameDecoder
    pub fn new(max_length: usize, strip_delimiter: bool, terminator_type: TerminatorType) -> Self {
        Self {
            max_length,
            strip_delimiter,
            terminator_type,
            ..Default::default()
        }
    }

    fn find_end_of_line(&self, buf: &[u8]) -> Option<usize> {
        let mut i = 0usize;
        while i <= self.max_length && i < buf.len() {
            let b = buf[i];
            if b == b'\n' && self.terminator_type != TerminatorType::CarriageNewline {
                return Some(i);
            }
            if self.terminator_type != TerminatorType::Newline
                && b == b'\r'
                && i + 1 < buf.len()
                && buf[i + 1] == b'\n'
            {
                return Some(i);
            }
            i += 1;
        }

        None
    }
}

impl MessageDecoder for LineBasedFrameDecoder {
    fn id(&self) -> String {
        "LineBasedFrameDecoder".to_string()
    }

    fn decode(
        &mut self,
        buf: &mut BufQueue,
        _needed: &mut usize,
    ) -> Result<Option<BytesMut>, Error> {
        let eol = buf.with_front(|bytes| self.find_end_of_line(bytes));
        if !self.discarding {
            match eol {
                Some(eol) => {
                    let mut delimiter = [0u8; 1];
                    buf.with_front(|bytes| delimiter[0] = bytes[eol]);
                    let delimiter_length = if delimiter[0] == b'\r' { 2 } else { 1 };

                    if eol > self.max_length {
                        buf.trim_start(eol + delimiter_length);
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("frame length {} exceeds max {}", eol, self.max_length),
                        ));
                    }

                    let frame = if self.strip_delimiter {
                        let frame = buf.split_to(eol);
                        buf.trim_start(delimiter_length);
                        frame
                    } else {
                        buf.split_to(eol + delimiter_length)
                    };
                    Ok(Some(frame))
                }
                None => {
                    let length = buf.chain_length();
                    if length > self.max_length {
                        buf.trim_start(length);
                        self.discarding = true;
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("frame length over {} without terminator", self.max_length),
                        ));
                    }
                    Ok(None)
                }
            }
        } else {
            match eol {
                Some(eol) => {
                    let mut delimiter = [0u8; 1];
                    buf.with_front(|bytes| delimiter[0] = bytes[eol]);
                    let delimiter_length = if delimiter[0] == b'\r' { 2 } else { 1 };
                    buf.trim_start(eol + delimiter_length);
                    self.discarding = false;
                }
                None => {
                    buf.trim_start(buf.chain_length());
                }
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(bytes: &[u8]) -> BufQueue {
        let queue = BufQueue::new();
        queue.append(BytesMut::from(bytes));
        queue
    }

    #[test]
    fn test_line_based_strips_delimiter() {
        let mut decoder = LineBasedFrameDecoder::new(8192, true, TerminatorType::Both);
        let mut queue = queue_of(b"hello\r\nworld\n");

        let mut needed = 0;
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"hello"[..])), frame);
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"world"[..])), frame);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_line_based_keeps_delimiter() {
        let mut decoder = LineBasedFrameDecoder::new(8192, false, TerminatorType::Both);
        let mut queue = queue_of(b"bye\n");

        let mut needed = 0;
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"bye\n"[..])), frame);
    }

    #[test]
    fn test_line_based_waits_without_terminator() {
        let mut decoder = LineBasedFrameDecoder::new(8192, true, TerminatorType::Both);
        let mut queue = queue_of(b"partial");

        let mut needed = 0;
        assert!(decoder.decode(&mut queue, &mut needed).unwrap().is_none());
        assert_eq!(7, queue.chain_length());
    }

    #[test]
    fn test_line_based_discards_over_long_lines() {
        let mut decoder = LineBasedFrameDecoder::new(4, true, TerminatorType::Both);
        let mut queue = queue_of(b"way too long");

        let mut needed = 0;
        assert!(decoder.decode(&mut queue, &mut needed).is_err());
        assert!(queue.is_empty());

        // still discarding until the next terminator, then frames resume
        queue.append(BytesMut::from(&b"er\nok\n"[..]));
        assert!(decoder.decode(&mut queue, &mut needed).unwrap().is_none());
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"ok"[..])), frame);
    }
}
