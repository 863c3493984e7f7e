use bytes::BytesMut;

use crate::buf::BufQueue;
use crate::codec::byte_to_message_decoder::MessageDecoder;
use crate::error::Error;

/// A decoder that splits the received bytes by a fixed number of bytes.
///
/// For example, four fragmented packets `A | BC | DEFG | HI` decode with a
/// fixed length of three into `ABC | DEF | GHI`.
pub struct FixedLengthFrameDecoder {
    length: usize,
}

impl FixedLengthFrameDecoder {
    /// Creates a new FixedLengthFrameDecoder with the given frame length.
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl MessageDecoder for FixedLengthFrameDecoder {
    fn id(&self) -> String {
        "FixedLengthFrameDecoder".to_string()
    }

    fn decode(
        &mut self,
        buf: &mut BufQueue,
        needed: &mut usize,
    ) -> Result<Option<BytesMut>, Error> {
        let available = buf.chain_length();
        if available < self.length {
            *needed = self.length - available;
            return Ok(None);
        }

        Ok(Some(buf.split_to(self.length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_length_one_byte_chunks() {
        let mut decoder = FixedLengthFrameDecoder::new(4);
        let mut queue = BufQueue::new();

        for (i, b) in [b'a', b'b', b'c'].iter().enumerate() {
            queue.append(BytesMut::from(&[*b][..]));
            let mut needed = 0;
            let frame = decoder.decode(&mut queue, &mut needed).unwrap();
            assert!(frame.is_none());
            assert_eq!(4 - (i + 1), needed);
        }

        queue.append(BytesMut::from(&b"d"[..]));
        let mut needed = 0;
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"abcd"[..])), frame);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fixed_length_refragments() {
        let mut decoder = FixedLengthFrameDecoder::new(3);
        let mut queue = BufQueue::new();
        for chunk in [&b"a"[..], &b"bc"[..], &b"defg"[..], &b"hi"[..]] {
            queue.append(BytesMut::from(chunk));
        }

        let mut frames = Vec::new();
        let mut needed = 0;
        while let Some(frame) = decoder.decode(&mut queue, &mut needed).unwrap() {
            frames.push(frame);
        }
        assert_eq!(
            vec![
                BytesMut::from(&b"abc"[..]),
                BytesMut::from(&b"def"[..]),
                BytesMut::from(&b"ghi"[..])
            ],
            frames
        );
    }
}
