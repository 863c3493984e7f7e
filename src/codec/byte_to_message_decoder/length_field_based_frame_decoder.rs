use bytes::BytesMut;
use std::io::ErrorKind;

use crate::buf::BufQueue;
use crate::codec::byte_to_message_decoder::MessageDecoder;
use crate::error::Error;

/// A decoder that splits frames based on an unsigned length field embedded in
/// the frame header.
///
/// The frame length is computed as
/// `length_field + length_adjustment + length_field_offset + length_field_length`;
/// frames shorter than the header, longer than `max_frame_length`, or whose
/// `initial_bytes_to_strip` exceeds the frame are trimmed off the queue and
/// reported as inbound exceptions.
pub struct LengthFieldBasedFrameDecoder {
    length_field_length: usize,
    max_frame_length: usize,
    length_field_offset: usize,
    length_adjustment: isize,
    initial_bytes_to_strip: usize,
    network_byte_order: bool,

    length_field_end_offset: usize,
}

impl LengthFieldBasedFrameDecoder {
    /// Creates a new LengthFieldBasedFrameDecoder.
    ///
    /// `length_field_length` must be 1, 2, 4 or 8; the length field must fit
    /// inside `max_frame_length`.
    pub fn new(
        length_field_length: usize,
        max_frame_length: usize,
        length_field_offset: usize,
        length_adjustment: isize,
        initial_bytes_to_strip: usize,
        network_byte_order: bool,
    ) -> Result<Self, Error> {
        if !matches!(length_field_length, 1 | 2 | 4 | 8) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("invalid length field length {}", length_field_length),
            ));
        }
        if max_frame_length == 0
            || length_field_offset > max_frame_length - length_field_length
        {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "length field at offset {} does not fit in max frame length {}",
                    length_field_offset, max_frame_length
                ),
            ));
        }

        Ok(Self {
            length_field_length,
            max_frame_length,
            length_field_offset,
            length_adjustment,
            initial_bytes_to_strip,
            network_byte_order,

            length_field_end_offset: length_field_offset + length_field_length,
        })
    }

    fn unadjusted_frame_length(&self, header: &[u8]) -> u64 {
        let field = &header[self.length_field_offset..self.length_field_end_offset];
        match (self.length_field_length, self.network_byte_order) {
            (1, _) => field[0] as u64,
            (2, true) => u16::from_be_bytes([field[0], field[1]]) as u64,
            (2, false) => u16::from_le_bytes([field[0], field[1]]) as u64,
            (4, true) => u32::from_be_bytes([field[0], field[1], field[2], field[3]]) as u64,
            (4, false) => u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as u64,
            (8, true) => u64::from_be_bytes([
                field[0], field[1], field[2], field[3], field[4], field[5], field[6], field[7],
            ]),
            (8, false) => u64::from_le_bytes([
                field[0], field[1], field[2], field[3], field[4], field[5], field[6], field[7],
            ]),
            _ => unreachable!("length field length validated in new()"),
        }
    }
}

impl MessageDecoder for LengthFieldBasedFrameDecoder {
    fn id(&self) -> String {
        "LengthFieldBasedFrameDecoder".to_string()
    }

    fn decode(
        &mut self,
        buf: &mut BufQueue,
        needed: &mut usize,
    ) -> Result<Option<BytesMut>, Error> {
        let available = buf.chain_length();
        if available < self.length_field_end_offset {
            *needed = self.length_field_end_offset - available;
            return Ok(None);
        }

        let mut header = vec![0u8; self.length_field_end_offset];
        buf.peek(&mut header);
        let frame_length = self.unadjusted_frame_length(&header) as i128
            + self.length_adjustment as i128
            + self.length_field_end_offset as i128;

        if frame_length < self.length_field_end_offset as i128 {
            buf.trim_start(self.length_field_end_offset);
            return Err(Error::new(
                ErrorKind::InvalidData,
                "frame too small".to_string(),
            ));
        }

        if frame_length > self.max_frame_length as i128 {
            buf.trim_start(frame_length as usize);
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("frame larger than {}", self.max_frame_length),
            ));
        }
        let frame_length = frame_length as usize;

        if available < frame_length {
            *needed = frame_length - available;
            return Ok(None);
        }

        if self.initial_bytes_to_strip > frame_length {
            buf.trim_start(frame_length);
            return Err(Error::new(
                ErrorKind::InvalidData,
                "initial bytes to strip larger than frame".to_string(),
            ));
        }

        buf.trim_start(self.initial_bytes_to_strip);
        Ok(Some(buf.split_to(frame_length - self.initial_bytes_to_strip)))
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
    fn test_length_field_network_order_strips_header() {
        let mut decoder = LengthFieldBasedFrameDecoder::new(4, 1024, 0, 0, 4, true).unwrap();
        let mut queue = queue_of(&[0x00, 0x00, 0x00, 0x03, 0x41, 0x42, 0x43]);

        let mut needed = 0;
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"ABC"[..])), frame);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_length_field_waits_for_frame() {
        let mut decoder = LengthFieldBasedFrameDecoder::new(2, 1024, 0, 0, 2, true).unwrap();
        let mut queue = queue_of(&[0x00, 0x05, b'h', b'i']);

        let mut needed = 0;
        assert!(decoder.decode(&mut queue, &mut needed).unwrap().is_none());
        // header(2) + declared payload(5) = 7, 4 available
        assert_eq!(3, needed);
        assert_eq!(4, queue.chain_length());
    }

    #[test]
    fn test_length_field_too_large_trims() {
        let mut decoder = LengthFieldBasedFrameDecoder::new(4, 1024, 0, 0, 0, true).unwrap();
        let mut queue = queue_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x41]);

        let mut needed = 0;
        let err = decoder.decode(&mut queue, &mut needed).unwrap_err();
        assert_eq!(ErrorKind::InvalidData, err.kind);
        assert_eq!("frame larger than 1024", err.message);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_length_field_too_small_trims_header() {
        // adjustment pulls the frame length below the header end
        let mut decoder = LengthFieldBasedFrameDecoder::new(2, 1024, 0, -10, 0, true).unwrap();
        let mut queue = queue_of(&[0x00, 0x01, b'x']);

        let mut needed = 0;
        let err = decoder.decode(&mut queue, &mut needed).unwrap_err();
        assert_eq!("frame too small", err.message);
        assert_eq!(1, queue.chain_length());
    }

    #[test]
    fn test_length_field_little_endian_offset() {
        let mut decoder = LengthFieldBasedFrameDecoder::new(2, 1024, 1, 0, 3, false).unwrap();
        // 1 ignored byte, little-endian length 2, then payload
        let mut queue = queue_of(&[0xAA, 0x02, 0x00, b'o', b'k']);

        let mut needed = 0;
        let frame = decoder.decode(&mut queue, &mut needed).unwrap();
        assert_eq!(Some(BytesMut::from(&b"ok"[..])), frame);
    }

    #[test]
    fn test_length_field_strip_larger_than_frame() {
        let mut decoder = LengthFieldBasedFrameDecoder::new(2, 1024, 0, 0, 16, true).unwrap();
        let mut queue = queue_of(&[0x00, 0x02, b'a', b'b']);

        let mut needed = 0;
        let err = decoder.decode(&mut queue, &mut needed).unwrap_err();
        assert_eq!("initial bytes to strip larger than frame", err.message);
        assert!(queue.is_empty());
    }
}
