//! Codec handlers translating between byte queues and typed frames.

pub mod byte_to_message_decoder;
pub mod string_codec;
