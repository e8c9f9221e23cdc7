pub mod codec;
pub mod message;

pub use codec::{Codec, CodecError};
pub use message::{ErrorCode, Message, Schema, StateLayout, CURRENT, V3, V4, V6};
