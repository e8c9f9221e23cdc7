use core::fmt;

use crate::protocol::{CodecError, Message};

/* ------------------------------------------------------------------------- */
/*  Error enum                                                               */
/* ------------------------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerError {
    Codec(CodecError),
    /// Byte that decodes to no message of the active schema.
    UnknownOpcode(u8),
    /// A reply-only message arrived without a pending request.
    Unexpected(Message),
    NotImplemented(Message),
    /// Action/state request before the handshake completed.
    NotConnected(Message),
    /// The active schema has no opcode for this message.
    NotInSchema(Message),
    /// No OK after a state frame or version reply. `got` is the byte that
    /// arrived instead, if any.
    ExpectedOk { got: Option<u8> },
    InvalidParameter { param: i8, value: i32 },
}

impl From<CodecError> for ControllerError {
    fn from(e: CodecError) -> Self {
        ControllerError::Codec(e)
    }
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode {op:#04x}"),
            Self::Unexpected(m) => write!(f, "unexpected {m:?}"),
            Self::NotImplemented(m) => write!(f, "{m:?} is not implemented"),
            Self::NotConnected(m) => write!(f, "{m:?} received while disconnected"),
            Self::NotInSchema(m) => write!(f, "{m:?} has no opcode in this protocol revision"),
            Self::ExpectedOk { got: Some(b) } => write!(f, "expected OK, got {b:#04x}"),
            Self::ExpectedOk { got: None } => f.write_str("expected OK, got nothing"),
            Self::InvalidParameter { param, value } => {
                write!(f, "invalid parameter {param} = {value}")
            }
        }
    }
}
