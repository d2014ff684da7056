use thiserror::Error;

/// Errors that can occur while decoding bencode.
///
/// Encoding is infallible; only the decoder can reject input.
///
/// # Examples
///
/// ```
/// use lanbit::bencode::{decode, BencodeError};
///
/// // Truncated input
/// let result = decode(b"i42");
/// assert!(matches!(result, Err(BencodeError::UnexpectedEof)));
///
/// // Non-canonical dictionary (keys out of order)
/// let result = decode(b"d4:spam4:eggs3:cow3:mooe");
/// assert!(matches!(result, Err(BencodeError::UnorderedKeys)));
/// ```
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer is malformed (e.g., has leading zeros, is empty, or overflows).
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidStringLength,

    /// Encountered an unexpected character while parsing.
    #[error("unexpected character: {0}")]
    UnexpectedChar(char),

    /// Dictionary keys are not in sorted byte-string order.
    #[error("dictionary keys out of order")]
    UnorderedKeys,

    /// The same dictionary key appears twice.
    #[error("duplicate dictionary key")]
    DuplicateKey,

    /// Extra data exists after the bencode value.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit (64 levels) exceeded to prevent stack overflow.
    #[error("nesting too deep")]
    NestingTooDeep,
}
