//! Seam to the payload serialization library.
//!
//! The client treats argument and return-value encoding as an external
//! concern: everything here funnels through bincode's standard configuration
//! so the rest of the crate only ever sees `encode(T) -> bytes` and
//! `decode(bytes) -> T`. Request bodies are encoded directly behind a
//! zero-filled header region so the frame header can be stamped in place
//! afterwards without shifting the body.

use bincode::{
    config, decode_from_slice, encode_into_std_write,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};

use crate::error::{ErrorCode, RpcError};

/// Encode `value` into a fresh buffer whose first `offset` bytes are left
/// zeroed for a header.
///
/// # Errors
/// Returns [`ErrorCode::InvalidRpcArguments`] when the value rejects
/// serialization.
pub fn encode_at<T: Encode>(offset: usize, value: &T) -> Result<Vec<u8>, RpcError> {
    let mut buf = vec![0u8; offset];
    encode_into_std_write(value, &mut buf, config::standard()).map_err(|err: EncodeError| {
        RpcError::new(
            ErrorCode::InvalidRpcArguments,
            format!("failed to serialize rpc arguments: {err}"),
        )
    })?;
    Ok(buf)
}

/// Decode a value from a response body.
///
/// # Errors
/// Returns the codec error; callers map it to
/// [`ErrorCode::InvalidRpcResult`].
pub fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, DecodeError> {
    decode_from_slice(bytes, config::standard()).map(|(value, _)| value)
}
