//! Error taxonomy shared by the client and the wire contract.
//!
//! [`ErrorCode`] is the closed set of local error kinds; [`RpcError`] is the
//! value surfaced to callers and also the structured error record a server
//! may serialize into a response body (error byte `0xFF`), which is why it
//! derives the payload codec traits. Server application error codes outside
//! the closed set travel in `RpcError::code` unchanged.

use std::fmt;

use bincode::{Decode, Encode};
use thiserror::Error;

/// Closed set of error kinds known to both peers.
///
/// `Ok` is the only value that is not an error; every other value carries a
/// static message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0,
    IoError,
    NotConnected,
    TimedOut,
    InvalidRpcArguments,
    AddressInUse,
    OperationCanceled,
    RpcThrowException,
    FunctionNotRegistered,
    ProtocolError,
    UnknownProtocolVersion,
    MessageTooLarge,
    ServerHasRan,
    InvalidRpcResult,
}

impl ErrorCode {
    /// Static message associated with this code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::IoError => "io error",
            Self::NotConnected => "not connected",
            Self::TimedOut => "time out",
            Self::InvalidRpcArguments => "invalid rpc arg",
            Self::AddressInUse => "address in use",
            Self::OperationCanceled => "operation canceled",
            Self::RpcThrowException => "rpc throw exception",
            Self::FunctionNotRegistered => "function not registered",
            Self::ProtocolError => "protocol error",
            Self::UnknownProtocolVersion => "unknown protocol version",
            Self::MessageTooLarge => "message too large",
            Self::ServerHasRan => "server has ran",
            Self::InvalidRpcResult => "invalid rpc result",
        }
    }

    /// Whether this code represents success.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Numeric value carried on the wire and in [`RpcError::code`].
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Map a numeric value back into the closed set.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::IoError,
            2 => Self::NotConnected,
            3 => Self::TimedOut,
            4 => Self::InvalidRpcArguments,
            5 => Self::AddressInUse,
            6 => Self::OperationCanceled,
            7 => Self::RpcThrowException,
            8 => Self::FunctionNotRegistered,
            9 => Self::ProtocolError,
            10 => Self::UnknownProtocolVersion,
            11 => Self::MessageTooLarge,
            12 => Self::ServerHasRan,
            13 => Self::InvalidRpcResult,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// An RPC failure: a numeric code plus a human-readable message.
///
/// For local failures the code is one of [`ErrorCode`]; for failures reported
/// by the server it may be an application-defined value outside the closed
/// set. The message defaults to the code's static text and is replaced with a
/// dynamic one where more detail is available (I/O error text, server
/// messages).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    /// Numeric error code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Build an error with an explicit message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// Build an error reported by the server with an application error byte.
    pub fn server(code: u8, message: impl Into<String>) -> Self {
        Self {
            code: u16::from(code),
            message: message.into(),
        }
    }

    /// The code mapped back into the closed set, if it belongs to it.
    #[must_use]
    pub const fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u16(self.code)
    }
}

impl From<ErrorCode> for RpcError {
    fn from(code: ErrorCode) -> Self {
        Self {
            code: code.as_u16(),
            message: code.message().to_owned(),
        }
    }
}
