use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport diagnostic code recorded in connection statistics.
///
/// Values are the small negative integers the transport has always
/// reported to callers; `None` means the last operation succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    None,
    SocketCreate,
    NotConnected,
    Send,
    Recv,
    Timeout,
    Closed,
}

impl ErrorCode {
    pub const fn as_i8(self) -> i8 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::SocketCreate => -1,
            ErrorCode::NotConnected => -2,
            ErrorCode::Send => -3,
            ErrorCode::Recv => -4,
            ErrorCode::Timeout => -5,
            ErrorCode::Closed => -6,
        }
    }

    pub fn is_error(self) -> bool {
        self != ErrorCode::None
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::None => "none",
            ErrorCode::SocketCreate => "socket_create",
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::Send => "send",
            ErrorCode::Recv => "recv",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Raised when an integer does not name a known [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport error code {0}")]
pub struct UnknownErrorCode(pub i8);

impl TryFrom<i8> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::None),
            -1 => Ok(ErrorCode::SocketCreate),
            -2 => Ok(ErrorCode::NotConnected),
            -3 => Ok(ErrorCode::Send),
            -4 => Ok(ErrorCode::Recv),
            -5 => Ok(ErrorCode::Timeout),
            -6 => Ok(ErrorCode::Closed),
            other => Err(UnknownErrorCode(other)),
        }
    }
}
