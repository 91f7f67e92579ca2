use std::io;
use std::io::ErrorKind::Other;

use thiserror::Error;
use url::ParseError;

use crate::ws::protocol::OpCode;

#[derive(Error, Debug)]
pub enum Error {
    /// The stream ended cleanly on a frame boundary. Not fatal; maps to end
    /// of stream for byte level reads.
    #[error("no new frame available")]
    NoNewFrame,
    /// The stream ended while a frame's declared length was not yet fully
    /// consumed. Fatal to the connection.
    #[error("stream ended inside a frame")]
    IncompleteFrame,
    /// The peer omitted masking where the protocol requires it. Fatal.
    #[error("received unmasked frame where masking is required")]
    MaskRequired,
    /// Continuation discipline violated. Fatal.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(&'static str),
    /// A data opcode was passed to the control frame send path. The
    /// connection is unaffected.
    #[error("op code {0:?} is not a control op code")]
    NotControlFrame(OpCode),
    /// A control opcode was passed to the data message send path. The
    /// connection is unaffected.
    #[error("op code {0:?} is not a data op code")]
    NotDataFrame(OpCode),
    /// The connection url scheme is neither `ws` nor `wss`. Fails before any
    /// IO is performed.
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    /// The upgrade request or response was malformed or failed validation. No
    /// connection is constructed.
    #[error("websocket handshake failed: {0}")]
    Handshake(&'static str),
    #[error("websocket protocol error: {0}")]
    Protocol(&'static str),
    #[error("the peer has sent the close frame: status code {0}, reason: {1}")]
    ReceivedCloseFrame(u16, String),
    #[error("the websocket is closed and can be dropped")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("url parse error: {0}")]
    InvalidUrl(#[from] ParseError),
    #[cfg(feature = "json")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        io::Error::new(Other, value)
    }
}
