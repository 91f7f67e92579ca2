//! Websocket protocol implementation: frame codec, connection, dialer and
//! acceptor.
//!
//! ## Examples
//!
//! Dial a websocket endpoint and exchange messages.
//! ```no_run
//! use websock::ws::{dial, OpCode};
//!
//! let mut ws = dial("ws://127.0.0.1:12345/echo").unwrap();
//! ws.write_message(OpCode::Text, b"hello").unwrap();
//! let (op_code, payload) = ws.read_message().unwrap();
//! println!("{op_code:?} {}", String::from_utf8_lossy(&payload));
//! ```
//!
//! Accept websocket connections on the server side and serve the byte
//! stream api.
//! ```no_run
//! use std::io::{Read, Write};
//! use std::net::TcpListener;
//! use websock::ws::accept;
//!
//! let listener = TcpListener::bind("127.0.0.1:12345").unwrap();
//! let (stream, _) = listener.accept().unwrap();
//! let mut ws = accept(stream).unwrap();
//! let mut buf = [0u8; 1024];
//! let n = ws.read(&mut buf).unwrap();
//! ws.write_all(&buf[..n]).unwrap();
//! ```
//!
//! Dial a TLS endpoint, opting out of certificate verification explicitly.
//! ```no_run
//! # #[cfg(feature = "rustls")]
//! # {
//! use websock::ws::Dialer;
//!
//! let mut ws = Dialer::new()
//!     .with_no_cert_verification()
//!     .dial("wss://localhost:8443/feed")
//!     .unwrap();
//! # }
//! ```

use std::io;
use std::io::{Read, Write};
use std::net::TcpStream;

use log::{debug, trace};
use url::Url;

#[cfg(feature = "rustls")]
use crate::stream::tls::{ClientConfigExt, TlsStream};
use crate::stream::{ConnectionInfo, NetworkStream, TlsReadyStream};
use crate::ws::decoder::Decoder;
use crate::ws::encoder::Encoder;

// re-export
pub use crate::ws::error::Error;
pub use crate::ws::handshake::derive_accept_key;
pub use crate::ws::protocol::{
    close_code, decode_close_message, format_close_message, FragmentPosition, Frame, OpCode, DEFAULT_MAX_FRAME_SIZE,
};

mod decoder;
mod encoder;
mod error;
mod handshake;
#[cfg(feature = "json")]
mod json;
pub mod protocol;

/// Reason text sent with the default reply to a close frame.
const CLOSE_ACK: &str = "closing";

/// Connection endpoint role. The role decides the masking policy on both
/// directions: a client masks every outgoing frame and rejects masked input,
/// a server never masks and rejects unmasked input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Callback invoked with the payload of an intercepted control frame.
pub type ControlHandler = Box<dyn FnMut(&[u8]) + Send>;

#[derive(Default)]
struct Handlers {
    ping: Option<ControlHandler>,
    pong: Option<ControlHandler>,
    close: Option<ControlHandler>,
}

/// Message reassembly progress across fragments.
enum Assembly {
    None,
    Assembling { op_code: OpCode, payload: Vec<u8> },
}

/// Payload of a data frame being drained by byte level reads.
struct PendingPayload {
    payload: Vec<u8>,
    offset: usize,
}

/// Websocket connection that owns the underlying stream.
///
/// Control frames are intercepted inside the read path and never surface to
/// the caller: pings generate a pong echo (or invoke the registered handler),
/// pongs are ignored (or invoke the handler) and a close frame is terminal,
/// see [`Connection::with_close_handler`].
///
/// The connection performs no internal locking. Concurrent senders must
/// serialize `write`, `write_message` and `write_control` calls externally or
/// partial frames will interleave on the wire.
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    max_frame_size: usize,
    handlers: Handlers,
    pending: Option<PendingPayload>,
    closed: bool,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("max_frame_size", &self.max_frame_size)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S> {
    /// Checks if the connection is closed. This can be the result of an IO
    /// error, an explicit [`Connection::close`] or the peer sending a close
    /// frame.
    pub const fn closed(&self) -> bool {
        self.closed
    }

    const fn ensure_not_closed(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl<S: NetworkStream> Connection<S> {
    /// Creates a connection over a stream that has already completed the
    /// websocket handshake, for example one hijacked from an http server.
    pub fn from_upgraded(stream: S, role: Role) -> Self {
        Self {
            stream,
            decoder: Decoder::new(role == Role::Server),
            encoder: Encoder::new(role == Role::Client),
            max_frame_size: protocol::DEFAULT_MAX_FRAME_SIZE,
            handlers: Handlers::default(),
            pending: None,
            closed: false,
        }
    }

    /// Caps the payload carried by a single outgoing frame; larger messages
    /// are fragmented.
    pub fn with_max_frame_size(self, max_frame_size: usize) -> Self {
        assert!(max_frame_size > 0, "max frame size must be positive");
        Self { max_frame_size, ..self }
    }

    /// Replaces the default ping response (a pong echoing the payload).
    pub fn with_ping_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.ping = Some(Box::new(handler));
        self
    }

    /// Registers a handler for pong frames, which are ignored by default.
    pub fn with_pong_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.pong = Some(Box::new(handler));
        self
    }

    /// Registers a handler invoked with the raw payload of a received close
    /// frame in place of the default reply (close frame with code 1000). The
    /// transport is shut down afterwards either way.
    pub fn with_close_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.close = Some(Box::new(handler));
        self
    }

    /// Reads the next complete message, reassembling fragments and
    /// intercepting any interleaved control frames.
    pub fn read_message(&mut self) -> Result<(OpCode, Vec<u8>), Error> {
        self.ensure_not_closed()?;
        let mut assembly = Assembly::None;
        loop {
            let frame = self.next_data_frame()?.ok_or(Error::NoNewFrame)?;
            assembly = match assembly {
                Assembly::None => {
                    if frame.fin {
                        return Ok((frame.op_code, frame.payload));
                    }
                    Assembly::Assembling {
                        op_code: frame.op_code,
                        payload: frame.payload,
                    }
                }
                // the decoder guarantees only continuation frames arrive here
                Assembly::Assembling { op_code, mut payload } => {
                    payload.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok((op_code, payload));
                    }
                    Assembly::Assembling { op_code, payload }
                }
            };
        }
    }

    /// Writes one message with an explicit data opcode, splitting the body
    /// into frames of at most the configured maximum frame size. Control
    /// frames must go through [`Connection::write_control`].
    pub fn write_message(&mut self, op_code: OpCode, body: &[u8]) -> Result<usize, Error> {
        self.ensure_not_closed()?;
        if !op_code.is_data() {
            return Err(Error::NotDataFrame(op_code));
        }
        let mut offset = 0;
        loop {
            let chunk_len = (body.len() - offset).min(self.max_frame_size);
            let fin = offset + chunk_len == body.len();
            let op_code = if offset == 0 { op_code } else { OpCode::Continuation };
            if let Err(err) = self.encoder.send(&mut self.stream, fin, op_code, &body[offset..offset + chunk_len]) {
                self.closed = true;
                return Err(err.into());
            }
            offset += chunk_len;
            if fin {
                return Ok(offset);
            }
        }
    }

    /// Sends a single unfragmented control frame. For close frames the
    /// payload is the 2 byte big endian status code followed by the reason
    /// text, see [`format_close_message`].
    pub fn write_control(&mut self, op_code: OpCode, payload: &[u8]) -> Result<(), Error> {
        self.ensure_not_closed()?;
        if !op_code.is_control() {
            return Err(Error::NotControlFrame(op_code));
        }
        if let Err(err) = self.encoder.send(&mut self.stream, true, op_code, payload) {
            self.closed = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Sends a close frame and shuts the transport down.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let payload = protocol::format_close_message(code, reason);
        self.write_control(OpCode::Close, &payload)?;
        self.stream.shutdown()?;
        self.closed = true;
        Ok(())
    }

    /// Returns the next data frame, intercepting any control frames on the
    /// way. `None` marks a clean end of stream.
    fn next_data_frame(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            let frame = match self.decoder.read_frame(&mut self.stream) {
                Ok(frame) => frame,
                Err(Error::NoNewFrame) => return Ok(None),
                Err(err) => {
                    self.closed = true;
                    return Err(err);
                }
            };
            match frame.op_code {
                OpCode::Ping => self.handle_ping(&frame.payload)?,
                OpCode::Pong => self.handle_pong(&frame.payload),
                OpCode::Close => return Err(self.handle_close(&frame.payload)),
                _ => return Ok(Some(frame)),
            }
        }
    }

    fn handle_ping(&mut self, payload: &[u8]) -> Result<(), Error> {
        match self.handlers.ping.as_mut() {
            Some(handler) => handler(payload),
            None => {
                trace!("replying to ping with {} byte pong", payload.len());
                if let Err(err) = self.encoder.send(&mut self.stream, true, OpCode::Pong, payload) {
                    self.closed = true;
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    fn handle_pong(&mut self, payload: &[u8]) {
        if let Some(handler) = self.handlers.pong.as_mut() {
            handler(payload);
        }
    }

    /// A close frame is terminal for the connection with or without a close
    /// handler. Returns the error surfaced by the message path.
    fn handle_close(&mut self, payload: &[u8]) -> Error {
        let (code, reason) = protocol::decode_close_message(payload);
        debug!("received close frame: code {code}, reason {reason:?}");
        match self.handlers.close.as_mut() {
            Some(handler) => handler(payload),
            None => {
                let ack = protocol::format_close_message(close_code::NORMAL_CLOSURE, CLOSE_ACK);
                let _ = self.encoder.send(&mut self.stream, true, OpCode::Close, &ack);
            }
        }
        let _ = self.stream.shutdown();
        self.closed = true;
        Error::ReceivedCloseFrame(code, reason)
    }
}

impl<S: NetworkStream> Read for Connection<S> {
    /// Drains the payload of the current data frame, pulling the next frame
    /// once exhausted. Returns at most one frame's worth of bytes per call;
    /// `Ok(0)` marks a clean end of stream or a received close frame.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.pending.as_mut() {
                Some(pending) if pending.offset < pending.payload.len() => {
                    let remaining = &pending.payload[pending.offset..];
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    pending.offset += n;
                    return Ok(n);
                }
                Some(_) => self.pending = None,
                None => {}
            }
            if self.closed {
                return Ok(0);
            }
            match self.next_data_frame() {
                Ok(Some(frame)) => {
                    self.pending = Some(PendingPayload {
                        payload: frame.payload,
                        offset: 0,
                    })
                }
                Ok(None) => return Ok(0),
                Err(Error::ReceivedCloseFrame(..)) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl<S: NetworkStream> Write for Connection<S> {
    /// Splits `buf` into text frames of at most the configured maximum frame
    /// size. A frame write failure is fatal to the connection.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_message(OpCode::Text, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Client side connection establisher.
///
/// Certificate verification is on by default for `wss` urls; disabling it is
/// an explicit opt in via [`Dialer::with_no_cert_verification`].
pub struct Dialer {
    max_frame_size: usize,
    #[cfg(feature = "rustls")]
    no_cert_verification: bool,
    handlers: Handlers,
}

impl Default for Dialer {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialer {
    pub fn new() -> Self {
        Self {
            max_frame_size: protocol::DEFAULT_MAX_FRAME_SIZE,
            #[cfg(feature = "rustls")]
            no_cert_verification: false,
            handlers: Handlers::default(),
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: usize) -> Self {
        assert!(max_frame_size > 0, "max frame size must be positive");
        Self { max_frame_size, ..self }
    }

    /// Disables TLS certificate verification for this dialer. This trades
    /// away server authentication and must never be a silent default.
    #[cfg(feature = "rustls")]
    pub fn with_no_cert_verification(self) -> Self {
        Self {
            no_cert_verification: true,
            ..self
        }
    }

    /// Replaces the default ping response (a pong echoing the payload).
    pub fn with_ping_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.ping = Some(Box::new(handler));
        self
    }

    /// Registers a handler for pong frames, which are ignored by default.
    pub fn with_pong_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.pong = Some(Box::new(handler));
        self
    }

    /// Registers a handler invoked with the raw payload of a received close
    /// frame in place of the default reply.
    pub fn with_close_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.close = Some(Box::new(handler));
        self
    }

    /// Establishes a websocket connection to `url`. Scheme `ws` selects
    /// plain TCP, `wss` a TLS stream to the same address.
    pub fn dial(self, url: &str) -> Result<Connection<TlsReadyStream<TcpStream>>, Error> {
        let url = Url::parse(url)?;
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            scheme => return Err(Error::UnsupportedScheme(scheme.to_owned())),
        };
        let connection_info = ConnectionInfo::try_from(&url)?;
        debug!("connecting to {connection_info}");
        let host = connection_info.host().to_owned();
        let stream = connection_info.into_tcp_stream()?;
        let mut stream = if secure {
            self.wrap_tls(stream, &host)?
        } else {
            TlsReadyStream::Plain(stream)
        };
        handshake::connect(&mut stream, &url)?;
        debug!("handshake complete with {host}");
        let mut connection = Connection::from_upgraded(stream, Role::Client).with_max_frame_size(self.max_frame_size);
        connection.handlers = self.handlers;
        Ok(connection)
    }

    #[cfg(feature = "rustls")]
    fn wrap_tls(&self, stream: TcpStream, server_name: &str) -> Result<TlsReadyStream<TcpStream>, Error> {
        let no_cert_verification = self.no_cert_verification;
        let tls_stream = TlsStream::wrap_with_config(stream, server_name, |config| {
            if no_cert_verification {
                config.with_no_cert_verification();
            }
        })?;
        Ok(TlsReadyStream::Tls(tls_stream))
    }

    #[cfg(not(feature = "rustls"))]
    fn wrap_tls(&self, _stream: TcpStream, _server_name: &str) -> Result<TlsReadyStream<TcpStream>, Error> {
        Err(Error::UnsupportedScheme("wss (tls support not compiled in)".to_owned()))
    }
}

/// Server side connection acceptor. Performs the upgrade over a stream whose
/// http request has not been consumed yet, typically straight from
/// `TcpListener::accept`.
pub struct Acceptor {
    max_frame_size: usize,
    handlers: Handlers,
}

impl Default for Acceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceptor {
    pub fn new() -> Self {
        Self {
            max_frame_size: protocol::DEFAULT_MAX_FRAME_SIZE,
            handlers: Handlers::default(),
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: usize) -> Self {
        assert!(max_frame_size > 0, "max frame size must be positive");
        Self { max_frame_size, ..self }
    }

    /// Replaces the default ping response (a pong echoing the payload).
    pub fn with_ping_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.ping = Some(Box::new(handler));
        self
    }

    /// Registers a handler for pong frames, which are ignored by default.
    pub fn with_pong_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.pong = Some(Box::new(handler));
        self
    }

    /// Registers a handler invoked with the raw payload of a received close
    /// frame in place of the default reply.
    pub fn with_close_handler(mut self, handler: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.handlers.close = Some(Box::new(handler));
        self
    }

    /// Performs the server side of the upgrade and returns the connection.
    /// On a failed handshake the stream is shut down after the `400 Bad
    /// Request` response and no connection is constructed.
    pub fn accept<S: NetworkStream>(self, mut stream: S) -> Result<Connection<S>, Error> {
        match handshake::upgrade(&mut stream) {
            Ok(()) => {
                debug!("websocket upgrade complete");
                let mut connection =
                    Connection::from_upgraded(stream, Role::Server).with_max_frame_size(self.max_frame_size);
                connection.handlers = self.handlers;
                Ok(connection)
            }
            Err(err) => {
                let _ = stream.shutdown();
                Err(err)
            }
        }
    }
}

/// Establishes a websocket connection to `url` with default options.
pub fn dial(url: &str) -> Result<Connection<TlsReadyStream<TcpStream>>, Error> {
    Dialer::new().dial(url)
}

/// Accepts a websocket connection over an already accepted stream with
/// default options.
pub fn accept<S: NetworkStream>(stream: S) -> Result<Connection<S>, Error> {
    Acceptor::new().accept(stream)
}


#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::{Arc, Mutex};

    use super::testing::{decode_frames, encode_frame, MockStream};
    use super::*;

    fn server_connection(input: Vec<u8>) -> Connection<MockStream> {
        Connection::from_upgraded(MockStream::new(input), Role::Server)
    }

    #[test]
    fn should_read_message_in_frame_sized_chunks() {
        let input = encode_frame(true, true, OpCode::Text, b"hello, client!");
        let mut connection = server_connection(input);

        let mut buf = [0u8; 10];
        assert_eq!(10, connection.read(&mut buf).unwrap());
        assert_eq!(b"hello, cli", &buf);

        assert_eq!(4, connection.read(&mut buf).unwrap());
        assert_eq!(b"ent!", &buf[..4]);

        assert_eq!(0, connection.read(&mut buf).unwrap());
    }

    #[test]
    fn should_carry_client_write_to_server_read() {
        let mut client = Connection::from_upgraded(MockStream::empty(), Role::Client);
        client.write_all(b"hello, client!").unwrap();

        let mut server = server_connection(client.stream.output.clone());
        let mut buf = [0u8; 10];
        assert_eq!(10, server.read(&mut buf).unwrap());
        assert_eq!(b"hello, cli", &buf);
        assert_eq!(4, server.read(&mut buf).unwrap());
        assert_eq!(b"ent!", &buf[..4]);
    }

    #[test]
    fn should_read_across_frames_on_subsequent_calls() {
        let mut input = encode_frame(true, true, OpCode::Text, b"one");
        input.extend_from_slice(&encode_frame(true, true, OpCode::Text, b"two"));
        let mut connection = server_connection(input);

        let mut buf = [0u8; 16];
        assert_eq!(3, connection.read(&mut buf).unwrap());
        assert_eq!(b"one", &buf[..3]);
        assert_eq!(3, connection.read(&mut buf).unwrap());
        assert_eq!(b"two", &buf[..3]);
        assert_eq!(0, connection.read(&mut buf).unwrap());
    }

    #[test]
    fn should_reassemble_fragmented_message() {
        let mut input = encode_frame(true, false, OpCode::Text, b"hel");
        input.extend_from_slice(&encode_frame(true, false, OpCode::Continuation, b"lo "));
        input.extend_from_slice(&encode_frame(true, true, OpCode::Continuation, b"world"));
        let mut connection = server_connection(input);

        let (op_code, payload) = connection.read_message().unwrap();

        assert_eq!(OpCode::Text, op_code);
        assert_eq!(b"hello world", payload.as_slice());
    }

    #[test]
    fn should_intercept_ping_between_fragments_with_default_pong() {
        let mut input = encode_frame(true, false, OpCode::Text, b"he");
        input.extend_from_slice(&encode_frame(true, true, OpCode::Ping, b"k"));
        input.extend_from_slice(&encode_frame(true, true, OpCode::Continuation, b"llo"));
        let mut connection = server_connection(input);

        let (op_code, payload) = connection.read_message().unwrap();

        assert_eq!(OpCode::Text, op_code);
        assert_eq!(b"hello", payload.as_slice());

        // the pong reply echoes the ping payload, unmasked on the server side
        let replies = decode_frames(&connection.stream.output, false);
        assert_eq!(1, replies.len());
        assert_eq!(OpCode::Pong, replies[0].op_code);
        assert_eq!(b"k", replies[0].payload.as_slice());
    }

    #[test]
    fn should_invoke_ping_handler_instead_of_default_pong() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);

        let mut input = encode_frame(true, true, OpCode::Ping, b"probe");
        input.extend_from_slice(&encode_frame(true, true, OpCode::Text, b"data"));
        let mut connection = server_connection(input).with_ping_handler(move |payload| {
            captured.lock().unwrap().push(payload.to_vec());
        });

        let (_, payload) = connection.read_message().unwrap();

        assert_eq!(b"data", payload.as_slice());
        assert_eq!(vec![b"probe".to_vec()], *seen.lock().unwrap());
        assert!(connection.stream.output.is_empty(), "no pong when a handler is registered");
    }

    #[test]
    fn should_ignore_pong_by_default() {
        let mut input = encode_frame(true, true, OpCode::Pong, b"late");
        input.extend_from_slice(&encode_frame(true, true, OpCode::Text, b"data"));
        let mut connection = server_connection(input);

        let (_, payload) = connection.read_message().unwrap();

        assert_eq!(b"data", payload.as_slice());
        assert!(connection.stream.output.is_empty());
    }

    #[test]
    fn should_invoke_pong_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);

        let mut input = encode_frame(true, true, OpCode::Pong, b"late");
        input.extend_from_slice(&encode_frame(true, true, OpCode::Text, b"data"));
        let mut connection = server_connection(input).with_pong_handler(move |payload| {
            captured.lock().unwrap().push(payload.to_vec());
        });

        connection.read_message().unwrap();

        assert_eq!(vec![b"late".to_vec()], *seen.lock().unwrap());
    }

    #[test]
    fn should_reply_to_close_frame_and_shut_down_transport() {
        let payload = format_close_message(close_code::NORMAL_CLOSURE, "bye");
        let input = encode_frame(true, true, OpCode::Close, &payload);
        let mut connection = server_connection(input);

        let err = connection.read_message().unwrap_err();

        assert!(matches!(err, Error::ReceivedCloseFrame(1000, ref reason) if reason == "bye"));
        assert!(connection.closed());
        assert_eq!(1, connection.stream.shutdown_calls());

        let replies = decode_frames(&connection.stream.output, false);
        assert_eq!(1, replies.len());
        assert_eq!(OpCode::Close, replies[0].op_code);
        let (code, _) = decode_close_message(&replies[0].payload);
        assert_eq!(close_code::NORMAL_CLOSURE, code);

        // the connection is terminal after a close frame
        assert!(matches!(connection.read_message().unwrap_err(), Error::Closed));
        assert!(matches!(connection.write_message(OpCode::Text, b"x").unwrap_err(), Error::Closed));
    }

    #[test]
    fn should_invoke_close_handler_in_place_of_default_reply() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);

        let payload = format_close_message(close_code::GOING_AWAY, "maintenance");
        let input = encode_frame(true, true, OpCode::Close, &payload);
        let mut connection = server_connection(input).with_close_handler(move |payload| {
            captured.lock().unwrap().push(payload.to_vec());
        });

        let err = connection.read_message().unwrap_err();

        assert!(matches!(err, Error::ReceivedCloseFrame(1001, _)));
        assert_eq!(vec![payload], *seen.lock().unwrap());
        assert!(connection.stream.output.is_empty(), "handler replaces the default reply");
        assert_eq!(1, connection.stream.shutdown_calls());
        assert!(connection.closed());
    }

    #[test]
    fn should_map_close_frame_to_end_of_stream_on_byte_reads() {
        let payload = format_close_message(close_code::NORMAL_CLOSURE, "bye");
        let input = encode_frame(true, true, OpCode::Close, &payload);
        let mut connection = server_connection(input);

        let mut buf = [0u8; 8];
        assert_eq!(0, connection.read(&mut buf).unwrap());
        assert!(connection.closed());
        assert_eq!(1, connection.stream.shutdown_calls());
    }

    #[test]
    fn should_signal_no_new_frame_on_empty_stream() {
        let mut connection = server_connection(Vec::new());

        assert!(matches!(connection.read_message().unwrap_err(), Error::NoNewFrame));

        let mut buf = [0u8; 8];
        assert_eq!(0, connection.read(&mut buf).unwrap());
    }

    #[test]
    fn should_surface_mask_violation_to_the_caller() {
        // unmasked text frame reaching a server role connection
        let input = encode_frame(false, true, OpCode::Text, b"hi");
        let mut connection = server_connection(input);

        assert!(matches!(connection.read_message().unwrap_err(), Error::MaskRequired));
        assert!(connection.closed());
    }

    #[test]
    fn should_split_large_write_into_frames() {
        let body: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let mut connection =
            Connection::from_upgraded(MockStream::empty(), Role::Client).with_max_frame_size(1024);

        let written = connection.write_message(OpCode::Binary, &body).unwrap();
        assert_eq!(2500, written);

        let frames = decode_frames(&connection.stream.output, true);
        assert_eq!(3, frames.len());

        assert_eq!(OpCode::Binary, frames[0].op_code);
        assert!(!frames[0].fin);
        assert_eq!(1024, frames[0].payload.len());

        assert_eq!(OpCode::Continuation, frames[1].op_code);
        assert!(!frames[1].fin);
        assert_eq!(1024, frames[1].payload.len());

        assert_eq!(OpCode::Continuation, frames[2].op_code);
        assert!(frames[2].fin);
        assert_eq!(452, frames[2].payload.len());

        let reassembled: Vec<u8> = frames.iter().flat_map(|frame| frame.payload.clone()).collect();
        assert_eq!(body, reassembled);
    }

    #[test]
    fn should_write_byte_stream_as_text_frames() {
        let mut connection = Connection::from_upgraded(MockStream::empty(), Role::Client);

        connection.write_all(b"hello, client!").unwrap();

        let frames = decode_frames(&connection.stream.output, true);
        assert_eq!(1, frames.len());
        assert_eq!(OpCode::Text, frames[0].op_code);
        assert!(frames[0].fin);
        assert!(frames[0].masked);
        assert_eq!(b"hello, client!", frames[0].payload.as_slice());
    }

    #[test]
    fn should_send_empty_message_as_single_frame() {
        let mut connection = Connection::from_upgraded(MockStream::empty(), Role::Server);

        assert_eq!(0, connection.write_message(OpCode::Text, b"").unwrap());

        let frames = decode_frames(&connection.stream.output, false);
        assert_eq!(1, frames.len());
        assert!(frames[0].fin);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn should_reject_control_op_code_on_message_path() {
        let mut connection = Connection::from_upgraded(MockStream::empty(), Role::Client);

        let err = connection.write_message(OpCode::Ping, b"probe").unwrap_err();

        assert!(matches!(err, Error::NotDataFrame(OpCode::Ping)));
        assert!(connection.stream.output.is_empty());
        assert!(!connection.closed(), "caller error must not poison the connection");
    }

    #[test]
    fn should_reject_data_op_code_on_control_path() {
        let mut connection = Connection::from_upgraded(MockStream::empty(), Role::Client);

        let err = connection.write_control(OpCode::Text, b"hi").unwrap_err();

        assert!(matches!(err, Error::NotControlFrame(OpCode::Text)));
        assert!(!connection.closed());
    }

    #[test]
    fn should_close_connection_explicitly() {
        let mut connection = Connection::from_upgraded(MockStream::empty(), Role::Server);

        connection.close(close_code::NORMAL_CLOSURE, "done").unwrap();

        assert!(connection.closed());
        assert_eq!(1, connection.stream.shutdown_calls());
        let frames = decode_frames(&connection.stream.output, false);
        assert_eq!(1, frames.len());
        assert_eq!(OpCode::Close, frames[0].op_code);
        let (code, reason) = decode_close_message(&frames[0].payload);
        assert_eq!(close_code::NORMAL_CLOSURE, code);
        assert_eq!("done", reason);
    }

    #[test]
    fn should_never_put_no_status_code_on_the_wire() {
        let mut connection = Connection::from_upgraded(MockStream::empty(), Role::Server);

        connection.close(close_code::NO_STATUS_RECEIVED, "ignored").unwrap();

        let frames = decode_frames(&connection.stream.output, false);
        assert_eq!(1, frames.len());
        assert_eq!(OpCode::Close, frames[0].op_code);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn should_accept_connection_and_read_first_message() {
        let mut input = b"GET /echo HTTP/1.1\r\n\
            Host: localhost:12345\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
            .to_vec();
        input.extend_from_slice(&encode_frame(true, true, OpCode::Text, b"first"));

        let mut connection = Acceptor::new().accept(MockStream::new(input)).unwrap();

        let (op_code, payload) = connection.read_message().unwrap();
        assert_eq!(OpCode::Text, op_code);
        assert_eq!(b"first", payload.as_slice());

        let response = String::from_utf8(connection.stream.output.clone()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    }

    #[test]
    fn should_shut_stream_down_on_failed_upgrade() {
        let input = b"GET /echo HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec();
        let stream = MockStream::new(input);
        let shutdown_calls = Arc::clone(&stream.shutdown_calls);

        let err = Acceptor::new().accept(stream).unwrap_err();

        assert!(matches!(err, Error::Handshake(_)));
        assert_eq!(1, shutdown_calls.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn should_fail_dial_on_unsupported_scheme() {
        let err = Dialer::new().dial("http://localhost:8080/feed").unwrap_err();

        assert!(matches!(err, Error::UnsupportedScheme(ref scheme) if scheme == "http"));
    }
}
