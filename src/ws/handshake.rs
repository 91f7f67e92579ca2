use std::io::{Read, Write};

use base64::engine::general_purpose;
use base64::Engine;
use http::{Method, StatusCode};
use httparse::{Request, Response, EMPTY_HEADER};
use rand::Rng;
use sha1::{Digest, Sha1};
use url::Url;

use crate::buffer::ReadBuffer;
use crate::ws::Error;

/// Fixed GUID appended to the client key when deriving the accept value.
const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_HEADERS: usize = 64;

/// Derives the `Sec-WebSocket-Accept` value from a `Sec-WebSocket-Key`:
/// SHA-1 over the key concatenated with the protocol GUID, base64 encoded.
pub fn derive_accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WEBSOCKET_GUID);
    general_purpose::STANDARD.encode(sha1.finalize())
}

fn generate_key() -> String {
    let nonce_bytes: [u8; 16] = rand::rng().random();
    general_purpose::STANDARD.encode(nonce_bytes)
}

/// Performs the client side of the upgrade over an established stream. On
/// success the stream is positioned on the first frame byte.
pub fn connect<S: Read + Write>(stream: &mut S, url: &Url) -> Result<(), Error> {
    let key = generate_key();
    let accept = derive_accept_key(key.as_bytes());
    send_upgrade_request(stream, url, &key)?;
    check_upgrade_response(stream, &accept)
}

fn send_upgrade_request<S: Write>(stream: &mut S, url: &Url, key: &str) -> Result<(), Error> {
    let host = url.host_str().ok_or(Error::Handshake("url host not present"))?;
    let endpoint = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    stream.write_all(format!("GET {endpoint} HTTP/1.1\r\n").as_bytes())?;
    stream.write_all(format!("Host: {host}\r\n").as_bytes())?;
    stream.write_all(b"Upgrade: websocket\r\n")?;
    stream.write_all(b"Connection: Upgrade\r\n")?;
    stream.write_all(format!("Sec-WebSocket-Key: {key}\r\n").as_bytes())?;
    stream.write_all(b"Sec-WebSocket-Version: 13\r\n")?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

fn check_upgrade_response<S: Read>(stream: &mut S, expected_accept: &str) -> Result<(), Error> {
    let head = read_head(stream)?;
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut response = Response::new(&mut headers);
    match response.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        _ => return Err(Error::Handshake("malformed http response")),
    }
    if response.code != Some(StatusCode::SWITCHING_PROTOCOLS.as_u16()) {
        return Err(Error::Handshake("unable to switch protocols"));
    }
    if !header_contains(response.headers, "Upgrade", "websocket") {
        return Err(Error::Handshake("missing or invalid Upgrade header"));
    }
    if !header_contains(response.headers, "Connection", "upgrade") {
        return Err(Error::Handshake("missing or invalid Connection header"));
    }
    match find_header(response.headers, "Sec-WebSocket-Accept") {
        Some(accept) if accept == expected_accept.as_bytes() => Ok(()),
        _ => Err(Error::Handshake("accept key mismatch")),
    }
}

/// Performs the server side of the upgrade over an accepted stream. On
/// validation failure a `400 Bad Request` advertising the supported protocol
/// version is written before the error is returned; the caller owns shutting
/// the socket down.
pub fn upgrade<S: Read + Write>(stream: &mut S) -> Result<(), Error> {
    let head = read_head(stream)?;
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut request = Request::new(&mut headers);
    match request.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        _ => {
            write_bad_request(stream)?;
            return Err(Error::Handshake("malformed http request"));
        }
    }

    let fail = |stream: &mut S, reason: &'static str| -> Result<(), Error> {
        write_bad_request(stream)?;
        Err(Error::Handshake(reason))
    };
    if request.method != Some(Method::GET.as_str()) {
        return fail(stream, "method must be GET");
    }
    if !header_contains(request.headers, "Upgrade", "websocket") {
        return fail(stream, "missing or invalid Upgrade header");
    }
    if !header_contains(request.headers, "Connection", "upgrade") {
        return fail(stream, "missing or invalid Connection header");
    }
    let key = match find_header(request.headers, "Sec-WebSocket-Key") {
        Some(key) => key,
        None => return fail(stream, "missing Sec-WebSocket-Key header"),
    };

    let accept = derive_accept_key(key);
    stream.write_all(b"HTTP/1.1 101 Switching Protocols\r\n")?;
    stream.write_all(b"Upgrade: websocket\r\n")?;
    stream.write_all(b"Connection: Upgrade\r\n")?;
    stream.write_all(format!("Sec-WebSocket-Accept: {accept}\r\n").as_bytes())?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

fn write_bad_request<S: Write>(stream: &mut S) -> Result<(), Error> {
    stream.write_all(b"HTTP/1.1 400 Bad Request\r\n")?;
    stream.write_all(b"Sec-WebSocket-Version: 13\r\n")?;
    stream.write_all(b"\r\n")?;
    stream.write_all(b"websocket handshake error")?;
    stream.flush()?;
    Ok(())
}

/// Reads the http head up to and including the terminating blank line, one
/// byte at a time so no frame byte after the head is ever consumed.
fn read_head<S: Read>(stream: &mut S) -> Result<Vec<u8>, Error> {
    let mut buffer = ReadBuffer::<1>::new();
    loop {
        if buffer.read_from(stream)? == 0 {
            return Err(Error::Handshake("connection closed during handshake"));
        }
        if buffer.available() >= 4 && buffer.view_last(4) == b"\r\n\r\n" {
            return Ok(buffer.view().to_vec());
        }
    }
}

fn find_header<'a>(headers: &[httparse::Header<'a>], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value)
}

fn header_contains(headers: &[httparse::Header], name: &str, token: &str) -> bool {
    match find_header(headers, name) {
        Some(value) => match std::str::from_utf8(value) {
            Ok(value) => value.to_ascii_lowercase().contains(token),
            Err(_) => false,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::ws::testing::MockStream;

    use super::*;

    // request from the worked example in RFC 6455
    const UPGRADE_REQUEST: &[u8] = b"GET /echo HTTP/1.1\r\n\
        Host: localhost:12345\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn should_derive_accept_key() {
        assert_eq!("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=", derive_accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="));
    }

    #[test]
    fn should_generate_16_byte_key() {
        let key = generate_key();
        let decoded = general_purpose::STANDARD.decode(key).unwrap();
        assert_eq!(16, decoded.len());
    }

    #[test]
    fn should_send_upgrade_request() {
        let url = Url::parse("ws://localhost:12345/echo?stream=a").unwrap();
        let mut stream = MockStream::empty();

        send_upgrade_request(&mut stream, &url, "dGhlIHNhbXBsZSBub25jZQ==").unwrap();

        let request = String::from_utf8(stream.output.clone()).unwrap();
        assert!(request.starts_with("GET /echo?stream=a HTTP/1.1\r\n"));
        assert!(request.contains("Host: localhost\r\n"));
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(request.contains("Connection: Upgrade\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn should_accept_valid_upgrade_response() {
        let response = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let mut stream = MockStream::new(response.to_vec());

        check_upgrade_response(&mut stream, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").unwrap();
    }

    #[test]
    fn should_reject_response_with_wrong_status() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let mut stream = MockStream::new(response.to_vec());

        let err = check_upgrade_response(&mut stream, "irrelevant").unwrap_err();

        assert!(matches!(err, Error::Handshake("unable to switch protocols")));
    }

    #[test]
    fn should_reject_response_with_accept_mismatch() {
        let response = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: bm90IHRoZSByaWdodCBrZXk=\r\n\r\n";
        let mut stream = MockStream::new(response.to_vec());

        let err = check_upgrade_response(&mut stream, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").unwrap_err();

        assert!(matches!(err, Error::Handshake("accept key mismatch")));
    }

    #[test]
    fn should_reject_response_without_upgrade_header() {
        let response = b"HTTP/1.1 101 Switching Protocols\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let mut stream = MockStream::new(response.to_vec());

        let err = check_upgrade_response(&mut stream, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").unwrap_err();

        assert!(matches!(err, Error::Handshake("missing or invalid Upgrade header")));
    }

    #[test]
    fn should_upgrade_valid_request() {
        let mut stream = MockStream::new(UPGRADE_REQUEST.to_vec());

        upgrade(&mut stream).unwrap();

        let response = String::from_utf8(stream.output.clone()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn should_not_consume_bytes_past_the_request_head() {
        let mut bytes = UPGRADE_REQUEST.to_vec();
        bytes.extend_from_slice(&[0x81, 0x80, 1, 2, 3, 4]); // first frame right behind the head
        let mut stream = MockStream::new(bytes);

        upgrade(&mut stream).unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(&[0x81, 0x80, 1, 2, 3, 4], rest.as_slice());
    }

    #[test]
    fn should_reject_request_with_wrong_method() {
        let request = b"POST /echo HTTP/1.1\r\n\
            Host: localhost\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let mut stream = MockStream::new(request.to_vec());

        let err = upgrade(&mut stream).unwrap_err();

        assert!(matches!(err, Error::Handshake("method must be GET")));
        let response = String::from_utf8(stream.output.clone()).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[test]
    fn should_reject_request_without_websocket_key() {
        let request = b"GET /echo HTTP/1.1\r\n\
            Host: localhost\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\r\n";
        let mut stream = MockStream::new(request.to_vec());

        let err = upgrade(&mut stream).unwrap_err();

        assert!(matches!(err, Error::Handshake("missing Sec-WebSocket-Key header")));
        let response = String::from_utf8(stream.output.clone()).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn should_fail_when_stream_closes_during_handshake() {
        let mut stream = MockStream::new(b"HTTP/1.1 101 Switching".to_vec());

        let err = check_upgrade_response(&mut stream, "irrelevant").unwrap_err();

        assert!(matches!(err, Error::Handshake("connection closed during handshake")));
    }
}
