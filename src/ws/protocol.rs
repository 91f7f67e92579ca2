//! Frame level constants and values of the websocket wire protocol.

pub const FIN_MASK: u8 = 0b1000_0000;
pub const RSV1_MASK: u8 = 0b0100_0000;
pub const RSV2_MASK: u8 = 0b0010_0000;
pub const RSV3_MASK: u8 = 0b0001_0000;
pub const OP_CODE_MASK: u8 = 0b0000_1111;
pub const MASK_MASK: u8 = 0b1000_0000;
pub const PAYLOAD_LENGTH_MASK: u8 = 0b0111_1111;

/// Messages larger than this are split into multiple frames by the connection
/// write path unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// Frame opcode. The wire encoding is a 4 bit field; values 0x3-0x7 and
/// 0xB-0xF are reserved and rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub const fn from_u8(value: u8) -> Option<OpCode> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Close, ping and pong frames; never fragmented, may interleave with the
    /// fragments of a data message.
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Opcodes that may start a message.
    pub const fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

/// Position of a frame within a fragmented message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPosition {
    Begin,
    Middle,
    End,
}

/// One decoded websocket frame. The payload is owned and always unmasked;
/// `masked` records whether the frame carried a mask on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub op_code: OpCode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(fin: bool, op_code: OpCode, masked: bool, payload: Vec<u8>) -> Frame {
        Frame {
            fin,
            op_code,
            masked,
            payload,
        }
    }

    /// Single unfragmented frame carrying a whole message.
    pub fn message(op_code: OpCode, payload: Vec<u8>) -> Frame {
        Frame::new(true, op_code, false, payload)
    }

    /// One fragment of a fragmented message. Middle and end fragments carry
    /// the continuation opcode; only the end fragment has `fin` set.
    pub fn fragment(position: FragmentPosition, op_code: OpCode, payload: Vec<u8>) -> Frame {
        match position {
            FragmentPosition::Begin => Frame::new(false, op_code, false, payload),
            FragmentPosition::Middle => Frame::new(false, OpCode::Continuation, false, payload),
            FragmentPosition::End => Frame::new(true, OpCode::Continuation, false, payload),
        }
    }
}

/// XOR masks `payload` in place with the 4 byte key. The operation is an
/// involution: applying it twice with the same key restores the input.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Close status codes defined by RFC 6455.
pub mod close_code {
    pub const NORMAL_CLOSURE: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// Local sentinel for "no status code present", never sent on the wire.
    pub const NO_STATUS_RECEIVED: u16 = 1005;
    pub const ABNORMAL_CLOSURE: u16 = 1006;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const MANDATORY_EXTENSION: u16 = 1010;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const SERVICE_RESTART: u16 = 1012;
    pub const TRY_AGAIN_LATER: u16 = 1013;
    pub const TLS_HANDSHAKE: u16 = 1015;
}

/// Encodes a close frame payload: 2 byte big endian status code followed by
/// the reason text. Code 1005 yields an empty payload as it must never appear
/// on the wire.
pub fn format_close_message(code: u16, reason: &str) -> Vec<u8> {
    if code == close_code::NO_STATUS_RECEIVED {
        return Vec::new();
    }
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Decodes a close frame payload into status code and reason. Payloads
/// shorter than 2 bytes carry no code and map to 1005 with an empty reason.
pub fn decode_close_message(payload: &[u8]) -> (u16, String) {
    if payload.len() < 2 {
        return (close_code::NO_STATUS_RECEIVED, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (code, String::from_utf8_lossy(&payload[2..]).to_string())
}
