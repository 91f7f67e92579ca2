use std::io::Read;

use crate::buffer;
use crate::util::into_array;
use crate::ws::protocol::{self, apply_mask, Frame, OpCode};
use crate::ws::Error;

type ReadBuffer = buffer::ReadBuffer<4096>;

/// Incremental frame decoder. Wire bytes are accumulated in the read buffer
/// and consumed by a state machine, one state per header field, so a frame
/// split across any number of stream reads decodes identically.
#[derive(Debug)]
pub struct Decoder {
    buffer: ReadBuffer,
    decode_state: DecodeState,
    fin: bool,
    op_code: OpCode,
    masked: bool,
    mask_key: [u8; 4],
    payload_length: usize,
    expect_masked: bool,
    in_continuation: bool,
}

#[derive(Debug)]
enum DecodeState {
    ReadingHeader,
    ReadingPayloadLength,
    ReadingExtendedPayloadLength2,
    ReadingExtendedPayloadLength8,
    ReadingMaskKey,
    ReadingPayload,
}

impl Decoder {
    /// A server side decoder (`expect_masked`) rejects unmasked frames; a
    /// client side decoder rejects masked ones.
    pub fn new(expect_masked: bool) -> Self {
        Self {
            buffer: ReadBuffer::new(),
            decode_state: DecodeState::ReadingHeader,
            fin: false,
            op_code: OpCode::Continuation,
            masked: false,
            mask_key: [0u8; 4],
            payload_length: 0,
            expect_masked,
            in_continuation: false,
        }
    }

    /// Consumes exactly one frame from the stream, blocking until it is
    /// complete. End of stream on a frame boundary yields
    /// [`Error::NoNewFrame`]; end of stream inside a frame yields
    /// [`Error::IncompleteFrame`]. The returned frame is always unmasked.
    pub fn read_frame<S: Read>(&mut self, stream: &mut S) -> Result<Frame, Error> {
        loop {
            if let Some(frame) = self.decode_next()? {
                return Ok(frame);
            }
            if self.buffer.read_from(stream)? == 0 {
                let between_frames =
                    matches!(self.decode_state, DecodeState::ReadingHeader) && self.buffer.available() == 0;
                return Err(if between_frames {
                    Error::NoNewFrame
                } else {
                    Error::IncompleteFrame
                });
            }
        }
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            let available = self.buffer.available();
            match self.decode_state {
                DecodeState::ReadingHeader => {
                    if available < 1 {
                        break;
                    }
                    let b = self.buffer.consume_next(1)[0];
                    if b & (protocol::RSV1_MASK | protocol::RSV2_MASK | protocol::RSV3_MASK) != 0 {
                        return Err(Error::Protocol("non zero RSV value received"));
                    }
                    let fin = b & protocol::FIN_MASK != 0;
                    let op_code =
                        OpCode::from_u8(b & protocol::OP_CODE_MASK).ok_or(Error::Protocol("unknown op code"))?;
                    if op_code.is_control() && !fin {
                        return Err(Error::Protocol("fragmented control frame"));
                    }
                    if self.in_continuation {
                        if op_code.is_data() {
                            return Err(Error::UnexpectedFrame("data frame while a fragmented message is in progress"));
                        }
                    } else if op_code == OpCode::Continuation {
                        return Err(Error::UnexpectedFrame("continuation frame without a preceding fragment"));
                    }
                    self.fin = fin;
                    self.op_code = op_code;
                    self.decode_state = DecodeState::ReadingPayloadLength;
                }
                DecodeState::ReadingPayloadLength => {
                    if available < 1 {
                        break;
                    }
                    let b = self.buffer.consume_next(1)[0];
                    let masked = b & protocol::MASK_MASK != 0;
                    if self.expect_masked && !masked {
                        return Err(Error::MaskRequired);
                    }
                    if !self.expect_masked && masked {
                        return Err(Error::Protocol("masking bit set on the server frame"));
                    }
                    self.masked = masked;
                    let payload_length = b & protocol::PAYLOAD_LENGTH_MASK;
                    self.payload_length = payload_length as usize;
                    self.decode_state = match payload_length {
                        0..=125 => self.after_length_state(),
                        126 => DecodeState::ReadingExtendedPayloadLength2,
                        127 => DecodeState::ReadingExtendedPayloadLength8,
                        // we only use 7 bits
                        _ => unreachable!(),
                    }
                }
                DecodeState::ReadingExtendedPayloadLength2 => {
                    if available < 2 {
                        break;
                    }
                    let bytes = self.buffer.consume_next(2);
                    // SAFETY: we know bytes length is 2
                    self.payload_length = u16::from_be_bytes(unsafe { into_array(bytes) }) as usize;
                    self.decode_state = self.after_length_state();
                }
                DecodeState::ReadingExtendedPayloadLength8 => {
                    if available < 8 {
                        break;
                    }
                    let bytes = self.buffer.consume_next(8);
                    // SAFETY: we know bytes length is 8
                    self.payload_length = u64::from_be_bytes(unsafe { into_array(bytes) }) as usize;
                    self.decode_state = self.after_length_state();
                }
                DecodeState::ReadingMaskKey => {
                    if available < 4 {
                        break;
                    }
                    let bytes = self.buffer.consume_next(4);
                    // SAFETY: we know bytes length is 4
                    self.mask_key = unsafe { into_array(bytes) };
                    self.decode_state = DecodeState::ReadingPayload;
                }
                DecodeState::ReadingPayload => {
                    if available < self.payload_length {
                        break;
                    }
                    let mut payload = self.buffer.consume_next(self.payload_length).to_vec();
                    if self.masked {
                        apply_mask(&mut payload, self.mask_key);
                    }
                    if !self.op_code.is_control() {
                        self.in_continuation = !self.fin;
                    }
                    self.decode_state = DecodeState::ReadingHeader;
                    return Ok(Some(Frame::new(self.fin, self.op_code, self.masked, payload)));
                }
            }
        }

        // await more data from the stream
        Ok(None)
    }

    const fn after_length_state(&self) -> DecodeState {
        if self.masked {
            DecodeState::ReadingMaskKey
        } else {
            DecodeState::ReadingPayload
        }
    }
}
