use std::io;
use std::io::Write;

use rand::Rng;

use crate::ws::protocol::{self, apply_mask, OpCode};

// Stack scratch used when masking outgoing payload chunks. Must be a multiple
// of 4 so the mask key phase is preserved across chunk boundaries.
const MASK_SCRATCH_SIZE: usize = 1024;

/// Serializes frames onto a stream. A client side encoder (`mask`) masks
/// every frame with a fresh random key; a server side encoder never masks.
#[derive(Debug)]
pub struct Encoder {
    mask: bool,
}

impl Encoder {
    pub const fn new(mask: bool) -> Self {
        Self { mask }
    }

    /// Encodes and flushes one frame. Any error is fatal to the connection as
    /// a partial frame may already be on the wire.
    pub fn send<S: Write>(&self, stream: &mut S, fin: bool, op_code: OpCode, body: &[u8]) -> io::Result<()> {
        let mut header = op_code as u8;
        if fin {
            header |= protocol::FIN_MASK;
        }
        stream.write_all(&header.to_be_bytes())?;

        let mut payload_length = 0u8;
        if self.mask {
            payload_length |= protocol::MASK_MASK;
        }
        if body.len() <= 125 {
            payload_length |= body.len() as u8;
            stream.write_all(&payload_length.to_be_bytes())?;
        } else if body.len() <= u16::MAX as usize {
            payload_length |= 126;
            stream.write_all(&payload_length.to_be_bytes())?;
            stream.write_all(&(body.len() as u16).to_be_bytes())?;
        } else {
            payload_length |= 127;
            stream.write_all(&payload_length.to_be_bytes())?;
            stream.write_all(&(body.len() as u64).to_be_bytes())?;
        }

        if self.mask {
            let mask_key: [u8; 4] = rand::rng().random();
            stream.write_all(&mask_key)?;
            write_masked(stream, body, mask_key)?;
        } else {
            stream.write_all(body)?;
        }
        stream.flush()
    }
}

fn write_masked<S: Write>(stream: &mut S, body: &[u8], mask_key: [u8; 4]) -> io::Result<()> {
    let mut scratch = [0u8; MASK_SCRATCH_SIZE];
    for chunk in body.chunks(MASK_SCRATCH_SIZE) {
        let scratch = &mut scratch[..chunk.len()];
        scratch.copy_from_slice(chunk);
        apply_mask(scratch, mask_key);
        stream.write_all(scratch)?;
    }
    Ok(())
}
