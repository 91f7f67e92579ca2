use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::stream::NetworkStream;
use crate::ws::protocol::OpCode;
use crate::ws::{Connection, Error};

impl<S: NetworkStream> Connection<S> {
    /// Marshals `value` and sends it as a single binary message.
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let body = serde_json::to_vec(value)?;
        self.write_message(OpCode::Binary, &body)?;
        Ok(())
    }

    /// Receives the next message and unmarshals it. Fails unless the message
    /// opcode is binary.
    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let (op_code, payload) = self.read_message()?;
        if op_code != OpCode::Binary {
            return Err(Error::UnexpectedFrame("json message must be binary"));
        }
        Ok(serde_json::from_slice(&payload)?)
    }
}
