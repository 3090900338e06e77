//! Request dispatch: from a decoded request frame to a response frame.
//!
//! The dispatcher enforces the per-function validation rules of the
//! Modbus Application Protocol specification, invokes the data store, and
//! assembles either the normal response body or an exception response.
//! Addresses and quantities decode as unsigned 16-bit throughout.

use tracing::{debug, trace};

use mb_common::{ExceptionCode, FunctionCode, MbResult};
use mb_data::{DataStore, SharedDataStore};
use mb_proto::{codec, Deframer, Frame};

/// Quantity ceiling for bit reads (0x01/0x02).
const MAX_READ_BITS: u16 = 0x07D0;
/// Quantity ceiling for register reads (0x03/0x04, and the read half of 0x17).
const MAX_READ_REGS: u16 = 0x007D;
/// Quantity ceiling for Write Multiple Coils (0x0F).
const MAX_WRITE_BITS: u16 = 0x07B0;
/// Quantity ceiling for Write Multiple Registers (0x10).
const MAX_WRITE_REGS: u16 = 0x007B;
/// Quantity ceiling for the write half of Read/Write Multiple (0x17).
const MAX_RW_WRITE_REGS: u16 = 0x0079;

/// One request/response pairing. No state survives the session.
#[derive(Debug)]
pub struct Session {
    /// The decoded request.
    pub request: Frame,
    /// The response under construction.
    pub response: Frame,
}

impl Session {
    /// Start a session for one request. The response starts as an MBAP
    /// echo (transaction, protocol, and unit ids plus the function code);
    /// its length is recomputed as the body grows.
    #[must_use]
    pub fn new(request: Frame) -> Self {
        let response = Frame {
            mbap: request.mbap,
            function: request.function,
            body: Vec::new(),
        };
        Self { request, response }
    }

    /// Run the request against `store`, leaving the response (normal or
    /// exception) in `self.response`.
    pub fn process(&mut self, store: &mut DataStore) {
        if let Err(code) = self.execute(store) {
            self.response.set_exception(code);
        }
    }

    fn execute(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        // The length field must agree with the bytes actually framed and
        // the whole frame must fit the 260-byte ceiling.
        let claimed = self.request.claimed_len();
        if self.request.wire_len() < 8 || claimed > 260 || claimed != self.request.wire_len() {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let function =
            FunctionCode::from_byte(self.request.function).ok_or(ExceptionCode::IllegalFunction)?;
        match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => self.read_bits(store),
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                self.read_registers(store)
            }
            FunctionCode::WriteSingleCoil => self.write_single_coil(store),
            FunctionCode::WriteSingleRegister => self.write_single_register(store),
            FunctionCode::WriteMultipleCoils => self.write_multiple_coils(store),
            FunctionCode::WriteMultipleRegisters => self.write_multiple_registers(store),
            FunctionCode::MaskWriteRegister => self.mask_write_register(store),
            FunctionCode::ReadWriteMultipleRegisters => self.read_write_registers(store),
        }
    }

    /// 0x01 / 0x02: `addr:u16, qty:u16` -> `byte_count:u8, bits_packed`.
    fn read_bits(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, quantity) = match (codec::read_u16(body, 0), codec::read_u16(body, 2)) {
            (Some(address), Some(quantity)) => (address, quantity),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };
        if quantity < 1 || quantity > MAX_READ_BITS {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let bits = if self.request.function == FunctionCode::ReadCoils.as_byte() {
            store.read_coils(address, quantity)?
        } else {
            store.read_discrete_inputs(address, quantity)?
        };

        let packed = codec::pack_bits(&bits);
        self.response.push_u8(packed.len() as u8);
        self.response.body.extend_from_slice(&packed);
        Ok(())
    }

    /// 0x03 / 0x04: `addr:u16, qty:u16` -> `byte_count:u8, values:u16*N`.
    fn read_registers(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, quantity) = match (codec::read_u16(body, 0), codec::read_u16(body, 2)) {
            (Some(address), Some(quantity)) => (address, quantity),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };
        if quantity < 1 || quantity > MAX_READ_REGS {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let values = if self.request.function == FunctionCode::ReadHoldingRegisters.as_byte() {
            store.read_holding_registers(address, quantity)?
        } else {
            store.read_input_registers(address, quantity)?
        };

        self.response.push_u8((values.len() * 2) as u8);
        codec::put_u16_list(&mut self.response.body, &values);
        Ok(())
    }

    /// 0x05: `addr:u16, value:u16` with value in {0x0000, 0xFF00};
    /// the response echoes the request body.
    fn write_single_coil(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, value) = match (codec::read_u16(body, 0), codec::read_u16(body, 2)) {
            (Some(address), Some(value)) => (address, value),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };
        if value != 0x0000 && value != 0xFF00 {
            return Err(ExceptionCode::IllegalDataValue);
        }

        store.write_coils(address, &[value == 0xFF00])?;
        self.echo_request_body(4);
        Ok(())
    }

    /// 0x06: `addr:u16, value:u16`; the response echoes the request body.
    fn write_single_register(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, value) = match (codec::read_u16(body, 0), codec::read_u16(body, 2)) {
            (Some(address), Some(value)) => (address, value),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };

        store.write_holding_registers(address, &[value])?;
        self.echo_request_body(4);
        Ok(())
    }

    /// 0x0F: `addr:u16, qty:u16, byte_count:u8, bits_packed` ->
    /// `addr:u16, qty:u16`.
    fn write_multiple_coils(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, quantity, byte_count) = match (
            codec::read_u16(body, 0),
            codec::read_u16(body, 2),
            codec::read_u8(body, 4),
        ) {
            (Some(address), Some(quantity), Some(byte_count)) => (address, quantity, byte_count),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };

        let needed = (usize::from(quantity) + 7) / 8;
        if quantity < 1
            || quantity > MAX_WRITE_BITS
            || usize::from(byte_count) < needed
            || body.len() - 5 < usize::from(byte_count)
        {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let bits = codec::unpack_bits(&body[5..], usize::from(quantity))
            .ok_or(ExceptionCode::IllegalDataValue)?;
        store.write_coils(address, &bits)?;
        self.echo_request_body(4);
        Ok(())
    }

    /// 0x10: `addr:u16, qty:u16, byte_count:u8, values:u16*qty` ->
    /// `addr:u16, qty:u16`. Two bytes per register, at body offset 5+2i.
    fn write_multiple_registers(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, quantity, byte_count) = match (
            codec::read_u16(body, 0),
            codec::read_u16(body, 2),
            codec::read_u8(body, 4),
        ) {
            (Some(address), Some(quantity), Some(byte_count)) => (address, quantity, byte_count),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };

        if quantity < 1
            || quantity > MAX_WRITE_REGS
            || usize::from(byte_count) != usize::from(quantity) * 2
            || body.len() - 5 < usize::from(byte_count)
        {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let values = codec::read_u16_list(body, 5, usize::from(quantity))
            .ok_or(ExceptionCode::IllegalDataValue)?;
        store.write_holding_registers(address, &values)?;
        self.echo_request_body(4);
        Ok(())
    }

    /// 0x16: `addr:u16, and_mask:u16, or_mask:u16`; the response echoes
    /// all six request bytes.
    fn mask_write_register(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (address, and_mask, or_mask) = match (
            codec::read_u16(body, 0),
            codec::read_u16(body, 2),
            codec::read_u16(body, 4),
        ) {
            (Some(address), Some(and_mask), Some(or_mask)) => (address, and_mask, or_mask),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };

        store.mask_write_holding_register(address, and_mask, or_mask)?;
        self.echo_request_body(6);
        Ok(())
    }

    /// 0x17: `r_addr:u16, r_qty:u16, w_addr:u16, w_qty:u16, byte_count:u8,
    /// values:u16*w_qty` -> `byte_count:u8, values:u16*r_qty`.
    /// The write executes before the read.
    fn read_write_registers(&mut self, store: &mut DataStore) -> Result<(), ExceptionCode> {
        let body = &self.request.body;
        let (read_address, read_quantity, write_address, write_quantity, byte_count) = match (
            codec::read_u16(body, 0),
            codec::read_u16(body, 2),
            codec::read_u16(body, 4),
            codec::read_u16(body, 6),
            codec::read_u8(body, 8),
        ) {
            (Some(ra), Some(rq), Some(wa), Some(wq), Some(bc)) => (ra, rq, wa, wq, bc),
            _ => return Err(ExceptionCode::IllegalDataValue),
        };

        if read_quantity < 1
            || read_quantity > MAX_READ_REGS
            || write_quantity < 1
            || write_quantity > MAX_RW_WRITE_REGS
            || usize::from(byte_count) != usize::from(write_quantity) * 2
            || body.len() - 9 < usize::from(byte_count)
        {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let write_values = codec::read_u16_list(body, 9, usize::from(write_quantity))
            .ok_or(ExceptionCode::IllegalDataValue)?;
        let values = store.write_then_read_holding_registers(
            write_address,
            &write_values,
            read_address,
            read_quantity,
        )?;

        self.response.push_u8((values.len() * 2) as u8);
        codec::put_u16_list(&mut self.response.body, &values);
        Ok(())
    }

    /// Copy the first `count` request-body bytes into the response body.
    fn echo_request_body(&mut self, count: usize) {
        self.response
            .body
            .extend_from_slice(&self.request.body[..count]);
    }
}

/// Per-connection request processing: deframing plus dispatch against the
/// shared store.
#[derive(Debug)]
pub struct DataService {
    store: SharedDataStore,
    deframer: Deframer,
}

impl DataService {
    /// Create a service bound to the shared store.
    #[must_use]
    pub fn new(store: SharedDataStore) -> Self {
        Self {
            store,
            deframer: Deframer::new(),
        }
    }

    /// Feed raw stream bytes; `reply` is invoked with one encoded response
    /// per recovered request frame.
    ///
    /// An unparseable frame (under 8 bytes despite a plausible length
    /// field) is a protocol breakdown and surfaces as an error so the
    /// caller can drop the connection.
    pub fn feed<F>(&mut self, chunk: &[u8], mut reply: F) -> MbResult<()>
    where
        F: FnMut(&[u8]),
    {
        let mut frames = Vec::new();
        self.deframer.feed(chunk, |frame| frames.push(frame.to_vec()));

        for bytes in frames {
            trace!(request = ?bytes, "frame in");
            let request = Frame::parse(&bytes)?;
            let mut session = Session::new(request);
            {
                let mut store = self.store.lock().expect("store mutex poisoned");
                session.process(&mut store);
            }
            let out = session.response.encode();
            if session.response.is_exception() {
                debug!(
                    function = session.request.function,
                    exception = session.response.body.first().copied().unwrap_or_default(),
                    "exception response"
                );
            }
            trace!(response = ?out, "frame out");
            reply(&out);
        }
        Ok(())
    }

    /// Buffer discards performed by this connection's deframer.
    #[must_use]
    pub fn resync_discards(&self) -> u64 {
        self.deframer.discards()
    }
}
