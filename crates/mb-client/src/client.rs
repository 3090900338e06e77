//! Blocking Modbus TCP client.
//!
//! Each request cycle sends one frame and then reads from the socket
//! under a deadline until the matching response arrives: first the 7-byte
//! MBAP header, then the rest of the frame. Responses whose transaction,
//! protocol, or unit id do not match the request (stale answers from an
//! earlier timeout, for instance) are dropped with a warning and the read
//! continues until the deadline.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};

use mb_common::{ClientConfig, ExceptionCode, FunctionCode, MbError, MbResult};
use mb_proto::{codec, Frame, MbapHeader};

/// Next transaction id: the sequence runs 1..=65535 and never produces 0.
fn next_transaction_id(prev: u16) -> u16 {
    prev % 65535 + 1
}

struct ClientInner {
    stream: TcpStream,
    transaction_id: u16,
}

/// A Modbus TCP master bound to one slave endpoint.
///
/// Methods take `&self`; an internal mutex serializes concurrent callers
/// so at most one transaction is outstanding on the connection.
pub struct ModbusTcpClient {
    inner: Mutex<ClientInner>,
    config: ClientConfig,
}

impl ModbusTcpClient {
    /// Connect to the slave named by `config`.
    pub fn connect(config: ClientConfig) -> MbResult<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MbError::Config(format!("cannot resolve {}", config.host)))?;

        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)?;
        stream.set_nodelay(true)?;
        debug!(%addr, unit_id = config.unit_id, "connected to Modbus slave");

        Ok(Self {
            inner: Mutex::new(ClientInner {
                stream,
                transaction_id: 0,
            }),
            config,
        })
    }

    /// The configured unit id.
    #[must_use]
    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    /// Read coils (0x01).
    pub fn read_coils(&self, address: u16, quantity: u16) -> MbResult<Vec<bool>> {
        self.read_bits(FunctionCode::ReadCoils, address, quantity)
    }

    /// Read discrete inputs (0x02).
    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> MbResult<Vec<bool>> {
        self.read_bits(FunctionCode::ReadDiscreteInputs, address, quantity)
    }

    /// Read holding registers (0x03).
    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> MbResult<Vec<u16>> {
        self.read_registers(FunctionCode::ReadHoldingRegisters, address, quantity)
    }

    /// Read input registers (0x04).
    pub fn read_input_registers(&self, address: u16, quantity: u16) -> MbResult<Vec<u16>> {
        self.read_registers(FunctionCode::ReadInputRegisters, address, quantity)
    }

    /// Read holding registers as signed values (0x03).
    pub fn read_holding_registers_i16(&self, address: u16, quantity: u16) -> MbResult<Vec<i16>> {
        Ok(self
            .read_holding_registers(address, quantity)?
            .into_iter()
            .map(|v| v as i16)
            .collect())
    }

    /// Write one coil (0x05).
    pub fn write_single_coil(&self, address: u16, on: bool) -> MbResult<()> {
        let mut body = Vec::with_capacity(4);
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, if on { 0xFF00 } else { 0x0000 });

        let response = self.transact(FunctionCode::WriteSingleCoil, body)?;
        Self::check_echo_u16(&response, 0, address)
    }

    /// Write one holding register (0x06).
    pub fn write_single_register(&self, address: u16, value: u16) -> MbResult<()> {
        let mut body = Vec::with_capacity(4);
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, value);

        let response = self.transact(FunctionCode::WriteSingleRegister, body)?;
        Self::check_echo_u16(&response, 0, address)
    }

    /// Write a run of coils (0x0F).
    pub fn write_multiple_coils(&self, address: u16, bits: &[bool]) -> MbResult<()> {
        let packed = codec::pack_bits(bits);
        let mut body = Vec::with_capacity(5 + packed.len());
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, bits.len() as u16);
        codec::put_u8(&mut body, packed.len() as u8);
        body.extend_from_slice(&packed);

        let response = self.transact(FunctionCode::WriteMultipleCoils, body)?;
        Self::check_echo_u16(&response, 0, address)?;
        Self::check_echo_u16(&response, 2, bits.len() as u16)
    }

    /// Write a run of holding registers (0x10).
    pub fn write_multiple_registers(&self, address: u16, values: &[u16]) -> MbResult<()> {
        let mut body = Vec::with_capacity(5 + values.len() * 2);
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, values.len() as u16);
        codec::put_u8(&mut body, (values.len() * 2) as u8);
        codec::put_u16_list(&mut body, values);

        let response = self.transact(FunctionCode::WriteMultipleRegisters, body)?;
        Self::check_echo_u16(&response, 0, address)?;
        Self::check_echo_u16(&response, 2, values.len() as u16)
    }

    /// Write a run of holding registers from signed values (0x10).
    pub fn write_multiple_registers_i16(&self, address: u16, values: &[i16]) -> MbResult<()> {
        let unsigned: Vec<u16> = values.iter().map(|&v| v as u16).collect();
        self.write_multiple_registers(address, &unsigned)
    }

    /// Mask-write one holding register (0x16).
    pub fn mask_write_register(&self, address: u16, and_mask: u16, or_mask: u16) -> MbResult<()> {
        let mut body = Vec::with_capacity(6);
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, and_mask);
        codec::put_u16(&mut body, or_mask);

        let response = self.transact(FunctionCode::MaskWriteRegister, body)?;
        Self::check_echo_u16(&response, 0, address)?;
        Self::check_echo_u16(&response, 2, and_mask)?;
        Self::check_echo_u16(&response, 4, or_mask)
    }

    /// Write then read holding registers in one transaction (0x17). The
    /// slave executes the write before the read.
    pub fn write_read_registers(
        &self,
        write_address: u16,
        write_values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> MbResult<Vec<u16>> {
        let mut body = Vec::with_capacity(9 + write_values.len() * 2);
        codec::put_u16(&mut body, read_address);
        codec::put_u16(&mut body, read_quantity);
        codec::put_u16(&mut body, write_address);
        codec::put_u16(&mut body, write_values.len() as u16);
        codec::put_u8(&mut body, (write_values.len() * 2) as u8);
        codec::put_u16_list(&mut body, write_values);

        let response = self.transact(FunctionCode::ReadWriteMultipleRegisters, body)?;
        Self::registers_from_response(&response, read_quantity)
    }

    fn read_bits(
        &self,
        function: FunctionCode,
        address: u16,
        quantity: u16,
    ) -> MbResult<Vec<bool>> {
        let mut body = Vec::with_capacity(4);
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, quantity);

        let response = self.transact(function, body)?;
        let byte_count = usize::from(
            codec::read_u8(&response.body, 0)
                .ok_or_else(|| MbError::UnexpectedResponse("empty read response".into()))?,
        );
        if byte_count < (usize::from(quantity) + 7) / 8 || response.body.len() < 1 + byte_count {
            return Err(MbError::UnexpectedResponse(format!(
                "byte count {byte_count} cannot hold {quantity} bits"
            )));
        }
        codec::unpack_bits(&response.body[1..=byte_count], usize::from(quantity))
            .ok_or_else(|| MbError::UnexpectedResponse("truncated bit data".into()))
    }

    fn read_registers(
        &self,
        function: FunctionCode,
        address: u16,
        quantity: u16,
    ) -> MbResult<Vec<u16>> {
        let mut body = Vec::with_capacity(4);
        codec::put_u16(&mut body, address);
        codec::put_u16(&mut body, quantity);

        let response = self.transact(function, body)?;
        Self::registers_from_response(&response, quantity)
    }

    /// Decode a `byte_count, values` register payload.
    fn registers_from_response(response: &Frame, quantity: u16) -> MbResult<Vec<u16>> {
        let byte_count = usize::from(
            codec::read_u8(&response.body, 0)
                .ok_or_else(|| MbError::UnexpectedResponse("empty read response".into()))?,
        );
        if byte_count != usize::from(quantity) * 2 || response.body.len() < 1 + byte_count {
            return Err(MbError::UnexpectedResponse(format!(
                "byte count {byte_count} does not match {quantity} registers"
            )));
        }
        codec::read_u16_list(&response.body, 1, usize::from(quantity))
            .ok_or_else(|| MbError::UnexpectedResponse("truncated register data".into()))
    }

    /// Verify one echoed u16 field of a write response.
    fn check_echo_u16(response: &Frame, offset: usize, expected: u16) -> MbResult<()> {
        match codec::read_u16(&response.body, offset) {
            Some(actual) if actual == expected => Ok(()),
            other => Err(MbError::UnexpectedResponse(format!(
                "write echo mismatch at {offset}: sent {expected}, got {other:?}"
            ))),
        }
    }

    /// Run one request/response cycle under the mutex.
    fn transact(&self, function: FunctionCode, body: Vec<u8>) -> MbResult<Frame> {
        let mut inner = self.inner.lock().expect("client mutex poisoned");
        inner.transaction_id = next_transaction_id(inner.transaction_id);
        let transaction_id = inner.transaction_id;

        let request = Frame {
            mbap: MbapHeader::new(transaction_id, 0, self.config.unit_id),
            function: function.as_byte(),
            body,
        };
        inner.stream.write_all(&request.encode())?;

        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let frame = Self::read_frame(&mut inner.stream, deadline)?;

            if frame.mbap.transaction_id != transaction_id
                || frame.mbap.protocol_id != 0
                || frame.mbap.unit_id != self.config.unit_id
            {
                warn!(
                    sent_tid = transaction_id,
                    recv_tid = frame.mbap.transaction_id,
                    recv_unit = frame.mbap.unit_id,
                    "dropping mismatched response frame"
                );
                continue;
            }
            if frame.function == function.as_byte() | 0x80 {
                let byte = codec::read_u8(&frame.body, 0)
                    .ok_or_else(|| MbError::UnexpectedResponse("empty exception body".into()))?;
                let code = ExceptionCode::from_byte(byte).ok_or_else(|| {
                    MbError::UnexpectedResponse(format!("unknown exception code 0x{byte:02X}"))
                })?;
                return Err(MbError::Exception(code));
            }
            if frame.function != function.as_byte() {
                warn!(
                    sent_fc = function.as_byte(),
                    recv_fc = frame.function,
                    "dropping response with unexpected function code"
                );
                continue;
            }
            return Ok(frame);
        }
    }

    /// Read one complete frame, honoring the deadline.
    fn read_frame(stream: &mut TcpStream, deadline: Instant) -> MbResult<Frame> {
        let mut header = [0u8; MbapHeader::SIZE];
        Self::read_exact_deadline(stream, &mut header, deadline)?;
        let mbap = MbapHeader::from_bytes(&header)?;

        if mbap.length < 2 || mbap.length > 254 {
            return Err(MbError::Frame(format!(
                "implausible response length {}",
                mbap.length
            )));
        }

        let mut pdu = vec![0u8; usize::from(mbap.length) - 1];
        Self::read_exact_deadline(stream, &mut pdu, deadline)?;

        Ok(Frame {
            mbap,
            function: pdu[0],
            body: pdu[1..].to_vec(),
        })
    }

    /// `read_exact` with the socket read timeout pinned to the remaining
    /// deadline; an expired deadline surfaces as [`MbError::Timeout`].
    fn read_exact_deadline(
        stream: &mut TcpStream,
        buf: &mut [u8],
        deadline: Instant,
    ) -> MbResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                return Err(MbError::Timeout);
            }
            stream.set_read_timeout(Some(deadline - now))?;
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(MbError::Io("connection closed by slave".into())),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Err(MbError::Timeout);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
