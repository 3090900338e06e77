//! Modbus function-code and exception-code taxonomies.
//!
//! These enums carry the exact wire values mandated by the Modbus
//! Application Protocol specification. They are shared by the slave-side
//! dispatcher and the master-side client.

/// Modbus function codes supported by this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01).
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02).
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03).
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04).
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05).
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06).
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F).
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10).
    WriteMultipleRegisters = 0x10,
    /// Mask Write Register (0x16).
    MaskWriteRegister = 0x16,
    /// Read/Write Multiple Registers (0x17).
    ReadWriteMultipleRegisters = 0x17,
}

impl FunctionCode {
    /// Parse a function code from a byte value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            0x16 => Some(Self::MaskWriteRegister),
            0x17 => Some(Self::ReadWriteMultipleRegisters),
            _ => None,
        }
    }

    /// The wire value of this function code.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Modbus exception codes.
///
/// An exception response echoes the request function code with the high
/// bit set (`fc | 0x80`) and carries one of these values as its single
/// body byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function code unsupported.
    IllegalFunction = 0x01,
    /// Address or address+quantity out of bank range.
    IllegalDataAddress = 0x02,
    /// Size, shape, or quantity violates the function's validation rules.
    IllegalDataValue = 0x03,
    /// Unrecoverable internal failure.
    SlaveDeviceFailure = 0x04,
    /// Request accepted, processing.
    Acknowledge = 0x05,
    /// Slave busy.
    SlaveDeviceBusy = 0x06,
    /// Memory parity error.
    MemoryParityError = 0x08,
    /// Gateway path unavailable.
    GatewayPathUnavailable = 0x0A,
    /// Gateway target device failed to respond.
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    /// Parse an exception code from a byte value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailed),
            _ => None,
        }
    }

    /// The wire value of this exception code.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal Function"),
            Self::IllegalDataAddress => write!(f, "Illegal Data Address"),
            Self::IllegalDataValue => write!(f, "Illegal Data Value"),
            Self::SlaveDeviceFailure => write!(f, "Slave Device Failure"),
            Self::Acknowledge => write!(f, "Acknowledge"),
            Self::SlaveDeviceBusy => write!(f, "Slave Device Busy"),
            Self::MemoryParityError => write!(f, "Memory Parity Error"),
            Self::GatewayPathUnavailable => write!(f, "Gateway Path Unavailable"),
            Self::GatewayTargetFailed => write!(f, "Gateway Target Failed"),
        }
    }
}
