use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

pub mod function {
    pub const READ_COILS: u8 = 1;
    pub const READ_DISCRETE_INPUTS: u8 = 2;
    pub const READ_HOLDING_REGISTERS: u8 = 3;
    pub const READ_INPUT_REGISTERS: u8 = 4;
    pub const WRITE_SINGLE_COIL: u8 = 5;
    pub const WRITE_SINGLE_REGISTER: u8 = 6;
    pub const WRITE_MULTIPLE_COILS: u8 = 15;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 16;
}

/// Largest value of the MBAP length field: the unit identifier and a 253 byte PDU.
pub const MAX_FRAME_LENGTH: u16 = 254;

pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_REGISTERS: u16 = 123;
pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_WRITE_BITS: u16 = 1968;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    #[error("illegal function")]
    IllegalFunction = 1,
    #[error("illegal data address")]
    IllegalDataAddress = 2,
    #[error("illegal data value")]
    IllegalDataValue = 3,
    #[error("server device failure")]
    ServerDeviceFailure = 4,
}

impl Exception {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadCoils { address: u16, count: u16 },
    ReadDiscreteInputs { address: u16, count: u16 },
    ReadHoldings { address: u16, count: u16 },
    ReadInputs { address: u16, count: u16 },
    WriteCoil { address: u16, value: bool },
    WriteHolding { address: u16, value: u16 },
    WriteCoils { address: u16, values: Vec<bool> },
    WriteHoldings { address: u16, values: Vec<u16> },
    /// A function code we know of, but the request body did not make sense.
    Malformed { function: u8 },
    /// A function code this server does not implement at all.
    Unsupported { function: u8 },
}

impl Operation {
    pub fn function(&self) -> u8 {
        use function::*;
        match self {
            Operation::ReadCoils { .. } => READ_COILS,
            Operation::ReadDiscreteInputs { .. } => READ_DISCRETE_INPUTS,
            Operation::ReadHoldings { .. } => READ_HOLDING_REGISTERS,
            Operation::ReadInputs { .. } => READ_INPUT_REGISTERS,
            Operation::WriteCoil { .. } => WRITE_SINGLE_COIL,
            Operation::WriteHolding { .. } => WRITE_SINGLE_REGISTER,
            Operation::WriteCoils { .. } => WRITE_MULTIPLE_COILS,
            Operation::WriteHoldings { .. } => WRITE_MULTIPLE_REGISTERS,
            Operation::Malformed { function } | Operation::Unsupported { function } => *function,
        }
    }

    fn parse(function: u8, data: &[u8]) -> Self {
        use function::*;
        let be = |h: u8, l: u8| u16::from_be_bytes([h, l]);
        match (function, data) {
            (READ_COILS, &[a0, a1, c0, c1]) => {
                Operation::ReadCoils { address: be(a0, a1), count: be(c0, c1) }
            }
            (READ_DISCRETE_INPUTS, &[a0, a1, c0, c1]) => {
                Operation::ReadDiscreteInputs { address: be(a0, a1), count: be(c0, c1) }
            }
            (READ_HOLDING_REGISTERS, &[a0, a1, c0, c1]) => {
                Operation::ReadHoldings { address: be(a0, a1), count: be(c0, c1) }
            }
            (READ_INPUT_REGISTERS, &[a0, a1, c0, c1]) => {
                Operation::ReadInputs { address: be(a0, a1), count: be(c0, c1) }
            }
            (WRITE_SINGLE_COIL, &[a0, a1, v0, v1]) => match be(v0, v1) {
                0xFF00 => Operation::WriteCoil { address: be(a0, a1), value: true },
                0x0000 => Operation::WriteCoil { address: be(a0, a1), value: false },
                _ => Operation::Malformed { function },
            },
            (WRITE_SINGLE_REGISTER, &[a0, a1, v0, v1]) => {
                Operation::WriteHolding { address: be(a0, a1), value: be(v0, v1) }
            }
            (WRITE_MULTIPLE_COILS, &[a0, a1, c0, c1, byte_count, ref bytes @ ..]) => {
                let count = usize::from(be(c0, c1));
                if usize::from(byte_count) != count.div_ceil(8) || bytes.len() != count.div_ceil(8)
                {
                    return Operation::Malformed { function };
                }
                let values = (0..count).map(|i| (bytes[i / 8] >> (i % 8)) & 1 != 0).collect();
                Operation::WriteCoils { address: be(a0, a1), values }
            }
            (WRITE_MULTIPLE_REGISTERS, &[a0, a1, c0, c1, byte_count, ref bytes @ ..]) => {
                let count = usize::from(be(c0, c1));
                if usize::from(byte_count) != count * 2 || bytes.len() != count * 2 {
                    return Operation::Malformed { function };
                }
                let values = bytes.chunks_exact(2).map(|w| be(w[0], w[1])).collect();
                Operation::WriteHoldings { address: be(a0, a1), values }
            }
            (
                READ_COILS | READ_DISCRETE_INPUTS | READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS
                | WRITE_SINGLE_COIL | WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_COILS
                | WRITE_MULTIPLE_REGISTERS,
                _,
            ) => Operation::Malformed { function },
            _ => Operation::Unsupported { function },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub kind: ResponseKind,
}

impl Response {
    /// Build a response to `request`, keeping its transaction and unit identifiers.
    pub fn to(request: &Request, kind: ResponseKind) -> Self {
        Self { transaction_id: request.transaction_id, unit_id: request.unit_id, kind }
    }

    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::Exception { exception, .. } => Some(exception.code()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    ReadBits { function: u8, values: Vec<bool> },
    ReadRegisters { function: u8, values: Vec<u16> },
    WriteSingle { function: u8, address: u16, value: u16 },
    WriteMultiple { function: u8, address: u16, count: u16 },
    Exception { function: u8, exception: Exception },
}

/// Server side of Modbus TCP: decodes requests from masters and encodes our responses.
pub struct ModbusTCPCodec {}

impl Decoder for ModbusTCPCodec {
    type Item = Request;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let proto = u16::from_be_bytes(*proto_buffer);
            if proto != 0 {
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            if required_length < 2 || required_length > MAX_FRAME_LENGTH {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("MBAP length {required_length} is out of range"),
                ));
            }
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [unit_id, function_code, pdu @ ..] = data else {
                unreachable!("length was checked to be at least 2");
            };
            let request = Request {
                transaction_id,
                unit_id: *unit_id,
                operation: Operation::parse(*function_code, pdu),
            };
            src.advance(usize::from(required_length) + 6);
            return Ok(Some(request));
        }
    }
}

impl Encoder<Response> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut pdu = Vec::with_capacity(8);
        match response.kind {
            ResponseKind::ReadBits { function, values } => {
                let mut bytes = vec![0u8; values.len().div_ceil(8)];
                for (i, _) in values.iter().enumerate().filter(|(_, v)| **v) {
                    bytes[i / 8] |= 1 << (i % 8);
                }
                pdu.push(function);
                pdu.push(byte_count(bytes.len())?);
                pdu.extend(bytes);
            }
            ResponseKind::ReadRegisters { function, values } => {
                pdu.push(function);
                pdu.push(byte_count(values.len() * 2)?);
                pdu.extend(values.iter().flat_map(|v| v.to_be_bytes()));
            }
            ResponseKind::WriteSingle { function, address, value } => {
                pdu.push(function);
                pdu.extend(address.to_be_bytes());
                pdu.extend(value.to_be_bytes());
            }
            ResponseKind::WriteMultiple { function, address, count } => {
                pdu.push(function);
                pdu.extend(address.to_be_bytes());
                pdu.extend(count.to_be_bytes());
            }
            ResponseKind::Exception { function, exception } => {
                pdu.push(function | 0x80);
                pdu.push(exception.code());
            }
        }
        // The pdu is at most 252 bytes long by construction (see `byte_count`).
        let length = (pdu.len() + 1) as u16;
        dst.reserve(7 + pdu.len());
        dst.extend(response.transaction_id.to_be_bytes());
        dst.extend([0u8, 0]);
        dst.extend(length.to_be_bytes());
        dst.extend([response.unit_id]);
        dst.extend_from_slice(&pdu);
        trace!(message = "encoded a response", buffer = ?dst);
        Ok(())
    }
}

fn byte_count(len: usize) -> Result<u8, std::io::Error> {
    u8::try_from(len).ok().filter(|&l| l <= 250).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("response payload of {len} bytes does not fit into a frame"),
        )
    })
}
