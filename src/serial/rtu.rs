//! Modbus RTU framing for single holding-register reads.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::errors::{classify_io_error, BusFault, ProtocolFault, SerialFailureKind};

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;
const REQUEST_LEN: usize = 8;

/// CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// Build a request reading one holding register at `register` from `address`.
pub fn encode_read_request(address: u8, register: u16) -> [u8; REQUEST_LEN] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let mut frame = [address, READ_HOLDING_REGISTERS, reg_hi, reg_lo, 0x00, 0x01, 0, 0];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

fn check_crc(frame: &[u8]) -> Result<(), ProtocolFault> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let actual = u16::from_le_bytes([tail[0], tail[1]]);
    if expected != actual {
        return Err(ProtocolFault::Crc { expected, actual });
    }
    Ok(())
}

/// Run one request/response transaction. The whole exchange, including the
/// response, must complete within `timeout`.
pub async fn read_holding_register<S>(
    io: &mut S,
    address: u8,
    register: u16,
    timeout: Duration,
) -> Result<u16, BusFault>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = encode_read_request(address, register);
    io.write_all(&request).await?;
    io.flush().await?;

    match tokio::time::timeout(timeout, read_response(io, address)).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolFault::NoResponse { address }.into()),
    }
}

async fn read_response<S>(io: &mut S, address: u8) -> Result<u16, BusFault>
where
    S: AsyncRead + Unpin,
{
    let mut frame = [0u8; 7];
    read_exact(io, &mut frame[..3], address).await?;

    let function = frame[1];
    if function == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        read_exact(io, &mut frame[3..5], address).await?;
        check_crc(&frame[..5])?;
        return Err(ProtocolFault::Exception {
            address: frame[0],
            code: frame[2],
        }
        .into());
    }
    if function != READ_HOLDING_REGISTERS {
        return Err(ProtocolFault::WrongFunction(function).into());
    }
    if frame[2] != 2 {
        return Err(ProtocolFault::ByteCount(frame[2]).into());
    }

    read_exact(io, &mut frame[3..], address).await?;
    check_crc(&frame)?;
    if frame[0] != address {
        return Err(ProtocolFault::WrongAddress {
            expected: address,
            actual: frame[0],
        }
        .into());
    }

    Ok(u16::from_be_bytes([frame[3], frame[4]]))
}

async fn read_exact<S>(io: &mut S, buf: &mut [u8], address: u8) -> Result<(), BusFault>
where
    S: AsyncRead + Unpin,
{
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        // A port-level read timeout means the slave stayed silent.
        Err(err) if classify_io_error(&err) == SerialFailureKind::Timeout => {
            Err(ProtocolFault::NoResponse { address }.into())
        }
        Err(err) => Err(err.into()),
    }
}
