//! Binary device-data records.
//!
//! Each record is:
//!
//! | bytes | field |
//! |-------|-------|
//! | 2 | big-endian length of everything that follows |
//! | 1 | status: bit7 online, bit6 pending deletion, bits 0..3 bus number |
//! | 4 | big-endian address |
//! | 2 | big-endian device type index |
//! | n | device payload |
//!
//! Records are concatenated into the aggregate binary payload; [BinaryDataMsg::iter] walks
//! them back out.

use alloc::vec::Vec;
use bitflags::bitflags;
use utils::endian::{BigEndianReader, BigEndianWriter};

use super::{
    id::{BusElemAddr, BusNum},
    types::DeviceTypeIndex,
};

/// Bytes in a record header after the length field.
pub const RECORD_HEADER_LEN: usize = 1 + 4 + 2;
const BUS_NUM_MASK: u8 = 0x0f;

bitflags! {
    pub struct RecordStatus: u8 {
        const ONLINE = 0x80;
        const PENDING_DELETION = 0x40;
    }
}

/// Append one record to `out`. Payloads too long for the length field are truncated.
pub fn gen_binary_data_msg(
    out: &mut Vec<u8>,
    bus_num: BusNum,
    address: BusElemAddr,
    dev_type_idx: DeviceTypeIndex,
    online: bool,
    pending_deletion: bool,
    data: &[u8],
) {
    let data = &data[..data.len().min(u16::MAX as usize - RECORD_HEADER_LEN)];
    let mut status = RecordStatus::empty();
    status.set(RecordStatus::ONLINE, online);
    status.set(RecordStatus::PENDING_DELETION, pending_deletion);
    out.put_u16_be((RECORD_HEADER_LEN + data.len()) as u16);
    out.put_u8(status.bits() | (bus_num as u8 & BUS_NUM_MASK));
    out.put_u32_be(address);
    out.put_u16_be(dev_type_idx);
    out.extend_from_slice(data);
}

/// One decoded record, borrowing its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDataMsg<'a> {
    pub bus_num: BusNum,
    pub address: BusElemAddr,
    pub dev_type_idx: DeviceTypeIndex,
    pub online: bool,
    pub pending_deletion: bool,
    pub data: &'a [u8],
}

impl<'a> BinaryDataMsg<'a> {
    /// Iterate the records in `buf`. Iteration stops at the first truncated record.
    pub fn iter(buf: &'a [u8]) -> impl Iterator<Item = BinaryDataMsg<'a>> + 'a {
        let mut rd = BigEndianReader::new(buf);
        core::iter::from_fn(move || {
            let len = rd.u16()? as usize;
            if len < RECORD_HEADER_LEN {
                return None;
            }
            let mut body = BigEndianReader::new(rd.take(len)?);
            let status = body.u8()?;
            let flags = RecordStatus::from_bits_truncate(status);
            Some(BinaryDataMsg {
                bus_num: (status & BUS_NUM_MASK) as BusNum,
                online: flags.contains(RecordStatus::ONLINE),
                pending_deletion: flags.contains(RecordStatus::PENDING_DELETION),
                address: body.u32()?,
                dev_type_idx: body.u16()?,
                data: body.take(body.remaining())?,
            })
        })
    }
}
