// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Firmware message layouts.
//!
//! Every multi-byte field is little-endian. Requests that carry a
//! variable number of records are a fixed header followed by the
//! records; the header names the count.

use crate::api::CTRL_CHAN_NAME_MAX;
use crate::api::Direction;
use alloc::vec::Vec;
use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// The most payload a request carries inline. Anything larger is
/// staged in host memory and referenced by DMA address.
pub const INLINE_DATA_MAX: usize = 88;

/// The most records one resource message carries.
pub const RESC_ENTRIES_MAX: usize = 32;

/// The largest exact-match key, in bytes.
pub const EM_KEY_MAX: usize = 64;

bitflags! {
    /// The flags word common to most requests.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ReqFlags: u32 {
        const EGRESS = 1 << 0;
        /// The data field holds a DMA address rather than the data.
        const DMA = 1 << 1;
    }
}

impl ReqFlags {
    pub fn dir(dir: Direction) -> Self {
        match dir {
            Direction::Ingress => Self::empty(),
            Direction::Egress => Self::EGRESS,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.contains(Self::EGRESS) {
            Direction::Egress
        } else {
            Direction::Ingress
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SessionOpenFlags: u32 {
        /// Attach to the session already open on this channel.
        const SHARED = 1 << 0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SessionOpenRespFlags: u32 {
        /// This client created the shared session.
        const SHARED_CREATOR = 1 << 0;
    }
}

/// A response too short or otherwise not what was asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Malformed(pub &'static str);

/// Read a `T` from the front of `bytes`.
pub fn read<'a, T: FromBytes>(
    bytes: &'a [u8],
    what: &'static str,
) -> Result<(T, &'a [u8]), Malformed> {
    T::read_from_prefix(bytes).map_err(|_| Malformed(what))
}

/// Read `count` records following a header.
pub fn read_records<T: FromBytes>(
    mut bytes: &[u8],
    count: usize,
    what: &'static str,
) -> Result<heapless::Vec<T, RESC_ENTRIES_MAX>, Malformed> {
    let mut out = heapless::Vec::new();
    for _ in 0..count {
        let (rec, rest) = read::<T>(bytes, what)?;
        out.push(rec).map_err(|_| Malformed(what))?;
        bytes = rest;
    }
    Ok(out)
}

/// A header followed by its records.
pub fn with_records<H, T>(hdr: &H, recs: &[T]) -> Vec<u8>
where
    H: IntoBytes + Immutable,
    T: IntoBytes + Immutable,
{
    let mut out = hdr.as_bytes().to_vec();
    for r in recs {
        out.extend_from_slice(r.as_bytes());
    }
    out
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct SessionOpenReq {
    pub name: [u8; CTRL_CHAN_NAME_MAX],
    pub flags: [u8; 4],
}

impl SessionOpenReq {
    /// The name is truncated to [`CTRL_CHAN_NAME_MAX`] bytes.
    pub fn new(name: &str, flags: SessionOpenFlags) -> Self {
        let mut buf = [0u8; CTRL_CHAN_NAME_MAX];
        let len = name.len().min(CTRL_CHAN_NAME_MAX);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { name: buf, flags: flags.bits().to_le_bytes() }
    }

    pub fn name(&self) -> &[u8] {
        let len =
            self.name.iter().position(|b| *b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct SessionOpenResp {
    pub fw_session_id: u8,
    pub fw_session_client_id: u8,
    pub unused: [u8; 2],
    pub flags: [u8; 4],
}

impl SessionOpenResp {
    pub fn flags(&self) -> SessionOpenRespFlags {
        SessionOpenRespFlags::from_bits_truncate(u32::from_le_bytes(
            self.flags,
        ))
    }
}

/// The header of every request that acts on an open session.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct SessionHdr {
    pub fw_session_id: [u8; 4],
    pub flags: [u8; 4],
}

impl SessionHdr {
    pub fn new(fw_session_id: u32, flags: ReqFlags) -> Self {
        Self {
            fw_session_id: fw_session_id.to_le_bytes(),
            flags: flags.bits().to_le_bytes(),
        }
    }

    pub fn session(&self) -> u32 {
        u32::from_le_bytes(self.fw_session_id)
    }

    pub fn flags(&self) -> ReqFlags {
        ReqFlags::from_bits_truncate(u32::from_le_bytes(self.flags))
    }
}

/// Resource query, reservation, info and flush requests. The header
/// is followed by `count` records: none for a capability query,
/// [`RescCountWire`] for a reservation or info query, and
/// [`RescEntryWire`] for a flush.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct RescReqHdr {
    pub session: SessionHdr,
    pub count: [u8; 2],
    pub unused: [u8; 2],
}

impl RescReqHdr {
    pub fn count(&self) -> usize {
        u16::from_le_bytes(self.count) as usize
    }
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct RescQcapsRespHdr {
    pub count: [u8; 2],
    pub strategy: u8,
    pub sram_profile: u8,
}

/// A minimum and maximum count of one resource type, used both for
/// capabilities and for requests.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct RescCountWire {
    pub hcapi_type: [u8; 2],
    pub unused: [u8; 2],
    pub min: [u8; 4],
    pub max: [u8; 4],
}

impl RescCountWire {
    pub fn new(hcapi_type: u16, min: u32, max: u32) -> Self {
        Self {
            hcapi_type: hcapi_type.to_le_bytes(),
            unused: [0; 2],
            min: min.to_le_bytes(),
            max: max.to_le_bytes(),
        }
    }

    pub fn hcapi_type(&self) -> u16 {
        u16::from_le_bytes(self.hcapi_type)
    }

    pub fn min(&self) -> u32 {
        u32::from_le_bytes(self.min)
    }

    pub fn max(&self) -> u32 {
        u32::from_le_bytes(self.max)
    }
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct RescRespHdr {
    pub count: [u8; 2],
    pub unused: [u8; 2],
}

impl RescRespHdr {
    pub fn new(count: usize) -> Self {
        Self { count: (count as u16).to_le_bytes(), unused: [0; 2] }
    }

    pub fn count(&self) -> usize {
        u16::from_le_bytes(self.count) as usize
    }
}

/// A range of one resource type leased to a session.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct RescEntryWire {
    pub hcapi_type: [u8; 2],
    pub unused: [u8; 2],
    pub start: [u8; 4],
    pub stride: [u8; 4],
}

impl RescEntryWire {
    pub fn new(hcapi_type: u16, start: u32, stride: u32) -> Self {
        Self {
            hcapi_type: hcapi_type.to_le_bytes(),
            unused: [0; 2],
            start: start.to_le_bytes(),
            stride: stride.to_le_bytes(),
        }
    }

    pub fn hcapi_type(&self) -> u16 {
        u16::from_le_bytes(self.hcapi_type)
    }

    pub fn start(&self) -> u32 {
        u32::from_le_bytes(self.start)
    }

    pub fn stride(&self) -> u32 {
        u32::from_le_bytes(self.stride)
    }
}

/// Program one TCAM entry. The data is the key, then the mask, then
/// the result; or with [`ReqFlags::DMA`], the little-endian DMA
/// address of that data in the first eight bytes.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcamSetReq {
    pub session: SessionHdr,
    pub hcapi_type: [u8; 2],
    pub key_size: u8,
    pub result_size: u8,
    pub index: [u8; 4],
    pub dev_data: [u8; INLINE_DATA_MAX],
}

/// Read back or release one TCAM entry.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcamIndexReq {
    pub session: SessionHdr,
    pub hcapi_type: [u8; 2],
    /// Entries to release; always one, and ignored by a read.
    pub count: [u8; 2],
    pub index: [u8; 4],
}

impl TcamIndexReq {
    pub fn new(session: SessionHdr, hcapi_type: u16, index: u32) -> Self {
        Self {
            session,
            hcapi_type: hcapi_type.to_le_bytes(),
            count: 1u16.to_le_bytes(),
            index: index.to_le_bytes(),
        }
    }
}

/// Followed by the key, the mask and the result.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcamGetRespHdr {
    pub key_size: u8,
    pub result_size: u8,
    pub unused: [u8; 2],
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct EmInsertReq {
    pub session: SessionHdr,
    pub strength: [u8; 2],
    pub key_bits: [u8; 2],
    pub record_index: [u8; 4],
    pub action_ptr: [u8; 8],
    pub flow_handle: [u8; 8],
    pub key: [u8; EM_KEY_MAX],
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct EmInsertResp {
    pub rptr_index: [u8; 4],
    pub rptr_entry: u8,
    pub num_entries: u8,
    pub unused: [u8; 2],
}

/// Delete a flow, or with a new index, move its record.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct EmFlowReq {
    pub session: SessionHdr,
    pub new_index: [u8; 4],
    pub unused: [u8; 4],
    pub flow_handle: [u8; 8],
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct EmIndexResp {
    pub em_index: [u8; 4],
}

/// Write an index table entry. The data follows the same inline or
/// DMA rule as [`TcamSetReq`].
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TblSetReq {
    pub session: SessionHdr,
    pub hcapi_type: [u8; 2],
    pub size: [u8; 2],
    pub index: [u8; 4],
    pub data: [u8; INLINE_DATA_MAX],
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TblGetReq {
    pub session: SessionHdr,
    pub hcapi_type: [u8; 2],
    pub size: [u8; 2],
    pub index: [u8; 4],
}

/// Fill a data field with `data`, or with its DMA address when it
/// does not fit. Returns the flags to add to the request.
pub fn inline_or_dma(
    field: &mut [u8; INLINE_DATA_MAX],
    data: &[u8],
    dma_addr: Option<u64>,
) -> ReqFlags {
    match dma_addr {
        Some(addr) => {
            field[..8].copy_from_slice(&addr.to_le_bytes());
            ReqFlags::DMA
        }
        None => {
            field[..data.len()].copy_from_slice(data);
            ReqFlags::empty()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layouts() {
        assert_eq!(size_of::<SessionOpenReq>(), 68);
        assert_eq!(size_of::<SessionHdr>(), 8);
        assert_eq!(size_of::<RescEntryWire>(), 12);
        assert_eq!(size_of::<RescCountWire>(), 12);
        assert_eq!(size_of::<TcamSetReq>(), 8 + 8 + INLINE_DATA_MAX);
        assert_eq!(size_of::<EmInsertReq>(), 32 + EM_KEY_MAX);
        assert_eq!(size_of::<TblSetReq>(), 16 + INLINE_DATA_MAX);
    }

    #[test]
    fn session_name_truncates() {
        let long = "x".repeat(100);
        let req = SessionOpenReq::new(&long, SessionOpenFlags::SHARED);
        assert_eq!(req.name().len(), CTRL_CHAN_NAME_MAX);
        assert_eq!(u32::from_le_bytes(req.flags), 1);

        let req = SessionOpenReq::new("ch0", SessionOpenFlags::empty());
        assert_eq!(req.name(), b"ch0");
    }

    #[test]
    fn records_follow_header() {
        let recs = [
            RescEntryWire::new(0x03, 0, 64),
            RescEntryWire::new(0x21, 32, 8),
        ];
        let bytes = with_records(&RescRespHdr::new(recs.len()), &recs);
        assert_eq!(bytes.len(), 4 + 2 * 12);

        let (hdr, rest) = read::<RescRespHdr>(&bytes, "hdr").unwrap();
        assert_eq!(hdr.count(), 2);
        let got = read_records::<RescEntryWire>(rest, hdr.count(), "recs")
            .unwrap();
        assert_eq!(got[1].hcapi_type(), 0x21);
        assert_eq!(got[1].start(), 32);
        assert_eq!(got[1].stride(), 8);

        assert_eq!(
            read_records::<RescEntryWire>(rest, 3, "recs").unwrap_err(),
            Malformed("recs")
        );
    }

    #[test]
    fn dma_address_replaces_data() {
        let mut field = [0u8; INLINE_DATA_MAX];
        let flags = inline_or_dma(&mut field, &[7u8; 200], Some(0x1000));
        assert_eq!(flags, ReqFlags::DMA);
        assert_eq!(&field[..8], &0x1000u64.to_le_bytes());

        let mut field = [0u8; INLINE_DATA_MAX];
        let flags = inline_or_dma(&mut field, &[7u8; 10], None);
        assert!(flags.is_empty());
        assert_eq!(&field[..10], &[7u8; 10]);
        assert_eq!(field[10], 0);
    }

    #[test]
    fn direction_flag() {
        let egress = ReqFlags::dir(Direction::Egress);
        assert_eq!(egress.direction(), Direction::Egress);
        assert_eq!(
            (ReqFlags::dir(Direction::Ingress) | ReqFlags::DMA).direction(),
            Direction::Ingress
        );
    }
}
