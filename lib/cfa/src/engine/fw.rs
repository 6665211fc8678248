// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The firmware adapter.
//!
//! [`FwAdapter`] turns engine requests into firmware messages and
//! sends them over a [`Transport`]. How the bytes reach firmware is
//! the transport's business.

use super::adapter::Device;
use super::adapter::DeviceError;
use super::adapter::EmInsert;
use super::adapter::EmInserted;
use super::adapter::TcamRecord;
use super::layout::hcapi_type;
use super::layout::resource_type;
use super::msg::EM_KEY_MAX;
use super::msg::EmFlowReq;
use super::msg::EmIndexResp;
use super::msg::EmInsertReq;
use super::msg::EmInsertResp;
use super::msg::INLINE_DATA_MAX;
use super::msg::Malformed;
use super::msg::ReqFlags;
use super::msg::RescCountWire;
use super::msg::RescEntryWire;
use super::msg::RescQcapsRespHdr;
use super::msg::RescReqHdr;
use super::msg::RescRespHdr;
use super::msg::SessionHdr;
use super::msg::SessionOpenFlags;
use super::msg::SessionOpenReq;
use super::msg::SessionOpenResp;
use super::msg::SessionOpenRespFlags;
use super::msg::TblGetReq;
use super::msg::TblSetReq;
use super::msg::TcamGetRespHdr;
use super::msg::TcamIndexReq;
use super::msg::TcamSetReq;
use super::msg::inline_or_dma;
use super::msg::read;
use super::msg::read_records;
use super::msg::with_records;
use crate::api::DevFamily;
use crate::api::Direction;
use crate::api::FlowHandle;
use crate::api::FwCmd;
use crate::api::Reservation;
use crate::api::ResourceCap;
use crate::api::ResourceReq;
use crate::api::ResourceType;
use crate::api::ResvStrategy;
use alloc::string::String;
use alloc::vec::Vec;
use zerocopy::IntoBytes;

/// The largest response any request produces.
pub const RESP_MAX: usize = 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportError {
    /// Firmware answered with a non-zero status.
    Status(i32),
    /// The channel itself failed.
    Io(String),
}

/// The channel to firmware.
pub trait Transport {
    /// Send `req` as `cmd` and wait for the response, which is
    /// written to `resp`. Returns the length of the response.
    fn request(
        &mut self,
        cmd: FwCmd,
        req: &[u8],
        resp: &mut [u8],
    ) -> Result<usize, TransportError>;

    /// Copy `data` somewhere firmware can DMA it from, returning the
    /// address.
    fn dma_stage(&mut self, data: &[u8]) -> Result<u64, TransportError>;

    fn dma_release(&mut self, addr: u64);
}

/// What firmware said about an opened session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionInfo {
    pub fw_session_id: u8,
    pub fw_session_client_id: u8,
    /// This client created the (shared) session.
    pub shared_creator: bool,
}

/// The reservation capabilities of one direction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RescQcaps {
    pub caps: Vec<ResourceCap>,
    pub strategy: ResvStrategy,
    pub sram_profile: u8,
}

pub struct FwAdapter<T> {
    chan: T,
    family: DevFamily,
    fw_session_id: u32,
}

fn malformed(op: FwCmd) -> impl Fn(Malformed) -> DeviceError {
    move |Malformed(what)| DeviceError::Malformed { op, what }
}

impl<T: Transport> FwAdapter<T> {
    pub fn new(chan: T, family: DevFamily) -> Self {
        Self { chan, family, fw_session_id: 0 }
    }

    pub fn family(&self) -> DevFamily {
        self.family
    }

    pub fn transport(&self) -> &T {
        &self.chan
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.chan
    }

    pub fn into_transport(self) -> T {
        self.chan
    }

    fn hdr(&self, dir: Direction) -> SessionHdr {
        SessionHdr::new(self.fw_session_id, ReqFlags::dir(dir))
    }

    fn call(&mut self, op: FwCmd, req: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let mut resp = vec![0u8; RESP_MAX];
        let len = self.chan.request(op, req, &mut resp).map_err(|e| match e {
            TransportError::Status(code) => DeviceError::Status { op, code },
            TransportError::Io(msg) => DeviceError::Transport { op, msg },
        })?;
        resp.truncate(len);
        Ok(resp)
    }

    // Send a request whose data is staged for DMA when it is too large
    // to carry inline. The staging is released whatever the outcome.
    fn call_with_data(
        &mut self,
        op: FwCmd,
        data: &[u8],
        build: impl FnOnce(Option<u64>) -> Vec<u8>,
    ) -> Result<Vec<u8>, DeviceError> {
        if data.len() <= INLINE_DATA_MAX {
            return self.call(op, &build(None));
        }

        let addr = self.chan.dma_stage(data).map_err(|e| {
            DeviceError::Transport { op, msg: format!("DMA staging: {e:?}") }
        })?;
        let res = self.call(op, &build(Some(addr)));
        self.chan.dma_release(addr);
        res
    }

    fn hcapi(
        &self,
        op: FwCmd,
        rtype: ResourceType,
    ) -> Result<u16, DeviceError> {
        hcapi_type(self.family, rtype).ok_or(DeviceError::NotSupported(op))
    }

    pub fn session_open(
        &mut self,
        name: &str,
        shared: bool,
    ) -> Result<SessionInfo, DeviceError> {
        let op = FwCmd::SessionOpen;
        let flags = if shared {
            SessionOpenFlags::SHARED
        } else {
            SessionOpenFlags::empty()
        };
        let req = SessionOpenReq::new(name, flags);
        let resp = self.call(op, req.as_bytes())?;
        let (resp, _) =
            read::<SessionOpenResp>(&resp, "session").map_err(malformed(op))?;

        self.fw_session_id = resp.fw_session_id as u32;
        Ok(SessionInfo {
            fw_session_id: resp.fw_session_id,
            fw_session_client_id: resp.fw_session_client_id,
            shared_creator: resp
                .flags()
                .contains(SessionOpenRespFlags::SHARED_CREATOR),
        })
    }

    pub fn session_close(&mut self) -> Result<(), DeviceError> {
        let hdr = SessionHdr::new(self.fw_session_id, ReqFlags::empty());
        self.call(FwCmd::SessionClose, hdr.as_bytes())?;
        Ok(())
    }

    /// What firmware can reserve in `dir`. Types this family does not
    /// know are left out.
    pub fn resc_qcaps(
        &mut self,
        dir: Direction,
    ) -> Result<RescQcaps, DeviceError> {
        let op = FwCmd::RescQcaps;
        let req = RescReqHdr {
            session: self.hdr(dir),
            count: [0; 2],
            unused: [0; 2],
        };
        let resp = self.call(op, req.as_bytes())?;
        let (hdr, rest) =
            read::<RescQcapsRespHdr>(&resp, "qcaps").map_err(malformed(op))?;
        let count = u16::from_le_bytes(hdr.count) as usize;
        let recs = read_records::<RescCountWire>(rest, count, "qcaps entries")
            .map_err(malformed(op))?;

        let caps = recs
            .iter()
            .filter_map(|r| {
                let rtype = resource_type(self.family, r.hcapi_type())?;
                Some(ResourceCap {
                    rtype,
                    min: r.min() as u16,
                    max: r.max() as u16,
                })
            })
            .collect();
        let strategy = match hdr.strategy {
            0 => ResvStrategy::Static,
            _ => ResvStrategy::Dynamic,
        };
        Ok(RescQcaps { caps, strategy, sram_profile: hdr.sram_profile })
    }

    fn resc_query(
        &mut self,
        op: FwCmd,
        dir: Direction,
        reqs: &[ResourceReq],
    ) -> Result<Vec<Reservation>, DeviceError> {
        let mut recs = Vec::with_capacity(reqs.len());
        for r in reqs {
            let hcapi = self.hcapi(op, r.rtype)?;
            recs.push(RescCountWire::new(hcapi, r.min as u32, r.max as u32));
        }
        let hdr = RescReqHdr {
            session: self.hdr(dir),
            count: (recs.len() as u16).to_le_bytes(),
            unused: [0; 2],
        };

        let resp = self.call(op, &with_records(&hdr, &recs))?;
        let (hdr, rest) =
            read::<RescRespHdr>(&resp, "resc").map_err(malformed(op))?;
        let entries =
            read_records::<RescEntryWire>(rest, hdr.count(), "resc entries")
                .map_err(malformed(op))?;

        entries
            .iter()
            .map(|e| {
                let what = "unknown resource type";
                let rtype = resource_type(self.family, e.hcapi_type())
                    .ok_or(DeviceError::Malformed { op, what })?;
                Ok(Reservation { rtype, start: e.start(), stride: e.stride() })
            })
            .collect()
    }

    /// Reserve resources for this session.
    pub fn resc_alloc(
        &mut self,
        dir: Direction,
        reqs: &[ResourceReq],
    ) -> Result<Vec<Reservation>, DeviceError> {
        self.resc_query(FwCmd::RescAlloc, dir, reqs)
    }

    /// The reservations already held by the session this client
    /// shares.
    pub fn resc_info(
        &mut self,
        dir: Direction,
        reqs: &[ResourceReq],
    ) -> Result<Vec<Reservation>, DeviceError> {
        self.resc_query(FwCmd::RescInfo, dir, reqs)
    }

    /// Hand reservations back to firmware.
    pub fn resc_flush(
        &mut self,
        dir: Direction,
        resv: &[Reservation],
    ) -> Result<(), DeviceError> {
        let op = FwCmd::RescFlush;
        let mut recs = Vec::with_capacity(resv.len());
        for r in resv {
            let hcapi = self.hcapi(op, r.rtype)?;
            recs.push(RescEntryWire::new(hcapi, r.start, r.stride));
        }
        let hdr = RescReqHdr {
            session: self.hdr(dir),
            count: (recs.len() as u16).to_le_bytes(),
            unused: [0; 2],
        };
        self.call(op, &with_records(&hdr, &recs))?;
        Ok(())
    }

    /// Have firmware release one TCAM entry.
    ///
    /// Firmware clears the whole row the entry sits in, so the TCAM
    /// manager never uses this; it invalidates slices with a set.
    pub fn tcam_release(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
    ) -> Result<(), DeviceError> {
        let req = TcamIndexReq::new(self.hdr(dir), hcapi_type, index);
        self.call(FwCmd::TcamFree, req.as_bytes())?;
        Ok(())
    }
}

impl<T: Transport> Device for FwAdapter<T> {
    fn tcam_set(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
        key: &[u8],
        mask: &[u8],
        result: &[u8],
    ) -> Result<(), DeviceError> {
        let op = FwCmd::TcamSet;
        if key.len() != mask.len() || key.len() > u8::MAX as usize {
            return Err(DeviceError::Malformed { op, what: "key and mask" });
        }
        if result.len() > u8::MAX as usize {
            return Err(DeviceError::Malformed { op, what: "result" });
        }

        let mut data = Vec::with_capacity(key.len() * 2 + result.len());
        data.extend_from_slice(key);
        data.extend_from_slice(mask);
        data.extend_from_slice(result);

        let hdr = self.hdr(dir);
        self.call_with_data(op, &data, |dma| {
            let mut req = TcamSetReq {
                session: hdr,
                hcapi_type: hcapi_type.to_le_bytes(),
                key_size: key.len() as u8,
                result_size: result.len() as u8,
                index: index.to_le_bytes(),
                dev_data: [0; INLINE_DATA_MAX],
            };
            let flags = hdr.flags()
                | inline_or_dma(&mut req.dev_data, &data, dma);
            req.session.flags = flags.bits().to_le_bytes();
            req.as_bytes().to_vec()
        })?;
        Ok(())
    }

    fn tcam_get(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
    ) -> Result<TcamRecord, DeviceError> {
        let op = FwCmd::TcamGet;
        let req = TcamIndexReq::new(self.hdr(dir), hcapi_type, index);
        let resp = self.call(op, req.as_bytes())?;
        let (hdr, data) =
            read::<TcamGetRespHdr>(&resp, "tcam get").map_err(malformed(op))?;

        let key_size = hdr.key_size as usize;
        let result_size = hdr.result_size as usize;
        if data.len() < key_size * 2 + result_size {
            return Err(DeviceError::Malformed { op, what: "tcam get data" });
        }
        Ok(TcamRecord {
            key: data[..key_size].to_vec(),
            mask: data[key_size..key_size * 2].to_vec(),
            result: data[key_size * 2..key_size * 2 + result_size].to_vec(),
        })
    }

    fn em_insert(
        &mut self,
        dir: Direction,
        ins: &EmInsert<'_>,
    ) -> Result<EmInserted, DeviceError> {
        let op = FwCmd::EmInsert;
        if ins.key.len() > EM_KEY_MAX {
            return Err(DeviceError::Malformed { op, what: "key" });
        }

        let mut key = [0u8; EM_KEY_MAX];
        key[..ins.key.len()].copy_from_slice(ins.key);
        let req = EmInsertReq {
            session: self.hdr(dir),
            strength: ins.strength.to_le_bytes(),
            key_bits: ins.key_bits.to_le_bytes(),
            record_index: ins.record_index.to_le_bytes(),
            action_ptr: ins.action_ptr.to_le_bytes(),
            flow_handle: ins.handle.raw().to_le_bytes(),
            key,
        };
        let resp = self.call(op, req.as_bytes())?;
        let (resp, _) =
            read::<EmInsertResp>(&resp, "em insert").map_err(malformed(op))?;
        Ok(EmInserted {
            record_index: u32::from_le_bytes(resp.rptr_index),
            num_entries: resp.num_entries,
        })
    }

    fn em_delete(
        &mut self,
        dir: Direction,
        handle: FlowHandle,
    ) -> Result<(), DeviceError> {
        let op = FwCmd::EmDelete;
        let req = EmFlowReq {
            session: self.hdr(dir),
            new_index: [0; 4],
            unused: [0; 4],
            flow_handle: handle.raw().to_le_bytes(),
        };
        let resp = self.call(op, req.as_bytes())?;
        read::<EmIndexResp>(&resp, "em delete").map_err(malformed(op))?;
        Ok(())
    }

    fn em_move(
        &mut self,
        dir: Direction,
        handle: FlowHandle,
        new_index: u32,
    ) -> Result<(), DeviceError> {
        let op = FwCmd::EmMove;
        let req = EmFlowReq {
            session: self.hdr(dir),
            new_index: new_index.to_le_bytes(),
            unused: [0; 4],
            flow_handle: handle.raw().to_le_bytes(),
        };
        let resp = self.call(op, req.as_bytes())?;
        read::<EmIndexResp>(&resp, "em move").map_err(malformed(op))?;
        Ok(())
    }

    fn tbl_set(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let op = FwCmd::TblSet;
        if data.len() > u16::MAX as usize {
            return Err(DeviceError::Malformed { op, what: "data" });
        }

        let hdr = self.hdr(dir);
        self.call_with_data(op, data, |dma| {
            let mut req = TblSetReq {
                session: hdr,
                hcapi_type: hcapi_type.to_le_bytes(),
                size: (data.len() as u16).to_le_bytes(),
                index: index.to_le_bytes(),
                data: [0; INLINE_DATA_MAX],
            };
            let flags = hdr.flags() | inline_or_dma(&mut req.data, data, dma);
            req.session.flags = flags.bits().to_le_bytes();
            req.as_bytes().to_vec()
        })?;
        Ok(())
    }

    fn tbl_get(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
        len: usize,
    ) -> Result<Vec<u8>, DeviceError> {
        let op = FwCmd::TblGet;
        if len > RESP_MAX {
            return Err(DeviceError::Malformed { op, what: "length" });
        }

        let req = TblGetReq {
            session: self.hdr(dir),
            hcapi_type: hcapi_type.to_le_bytes(),
            size: (len as u16).to_le_bytes(),
            index: index.to_le_bytes(),
        };
        let mut resp = self.call(op, req.as_bytes())?;
        if resp.len() < len {
            return Err(DeviceError::Malformed { op, what: "table data" });
        }
        resp.truncate(len);
        Ok(resp)
    }
}
