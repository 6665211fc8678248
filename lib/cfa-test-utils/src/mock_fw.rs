// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A firmware stand-in that speaks the session message formats.
//!
//! Reservations are granted from index 0 upward per resource type and
//! direction. TCAM entries, EM records and index table entries are
//! kept in memory so tests can look at what the engine programmed.

use cfa::api::DevFamily;
use cfa::api::Direction;
use cfa::api::FlowHandle;
use cfa::api::FwCmd;
use cfa::api::ResourceType;
use cfa::api::errno;
use cfa::engine::adapter::TcamRecord;
use cfa::engine::fw::Transport;
use cfa::engine::fw::TransportError;
use cfa::engine::layout::all_resource_types;
use cfa::engine::layout::hcapi_type;
use cfa::engine::layout::tcam_shape;
use cfa::engine::msg::EmFlowReq;
use cfa::engine::msg::EmIndexResp;
use cfa::engine::msg::EmInsertReq;
use cfa::engine::msg::EmInsertResp;
use cfa::engine::msg::INLINE_DATA_MAX;
use cfa::engine::msg::ReqFlags;
use cfa::engine::msg::RescCountWire;
use cfa::engine::msg::RescEntryWire;
use cfa::engine::msg::RescQcapsRespHdr;
use cfa::engine::msg::RescReqHdr;
use cfa::engine::msg::RescRespHdr;
use cfa::engine::msg::SessionOpenFlags;
use cfa::engine::msg::SessionOpenReq;
use cfa::engine::msg::SessionOpenResp;
use cfa::engine::msg::SessionOpenRespFlags;
use cfa::engine::msg::TblGetReq;
use cfa::engine::msg::TblSetReq;
use cfa::engine::msg::TcamGetRespHdr;
use cfa::engine::msg::TcamIndexReq;
use cfa::engine::msg::TcamSetReq;
use cfa::engine::msg::read;
use cfa::engine::msg::read_records;
use cfa::engine::msg::with_records;
use std::collections::BTreeMap;
use std::collections::HashMap;
use zerocopy::IntoBytes;

type FwResult = Result<Vec<u8>, i32>;

const SRAM_BANK_BLOCKS: u32 = 2048;
const TBL_ENTRIES: u32 = 1024;

/// An EM record as firmware holds it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EmFlow {
    pub handle: FlowHandle,
    pub key: Vec<u8>,
    pub action_ptr: u64,
    pub num_entries: u8,
}

pub struct MockFw {
    pub family: DevFamily,
    /// Another client already created the session, so a shared open
    /// attaches to it.
    pub existing_session: bool,
    pub session_open: bool,
    pub client_id: u8,
    /// Every command received, in order.
    pub cmds: Vec<FwCmd>,
    /// Fail the next command of this type with the status.
    pub fail: Option<(FwCmd, i32)>,
    pub grants: BTreeMap<(Direction, u16), Vec<(u32, u32)>>,
    next_start: HashMap<(Direction, u16), u32>,
    pub flushed: Vec<(Direction, u16, u32, u32)>,
    pub tcam: HashMap<(Direction, u16, u32), TcamRecord>,
    pub em: BTreeMap<(Direction, u32), EmFlow>,
    pub tbl: HashMap<(Direction, u16, u32), Vec<u8>>,
    dma: HashMap<u64, Vec<u8>>,
    next_dma: u64,
    pub dma_staged: usize,
    pub dma_released: usize,
}

impl MockFw {
    pub fn new(family: DevFamily) -> Self {
        Self {
            family,
            existing_session: false,
            session_open: false,
            client_id: 0,
            cmds: Vec::new(),
            fail: None,
            grants: BTreeMap::new(),
            next_start: HashMap::new(),
            flushed: Vec::new(),
            tcam: HashMap::new(),
            em: BTreeMap::new(),
            tbl: HashMap::new(),
            dma: HashMap::new(),
            next_dma: 0x1000,
            dma_staged: 0,
            dma_released: 0,
        }
    }

    /// A firmware where another client already created the session
    /// and holds `grants`.
    pub fn with_existing_session(
        family: DevFamily,
        grants: &[(Direction, ResourceType, u32, u32)],
    ) -> Self {
        let mut fw = Self::new(family);
        fw.existing_session = true;
        for (dir, rtype, start, stride) in grants {
            if let Some(h) = hcapi_type(family, *rtype) {
                fw.grants.entry((*dir, h)).or_default().push((*start, *stride));
            }
        }
        fw
    }

    pub fn count(&self, cmd: FwCmd) -> usize {
        self.cmds.iter().filter(|c| **c == cmd).count()
    }

    /// The DMA buffers staged and not yet released.
    pub fn dma_outstanding(&self) -> usize {
        self.dma.len()
    }

    // The capacity firmware advertises for a resource type.
    fn cap(&self, rtype: ResourceType) -> u32 {
        match rtype {
            ResourceType::Tcam(tbl) => tcam_shape(self.family, tbl)
                .map(|s| s.num_rows as u32 * s.max_slices as u32)
                .unwrap_or(0),
            ResourceType::SramBank(_) => SRAM_BANK_BLOCKS,
            _ => TBL_ENTRIES,
        }
    }

    fn rtype(&self, hcapi: u16) -> Result<ResourceType, i32> {
        all_resource_types()
            .find(|rt| hcapi_type(self.family, *rt) == Some(hcapi))
            .ok_or(errno::EINVAL)
    }

    // Inline data, or the staged buffer it names.
    fn data<'a>(
        &'a self,
        flags: ReqFlags,
        field: &'a [u8; INLINE_DATA_MAX],
    ) -> Result<&'a [u8], i32> {
        if !flags.contains(ReqFlags::DMA) {
            return Ok(&field[..]);
        }
        let mut addr = [0u8; 8];
        addr.copy_from_slice(&field[..8]);
        self.dma
            .get(&u64::from_le_bytes(addr))
            .map(|d| d.as_slice())
            .ok_or(errno::EINVAL)
    }

    fn session_open_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<SessionOpenReq>(req)?;
        let flags = SessionOpenFlags::from_bits_truncate(u32::from_le_bytes(
            req.flags,
        ));
        if req.name().is_empty() {
            return Err(errno::EINVAL);
        }

        let mut resp_flags = SessionOpenRespFlags::empty();
        if flags.contains(SessionOpenFlags::SHARED) {
            if self.existing_session {
                self.client_id = 1;
            } else {
                resp_flags |= SessionOpenRespFlags::SHARED_CREATOR;
            }
        }
        self.session_open = true;
        Ok(SessionOpenResp {
            fw_session_id: 1,
            fw_session_client_id: self.client_id,
            unused: [0; 2],
            flags: resp_flags.bits().to_le_bytes(),
        }
        .as_bytes()
        .to_vec())
    }

    fn qcaps_cmd(&mut self) -> FwResult {
        let recs: Vec<RescCountWire> = all_resource_types()
            .filter_map(|rt| {
                let h = hcapi_type(self.family, rt)?;
                Some(RescCountWire::new(h, 0, self.cap(rt)))
            })
            .collect();
        let hdr = RescQcapsRespHdr {
            count: (recs.len() as u16).to_le_bytes(),
            strategy: 0,
            sram_profile: 0,
        };
        Ok(with_records(&hdr, &recs))
    }

    fn resc_cmd(&mut self, cmd: FwCmd, req: &[u8]) -> FwResult {
        let (hdr, rest) = parse::<RescReqHdr>(req)?;
        let dir = hdr.session.flags().direction();
        let reqs = read_records::<RescCountWire>(rest, hdr.count(), "reqs")
            .map_err(|_| errno::EINVAL)?;

        let mut out = Vec::new();
        for r in &reqs {
            let h = r.hcapi_type();
            let rtype = self.rtype(h)?;
            if cmd == FwCmd::RescInfo {
                let held = self.grants.get(&(dir, h)).into_iter().flatten();
                for (start, stride) in held {
                    out.push(RescEntryWire::new(h, *start, *stride));
                }
                continue;
            }

            let start = self.next_start.get(&(dir, h)).copied().unwrap_or(0);
            let avail = self.cap(rtype).saturating_sub(start);
            if avail < r.min() {
                return Err(errno::ENOSPC);
            }
            let stride = r.max().min(avail);
            self.next_start.insert((dir, h), start + stride);
            self.grants.entry((dir, h)).or_default().push((start, stride));
            out.push(RescEntryWire::new(h, start, stride));
        }
        Ok(with_records(&RescRespHdr::new(out.len()), &out))
    }

    fn flush_cmd(&mut self, req: &[u8]) -> FwResult {
        let (hdr, rest) = parse::<RescReqHdr>(req)?;
        let dir = hdr.session.flags().direction();
        let recs = read_records::<RescEntryWire>(rest, hdr.count(), "flush")
            .map_err(|_| errno::EINVAL)?;
        for r in &recs {
            let h = r.hcapi_type();
            if let Some(g) = self.grants.get_mut(&(dir, h)) {
                g.retain(|(s, _)| *s != r.start());
            }
            self.flushed.push((dir, h, r.start(), r.stride()));
        }
        Ok(Vec::new())
    }

    fn tcam_set_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<TcamSetReq>(req)?;
        let dir = req.session.flags().direction();
        let key_size = req.key_size as usize;
        let result_size = req.result_size as usize;
        let data = self.data(req.session.flags(), &req.dev_data)?;
        if data.len() < key_size * 2 + result_size {
            return Err(errno::EINVAL);
        }

        let rec = TcamRecord {
            key: data[..key_size].to_vec(),
            mask: data[key_size..key_size * 2].to_vec(),
            result: data[key_size * 2..key_size * 2 + result_size].to_vec(),
        };
        let h = u16::from_le_bytes(req.hcapi_type);
        let index = u32::from_le_bytes(req.index);
        self.tcam.insert((dir, h, index), rec);
        Ok(Vec::new())
    }

    fn tcam_get_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<TcamIndexReq>(req)?;
        let dir = req.session.flags().direction();
        let h = u16::from_le_bytes(req.hcapi_type);
        let index = u32::from_le_bytes(req.index);
        let rec = self.tcam.get(&(dir, h, index)).cloned().unwrap_or_default();

        let hdr = TcamGetRespHdr {
            key_size: rec.key.len() as u8,
            result_size: rec.result.len() as u8,
            unused: [0; 2],
        };
        let mut out = hdr.as_bytes().to_vec();
        out.extend_from_slice(&rec.key);
        out.extend_from_slice(&rec.mask);
        out.extend_from_slice(&rec.result);
        Ok(out)
    }

    fn tcam_free_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<TcamIndexReq>(req)?;
        let dir = req.session.flags().direction();
        let h = u16::from_le_bytes(req.hcapi_type);
        self.tcam.remove(&(dir, h, u32::from_le_bytes(req.index)));
        Ok(Vec::new())
    }

    fn em_insert_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<EmInsertReq>(req)?;
        let dir = req.session.flags().direction();
        let index = u32::from_le_bytes(req.record_index);
        if self.em.contains_key(&(dir, index)) {
            return Err(errno::EALREADY);
        }

        let key_bytes = u16::from_le_bytes(req.key_bits).div_ceil(8) as usize;
        let num_entries = key_bytes.div_ceil(16) as u8;
        self.em.insert(
            (dir, index),
            EmFlow {
                handle: FlowHandle::from_raw(u64::from_le_bytes(
                    req.flow_handle,
                )),
                key: req.key[..key_bytes].to_vec(),
                action_ptr: u64::from_le_bytes(req.action_ptr),
                num_entries,
            },
        );
        let resp = EmInsertResp {
            rptr_index: index.to_le_bytes(),
            rptr_entry: 0,
            num_entries,
            unused: [0; 2],
        };
        Ok(resp.as_bytes().to_vec())
    }

    fn em_flow_cmd(&mut self, cmd: FwCmd, req: &[u8]) -> FwResult {
        let (req, _) = parse::<EmFlowReq>(req)?;
        let dir = req.session.flags().direction();
        let handle = FlowHandle::from_raw(u64::from_le_bytes(req.flow_handle));
        let mut flow = self
            .em
            .remove(&(dir, handle.record_index()))
            .ok_or(errno::ENOENT)?;

        let index = if cmd == FwCmd::EmMove {
            let new_index = u32::from_le_bytes(req.new_index);
            flow.handle = handle.with_record_index(new_index);
            self.em.insert((dir, new_index), flow);
            new_index
        } else {
            handle.record_index()
        };
        Ok(EmIndexResp { em_index: index.to_le_bytes() }.as_bytes().to_vec())
    }

    fn tbl_set_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<TblSetReq>(req)?;
        let dir = req.session.flags().direction();
        let size = u16::from_le_bytes(req.size) as usize;
        let data = self.data(req.session.flags(), &req.data)?;
        if data.len() < size {
            return Err(errno::EINVAL);
        }

        let data = data[..size].to_vec();
        let h = u16::from_le_bytes(req.hcapi_type);
        self.tbl.insert((dir, h, u32::from_le_bytes(req.index)), data);
        Ok(Vec::new())
    }

    fn tbl_get_cmd(&mut self, req: &[u8]) -> FwResult {
        let (req, _) = parse::<TblGetReq>(req)?;
        let dir = req.session.flags().direction();
        let size = u16::from_le_bytes(req.size) as usize;
        let h = u16::from_le_bytes(req.hcapi_type);
        let mut data = self
            .tbl
            .get(&(dir, h, u32::from_le_bytes(req.index)))
            .cloned()
            .unwrap_or_default();
        data.resize(size, 0);
        Ok(data)
    }

    fn dispatch(&mut self, cmd: FwCmd, req: &[u8]) -> FwResult {
        if cmd != FwCmd::SessionOpen && !self.session_open {
            return Err(errno::EINVAL);
        }

        match cmd {
            FwCmd::SessionOpen => self.session_open_cmd(req),
            FwCmd::SessionClose => {
                self.session_open = false;
                Ok(Vec::new())
            }
            FwCmd::RescQcaps => self.qcaps_cmd(),
            FwCmd::RescAlloc | FwCmd::RescInfo => self.resc_cmd(cmd, req),
            FwCmd::RescFlush => self.flush_cmd(req),
            FwCmd::TcamSet => self.tcam_set_cmd(req),
            FwCmd::TcamGet => self.tcam_get_cmd(req),
            FwCmd::TcamFree => self.tcam_free_cmd(req),
            FwCmd::EmInsert => self.em_insert_cmd(req),
            FwCmd::EmDelete | FwCmd::EmMove => self.em_flow_cmd(cmd, req),
            FwCmd::TblSet => self.tbl_set_cmd(req),
            FwCmd::TblGet => self.tbl_get_cmd(req),
        }
    }
}

fn parse<T: zerocopy::FromBytes>(bytes: &[u8]) -> Result<(T, &[u8]), i32> {
    read::<T>(bytes, "request").map_err(|_| errno::EINVAL)
}

impl Transport for MockFw {
    fn request(
        &mut self,
        cmd: FwCmd,
        req: &[u8],
        resp: &mut [u8],
    ) -> Result<usize, TransportError> {
        self.cmds.push(cmd);
        if let Some((fail_cmd, code)) = self.fail {
            if fail_cmd == cmd {
                self.fail = None;
                return Err(TransportError::Status(code));
            }
        }

        let out = self.dispatch(cmd, req).map_err(TransportError::Status)?;
        if out.len() > resp.len() {
            return Err(TransportError::Io("response too large".into()));
        }
        resp[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }

    fn dma_stage(&mut self, data: &[u8]) -> Result<u64, TransportError> {
        let addr = self.next_dma;
        self.next_dma += 0x1000;
        self.dma.insert(addr, data.to_vec());
        self.dma_staged += 1;
        Ok(addr)
    }

    fn dma_release(&mut self, addr: u64) {
        if self.dma.remove(&addr).is_some() {
            self.dma_released += 1;
        }
    }
}
