// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A firmware session and the tables it owns.
//!
//! Opening a session leases resources from firmware for each
//! direction and binds the table managers to them. Every operation on
//! the session's tables goes through the [`Session`], which owns the
//! firmware adapter and so serializes access to hardware.
//!
//! A shared session attaches to the leases of the client that created
//! it rather than reserving its own, and leaves them in place when it
//! closes.

use super::adapter::Device;
use super::adapter::TcamRecord;
use super::em::EmTable;
use super::fw::FwAdapter;
use super::fw::RescQcaps;
use super::fw::SessionInfo;
use super::fw::Transport;
use super::layout::hcapi_type;
use super::rm::ResourceDb;
use super::rm::ResourceMgr;
use super::sram::SramMgr;
use super::tcam::EntryId;
use super::tcam::TcamMgr;
use crate::api::CfaError;
use crate::api::Direction;
use crate::api::DumpDpoolResp;
use crate::api::DumpSramResp;
use crate::api::DumpTcamResp;
use crate::api::FlowHandle;
use crate::api::ResourceType;
use crate::api::SessionCfg;
use crate::api::SliceSize;
use crate::api::SramBank;
use crate::api::TcamQcaps;
use crate::api::TcamTblType;
use crate::provider::LogLevel;
use crate::provider::Providers;
use alloc::vec::Vec;

fn em_table(
    em: &mut [Option<EmTable>; 2],
    dir: Direction,
) -> Result<&mut EmTable, CfaError> {
    em[dir.idx()].as_mut().ok_or_else(|| {
        CfaError::NotSupported(format!("no {dir} EM records reserved"))
    })
}

pub struct Session<T: Transport> {
    fw: FwAdapter<T>,
    cfg: SessionCfg,
    info: SessionInfo,
    providers: Providers,
    rm: ResourceDb,
    tcam: TcamMgr,
    sram: SramMgr,
    em: [Option<EmTable>; 2],
}

impl<T: Transport> Session<T> {
    /// Open a session on `chan` and lease the resources `cfg` asks
    /// for. If binding fails the session is closed again before the
    /// error is returned.
    pub fn open(
        chan: T,
        cfg: SessionCfg,
        providers: Providers,
    ) -> Result<Self, CfaError> {
        cfg.validate()?;

        let mut fw = FwAdapter::new(chan, cfg.family);
        let info = fw.session_open(&cfg.ctrl_chan_name, cfg.shared)?;
        providers.log.log(
            LogLevel::Note,
            &format!(
                "session {} client {} open on {:?}{}",
                info.fw_session_id,
                info.fw_session_client_id,
                cfg.ctrl_chan_name,
                if cfg.shared { " (shared)" } else { "" },
            ),
        );

        let mut sess = Self {
            fw,
            tcam: TcamMgr::init(cfg.family, cfg.tcam_max_entries),
            cfg,
            info,
            providers,
            rm: ResourceDb::new(),
            sram: SramMgr::new(),
            em: [None, None],
        };

        if let Err(e) = sess.bind() {
            sess.providers
                .log
                .log(LogLevel::Error, &format!("session bind failed: {e}"));
            sess.close();
            return Err(e);
        }
        Ok(sess)
    }

    fn bind(&mut self) -> Result<(), CfaError> {
        for dir in Direction::ALL {
            let reqs = self.cfg.requests(dir);
            if reqs.is_empty() {
                continue;
            }

            let resv = if self.cfg.shared {
                self.fw.resc_info(dir, reqs)?
            } else {
                self.fw.resc_alloc(dir, reqs)?
            };
            self.rm.add_reservations(dir, &resv)?;
            self.tcam.bind(dir, &resv)?;

            let em_resv = resv
                .iter()
                .find(|r| r.rtype == ResourceType::EmRecord && r.stride > 0);
            if let Some(r) = em_resv {
                self.em[dir.idx()] = Some(EmTable::new(dir, r, &self.cfg.em)?);
            }
        }
        Ok(())
    }

    /// Release everything the session holds and close it. Failures
    /// are logged; the session is always closed. Returns the
    /// transport.
    pub fn close(mut self) -> T {
        let log = &*self.providers.log;

        self.tcam.unbind(&mut self.fw, log);
        for em in self.em.iter_mut().flatten() {
            em.teardown(&mut self.fw, log);
        }
        self.sram.unbind(&mut self.rm, log);

        for (dir, rtype, count) in self.rm.leaked() {
            // TCAM rows and EM records are not handed out by index.
            if matches!(rtype, ResourceType::Tcam(_) | ResourceType::EmRecord)
            {
                continue;
            }
            log.log(
                LogLevel::Warn,
                &format!("session close: {count} {dir} {rtype} still in use"),
            );
        }

        if !self.cfg.shared {
            for dir in Direction::ALL {
                let list = self.rm.flush_list(dir);
                if list.is_empty() {
                    continue;
                }
                if let Err(e) = self.fw.resc_flush(dir, &list) {
                    log.log(
                        LogLevel::Warn,
                        &format!("session close: {dir} flush: {e}"),
                    );
                }
            }
        }

        if let Err(e) = self.fw.session_close() {
            log.log(LogLevel::Warn, &format!("session close: {e}"));
        }
        self.fw.into_transport()
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    pub fn cfg(&self) -> &SessionCfg {
        &self.cfg
    }

    pub fn fw(&self) -> &FwAdapter<T> {
        &self.fw
    }

    pub fn fw_mut(&mut self) -> &mut FwAdapter<T> {
        &mut self.fw
    }

    pub fn rm(&self) -> &ResourceDb {
        &self.rm
    }

    pub fn tcam(&self) -> &TcamMgr {
        &self.tcam
    }

    pub fn sram(&self) -> &SramMgr {
        &self.sram
    }

    pub fn em(&self, dir: Direction) -> Option<&EmTable> {
        self.em[dir.idx()].as_ref()
    }

    /// What firmware could reserve for `dir`.
    pub fn resc_qcaps(
        &mut self,
        dir: Direction,
    ) -> Result<RescQcaps, CfaError> {
        Ok(self.fw.resc_qcaps(dir)?)
    }

    /// The TCAM tables this session manages.
    pub fn tcam_qcaps(&self) -> TcamQcaps {
        self.tcam.qcaps()
    }

    pub fn tcam_alloc(
        &mut self,
        dir: Direction,
        tbl: TcamTblType,
        key_size: u16,
        priority: u16,
    ) -> Result<EntryId, CfaError> {
        Ok(self.tcam.alloc(&mut self.fw, dir, tbl, key_size, priority)?)
    }

    pub fn tcam_add_ref(&mut self, id: EntryId) -> Result<u8, CfaError> {
        Ok(self.tcam.add_ref(id)?)
    }

    pub fn tcam_free(
        &mut self,
        dir: Direction,
        tbl: Option<TcamTblType>,
        id: EntryId,
    ) -> Result<u8, CfaError> {
        Ok(self.tcam.free(&mut self.fw, dir, tbl, id)?)
    }

    pub fn tcam_set(
        &mut self,
        dir: Direction,
        tbl: TcamTblType,
        id: EntryId,
        key: &[u8],
        mask: &[u8],
        result: &[u8],
    ) -> Result<(), CfaError> {
        Ok(self.tcam.set(&mut self.fw, dir, tbl, id, key, mask, result)?)
    }

    pub fn tcam_get(
        &mut self,
        dir: Direction,
        tbl: TcamTblType,
        id: EntryId,
    ) -> Result<TcamRecord, CfaError> {
        Ok(self.tcam.get(&mut self.fw, dir, tbl, id)?)
    }

    pub fn sram_alloc(
        &mut self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
    ) -> Result<u32, CfaError> {
        Ok(self.sram.alloc(dir, bank, size, &mut self.rm)?)
    }

    pub fn sram_free(
        &mut self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
        offset: u32,
    ) -> Result<(), CfaError> {
        Ok(self.sram.free(dir, bank, size, offset, &mut self.rm)?)
    }

    pub fn sram_is_allocated(
        &self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
        offset: u32,
    ) -> Result<bool, CfaError> {
        Ok(self.sram.is_allocated(dir, bank, size, offset)?)
    }

    pub fn em_insert(
        &mut self,
        dir: Direction,
        key: &[u8],
        action_ptr: u64,
        strength: u16,
    ) -> Result<FlowHandle, CfaError> {
        let em = em_table(&mut self.em, dir)?;
        Ok(em.insert(&mut self.fw, key, action_ptr, strength)?)
    }

    pub fn em_delete(&mut self, handle: FlowHandle) -> Result<(), CfaError> {
        let dir = handle.dir();
        let em = self.em[dir.idx()]
            .as_mut()
            .ok_or_else(|| CfaError::NotAllocated(format!("flow {handle}")))?;
        Ok(em.delete(&mut self.fw, handle)?)
    }

    pub fn em_defrag(&mut self, dir: Direction) -> Result<u32, CfaError> {
        let em = em_table(&mut self.em, dir)?;
        Ok(em.defrag(&mut self.fw)?)
    }

    /// The `(old, new)` handles of flows moved by defragmentation
    /// since the last call.
    pub fn em_take_moves(
        &mut self,
        dir: Direction,
    ) -> Result<Vec<(FlowHandle, FlowHandle)>, CfaError> {
        Ok(em_table(&mut self.em, dir)?.take_moves())
    }

    // Index tables hand out single entries of their reservation.
    fn index_table(rtype: ResourceType) -> Result<(), CfaError> {
        match rtype {
            ResourceType::FullAction | ResourceType::Encap => Ok(()),
            _ => Err(CfaError::InvalidArgument(format!(
                "{rtype} is not an index table"
            ))),
        }
    }

    pub fn tbl_alloc(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Result<u32, CfaError> {
        Self::index_table(rtype)?;
        Ok(self.rm.alloc(dir, rtype)?)
    }

    pub fn tbl_free(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
    ) -> Result<(), CfaError> {
        Self::index_table(rtype)?;
        Ok(self.rm.free(dir, rtype, index)?)
    }

    fn tbl_entry(
        &self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
    ) -> Result<u16, CfaError> {
        Self::index_table(rtype)?;
        if !self.rm.is_allocated(dir, rtype, index)? {
            return Err(CfaError::NotAllocated(format!(
                "{dir} {rtype} index {index}"
            )));
        }
        hcapi_type(self.cfg.family, rtype).ok_or_else(|| {
            CfaError::NotSupported(format!("{rtype} on {:?}", self.cfg.family))
        })
    }

    pub fn tbl_set(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
        data: &[u8],
    ) -> Result<(), CfaError> {
        let hcapi = self.tbl_entry(dir, rtype, index)?;
        Ok(self.fw.tbl_set(dir, hcapi, index, data)?)
    }

    pub fn tbl_get(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
        len: usize,
    ) -> Result<Vec<u8>, CfaError> {
        let hcapi = self.tbl_entry(dir, rtype, index)?;
        Ok(self.fw.tbl_get(dir, hcapi, index, len)?)
    }

    pub fn dump_tcam(
        &self,
        dir: Direction,
        tbl: TcamTblType,
    ) -> Result<DumpTcamResp, CfaError> {
        Ok(self.tcam.dump(dir, tbl)?)
    }

    pub fn dump_sram(
        &self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
    ) -> DumpSramResp {
        self.sram.dump(dir, bank, size)
    }

    pub fn dump_em(&self, dir: Direction) -> Option<DumpDpoolResp> {
        self.em(dir).map(|em| em.dump())
    }
}
