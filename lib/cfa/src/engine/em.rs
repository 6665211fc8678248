// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The internal exact-match table.
//!
//! A flow's record occupies one to [`EM_MAX_ALLOC`] consecutive
//! 16-byte record entries, leased from a [`Dpool`] over the session's
//! EM record reservation. The flow handle handed to the caller names
//! the first record entry, so a defragmentation that moves a record
//! also changes its handle; [`EmTable::take_moves()`] reports every
//! such change.

use super::adapter::Device;
use super::adapter::DeviceError;
use super::adapter::EmInsert;
use super::dpool::Dpool;
use super::dpool::DpoolError;
use super::dpool::Relocate;
use super::msg::EM_KEY_MAX;
use crate::api::CfaError;
use crate::api::DefragMode;
use crate::api::Direction;
use crate::api::DumpDpoolResp;
use crate::api::EM_MAX_ALLOC;
use crate::api::EmCfg;
use crate::api::FlowHandle;
use crate::api::FlowHandleFields;
use crate::api::FwCmd;
use crate::api::Reservation;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use crc32fast::Hasher;

/// The size of one record entry.
pub const EM_RECORD_BYTES: usize = 16;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EmError {
    /// A key that is empty or longer than [`EM_KEY_MAX`].
    BadKey(usize),
    NotAllocated(FlowHandle),
    Pool(DpoolError),
    Device(DeviceError),
}

impl Display for EmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadKey(len) => {
                write!(f, "EM key of {len} bytes, 1-{EM_KEY_MAX} allowed")
            }
            Self::NotAllocated(h) => write!(f, "no flow {h}"),
            Self::Pool(e) => write!(f, "EM records: {e}"),
            Self::Device(e) => write!(f, "{e}"),
        }
    }
}

impl From<DpoolError> for EmError {
    fn from(err: DpoolError) -> Self {
        Self::Pool(err)
    }
}

impl From<DeviceError> for EmError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

impl From<EmError> for CfaError {
    fn from(err: EmError) -> Self {
        match err {
            EmError::Device(e) => e.into(),
            EmError::NotAllocated(_) => Self::NotAllocated(format!("{err}")),
            EmError::Pool(DpoolError::NoSpace(_)) => {
                Self::OutOfSpace(format!("{err}"))
            }
            EmError::Pool(DpoolError::Relocate { .. }) => {
                Self::Device(format!("{err}"))
            }
            EmError::BadKey(_) | EmError::Pool(_) => {
                Self::InvalidArgument(format!("{err}"))
            }
        }
    }
}

/// The hash fields of a flow handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EmHash {
    pub hash: u16,
    pub hash_id: u8,
    pub bucket: u8,
}

/// Hashes exact-match keys for one session.
#[derive(Clone, Copy, Debug)]
pub struct EmHasher {
    seed: u32,
}

impl EmHasher {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn hash(&self, key: &[u8]) -> EmHash {
        let mut h = Hasher::new();
        h.update(&self.seed.to_le_bytes());
        h.update(key);
        let crc = h.finalize();

        let mut h = Hasher::new_with_initial(crc);
        h.update(key);
        let bucket = (h.finalize() & 0x3) as u8;

        EmHash {
            hash: (crc & 0x3FFF) as u16,
            hash_id: ((crc >> 14) & 1) as u8,
            bucket,
        }
    }
}

// Moves flow records for the pool, keeping the handle map current.
struct EmRelocator<'a> {
    dir: Direction,
    dev: &'a mut dyn Device,
    flows: &'a mut BTreeMap<u64, FlowHandle>,
    moved: &'a mut Vec<(FlowHandle, FlowHandle)>,
}

impl Relocate<u64> for EmRelocator<'_> {
    type Error = EmError;

    fn relocate(&mut self, seq: &u64, new_index: u32) -> Result<(), EmError> {
        let old = *self
            .flows
            .get(seq)
            .ok_or(EmError::NotAllocated(FlowHandle::default()))?;
        self.dev.em_move(self.dir, old, new_index)?;

        let new = old.with_record_index(new_index);
        self.flows.insert(*seq, new);
        self.moved.push((old, new));
        Ok(())
    }
}

pub struct EmTable {
    dir: Direction,
    pool: Dpool<u64>,
    hasher: EmHasher,
    defrag: DefragMode,
    // Tokens start at 1; a pool extent with token 0 holds no flow.
    next_seq: u64,
    flows: BTreeMap<u64, FlowHandle>,
    moved: Vec<(FlowHandle, FlowHandle)>,
}

impl EmTable {
    /// Create a table over the record entries of `resv`.
    pub fn new(
        dir: Direction,
        resv: &Reservation,
        cfg: &EmCfg,
    ) -> Result<Self, EmError> {
        let max_alloc = cfg.max_alloc.min(EM_MAX_ALLOC);
        Ok(Self {
            dir,
            pool: Dpool::new(resv.start, resv.stride, max_alloc)?,
            hasher: EmHasher::new(cfg.hash_seed),
            defrag: cfg.defrag,
            next_seq: 1,
            flows: BTreeMap::new(),
            moved: Vec::new(),
        })
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// Insert a flow matching `key`, returning its handle.
    pub fn insert(
        &mut self,
        dev: &mut dyn Device,
        key: &[u8],
        action_ptr: u64,
        strength: u16,
    ) -> Result<FlowHandle, EmError> {
        if key.is_empty() || key.len() > EM_KEY_MAX {
            return Err(EmError::BadKey(key.len()));
        }

        let k = key.len().div_ceil(EM_RECORD_BYTES) as u32;
        let mut reloc = EmRelocator {
            dir: self.dir,
            dev: &mut *dev,
            flows: &mut self.flows,
            moved: &mut self.moved,
        };
        let index = self.pool.alloc_defrag(k, self.defrag, &mut reloc)?;

        let h = self.hasher.hash(key);
        let handle = FlowHandle::pack(&FlowHandleFields {
            record_index: index,
            dir: self.dir,
            internal: true,
            entries: k as u8,
            bucket: h.bucket,
            hash_id: h.hash_id,
            hash: h.hash,
        });
        let req = EmInsert {
            key,
            key_bits: (key.len() * 8) as u16,
            action_ptr,
            strength,
            record_index: index,
            handle,
        };
        let res = dev.em_insert(self.dir, &req).and_then(|ins| {
            if ins.record_index != index || ins.num_entries as u32 != k {
                return Err(DeviceError::Malformed {
                    op: FwCmd::EmInsert,
                    what: "record placement differs from request",
                });
            }
            Ok(())
        });
        if let Err(e) = res {
            // The extent was allocated just above.
            let freed = self.pool.free(index);
            debug_assert!(freed.is_ok(), "EM extent {index}: {freed:?}");
            return Err(e.into());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pool.set_entry_data(index, seq)?;
        self.flows.insert(seq, handle);
        Ok(handle)
    }

    // The pool token of a live flow.
    fn seq_of(&self, handle: FlowHandle) -> Result<u64, EmError> {
        self.pool
            .entry_data(handle.record_index())
            .filter(|seq| self.flows.get(seq) == Some(&handle))
            .ok_or(EmError::NotAllocated(handle))
    }

    pub fn contains(&self, handle: FlowHandle) -> bool {
        self.seq_of(handle).is_ok()
    }

    /// Delete the flow `handle`. A handle made stale by a move is not
    /// allocated.
    pub fn delete(
        &mut self,
        dev: &mut dyn Device,
        handle: FlowHandle,
    ) -> Result<(), EmError> {
        let seq = self.seq_of(handle)?;
        dev.em_delete(self.dir, handle)?;
        self.pool.free(handle.record_index())?;
        self.flows.remove(&seq);
        Ok(())
    }

    /// Compact every record toward the front of the pool, returning
    /// the largest free run.
    pub fn defrag(&mut self, dev: &mut dyn Device) -> Result<u32, EmError> {
        let mut reloc = EmRelocator {
            dir: self.dir,
            dev,
            flows: &mut self.flows,
            moved: &mut self.moved,
        };
        let max = self.pool.max_alloc();
        Ok(self.pool.defrag(max, DefragMode::All, &mut reloc)?)
    }

    /// The `(old, new)` handle of every flow moved since the last call.
    pub fn take_moves(&mut self) -> Vec<(FlowHandle, FlowHandle)> {
        core::mem::take(&mut self.moved)
    }

    pub fn flows(&self) -> impl Iterator<Item = FlowHandle> + '_ {
        self.flows.values().copied()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn dump(&self) -> DumpDpoolResp {
        self.pool.dump()
    }

    /// Delete every flow. Device failures are logged and the flow is
    /// dropped regardless.
    pub fn teardown(&mut self, dev: &mut dyn Device, log: &dyn LogProvider) {
        for (_, handle) in core::mem::take(&mut self.flows) {
            if let Err(e) = dev.em_delete(self.dir, handle) {
                log.log(
                    LogLevel::Warn,
                    &format!("EM teardown: {} flow {handle}: {e}", self.dir),
                );
            }
            let index = handle.record_index();
            if let Err(e) = self.pool.free(index) {
                log.log(
                    LogLevel::Warn,
                    &format!("EM teardown: {} record {index}: {e}", self.dir),
                );
            }
        }
        self.moved.clear();
    }

    #[cfg(any(test, feature = "test-help"))]
    pub fn check(&self) -> Result<(), alloc::string::String> {
        self.pool.check()?;
        for (seq, handle) in &self.flows {
            let index = handle.record_index();
            if self.pool.entry_data(index) != Some(*seq) {
                return Err(format!("flow {handle} not at {index}"));
            }
            let size = self.pool.extent_size(index).unwrap_or(0);
            if size != handle.unpack().entries as u32 {
                return Err(format!("flow {handle} extent size {size}"));
            }
        }
        if self.flows.len() != self.pool.extents().count() {
            return Err(format!("{} flows, extents differ", self.flows.len()));
        }
        Ok(())
    }
}
