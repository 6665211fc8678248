// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The TCAM manager.
//!
//! Hardware matches TCAM rows in index order, so a table is kept
//! sorted: a row of higher priority always sits at a lower index than
//! a row of lower priority. Entries of [`TCAM_PRIORITY_MAX`] form a
//! contiguous band at the top of the managed range.
//!
//! A row is divided into `max_slices` slices and holds entries of one
//! size, which is the power of two number of slices needed for the
//! entry's key. Entries of equal priority and size share rows.
//!
//! Keeping the table sorted and dense means moving rows on both
//! allocation and free. Callers only ever see an [`EntryId`]; the
//! manager tracks where each ID currently lives and moves the hardware
//! copy with it.

mod shuffle;
mod table;

pub use table::MAX_SLICES;
pub use table::Row;
pub use table::TcamTable;

use super::adapter::Device;
use super::adapter::DeviceError;
use super::adapter::TcamRecord;
use super::bitpool::BitPool;
use super::layout::TcamShape;
use super::layout::tcam_shape;
use crate::api::CfaError;
use crate::api::DevFamily;
use crate::api::Direction;
use crate::api::DumpTcamResp;
use crate::api::Reservation;
use crate::api::ResourceType;
use crate::api::TCAM_TBL_TYPES;
use crate::api::TcamQcaps;
use crate::api::TcamTblType;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use shuffle::TableCtx;

pub use crate::api::TCAM_PRIORITY_MAX;

/// A session-wide TCAM entry identifier.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct EntryId(pub u16);

impl Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TcamError {
    NotSupported(Direction, TcamTblType),
    NotBound(Direction, TcamTblType),
    BadRange { tbl: TcamTblType, start: u32, stride: u32 },
    BadKeySize { tbl: TcamTblType, key_bytes: u16 },
    BadLength { what: &'static str, len: usize, max: usize },
    NoSpace(Direction, TcamTblType),
    /// Every entry ID is in use.
    IdsExhausted,
    NotAllocated(EntryId),
    /// The entry already carries the most references it can count.
    RefOverflow(EntryId),
    Device(DeviceError),
}

impl Display for TcamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotSupported(dir, tbl) => {
                write!(f, "no {dir} {tbl} TCAM on this device")
            }
            Self::NotBound(dir, tbl) => {
                write!(f, "no {dir} {tbl} TCAM rows reserved")
            }
            Self::BadRange { tbl, start, stride } => write!(
                f,
                "{tbl}: reservation {start}+{stride} is not whole rows"
            ),
            Self::BadKeySize { tbl, key_bytes } => {
                write!(f, "{tbl}: no entry fits a {key_bytes} byte key")
            }
            Self::BadLength { what, len, max } => {
                write!(f, "{what} is {len} bytes, at most {max} allowed")
            }
            Self::NoSpace(dir, tbl) => write!(f, "{dir} {tbl} TCAM full"),
            Self::IdsExhausted => write!(f, "TCAM entry IDs exhausted"),
            Self::NotAllocated(id) => write!(f, "TCAM entry {id} not in use"),
            Self::RefOverflow(id) => {
                write!(f, "TCAM entry {id} reference count at limit")
            }
            Self::Device(e) => write!(f, "{e}"),
        }
    }
}

impl From<DeviceError> for TcamError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

impl From<TcamError> for CfaError {
    fn from(err: TcamError) -> Self {
        match err {
            TcamError::Device(e) => e.into(),
            TcamError::NotSupported(..) => Self::NotSupported(format!("{err}")),
            TcamError::NoSpace(..)
            | TcamError::IdsExhausted
            | TcamError::RefOverflow(_) => {
                Self::OutOfSpace(format!("{err}"))
            }
            TcamError::NotAllocated(_) => Self::NotAllocated(format!("{err}")),
            TcamError::NotBound(..)
            | TcamError::BadRange { .. }
            | TcamError::BadKeySize { .. }
            | TcamError::BadLength { .. } => {
                Self::InvalidArgument(format!("{err}"))
            }
        }
    }
}

/// Where an entry currently lives. The table is implied by the row
/// and slot holding the entry's ID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct EntryDesc {
    row: u16,
    slot: u8,
    ref_cnt: u8,
}

type DirTables = [Option<TcamTable>; TCAM_TBL_TYPES];

pub struct TcamMgr {
    tables: [DirTables; 2],
    entries: Vec<Option<EntryDesc>>,
    session_bmp: BitPool,
}

impl TcamMgr {
    /// Create a manager for every TCAM `family` has, handing out at
    /// most `max_entries` entry IDs. No rows are managed until
    /// [`TcamMgr::bind()`].
    pub fn init(family: DevFamily, max_entries: u16) -> Self {
        let shapes: Vec<_> = TcamTblType::ALL
            .iter()
            .filter_map(|t| tcam_shape(family, *t).map(|s| (*t, s)))
            .collect();
        Self::with_shapes(&shapes, max_entries)
    }

    /// Create a manager for the given table shapes.
    pub fn with_shapes(
        shapes: &[(TcamTblType, TcamShape)],
        max_entries: u16,
    ) -> Self {
        let mut tables: [DirTables; 2] = Default::default();
        for dir_tables in &mut tables {
            for (tbl, shape) in shapes {
                dir_tables[tbl.idx()] = Some(TcamTable::new(*tbl, *shape));
            }
        }

        Self {
            tables,
            entries: vec![None; max_entries as usize],
            session_bmp: BitPool::new(max_entries as u32, true),
        }
    }

    /// Manage the TCAM rows granted in `resv` for `dir`. Reservations
    /// of other resource types are ignored.
    pub fn bind(
        &mut self,
        dir: Direction,
        resv: &[Reservation],
    ) -> Result<(), TcamError> {
        for r in resv {
            let ResourceType::Tcam(tbl) = r.rtype else {
                continue;
            };

            self.tables[dir.idx()][tbl.idx()]
                .as_mut()
                .ok_or(TcamError::NotSupported(dir, tbl))?
                .bind(r.start, r.stride)?;
        }
        Ok(())
    }

    /// Free every live entry, invalidate every row in use, and stop
    /// managing all ranges. Device failures are logged and skipped.
    pub fn unbind(&mut self, dev: &mut dyn Device, log: &dyn LogProvider) {
        let mut next = 0;
        while let Some(id) = self.session_bmp.find_next_in_use_and_free(next)
        {
            self.entries[id as usize] = None;
            next = id + 1;
        }

        for dir in Direction::ALL {
            for table in self.tables[dir.idx()].iter_mut().flatten() {
                if !table.is_bound() {
                    continue;
                }

                let mut ctx = TableCtx::new(dir, table, &mut self.entries, dev);
                for r in ctx.table.range() {
                    if !ctx.table.row(r).is_in_use() {
                        continue;
                    }
                    if let Err(e) = ctx.invalidate_row(r) {
                        log.log(
                            LogLevel::Warn,
                            &format!(
                                "TCAM unbind: {dir} {} row {r}: {e}",
                                ctx.table.tbl
                            ),
                        );
                    }
                }
                table.unbind();
            }
        }
    }

    /// The table types currently managed in each direction.
    pub fn qcaps(&self) -> TcamQcaps {
        let mask = |dir: Direction| {
            self.tables[dir.idx()]
                .iter()
                .flatten()
                .filter(|t| t.is_bound())
                .fold(0, |m, t| m | t.tbl.cap_bit())
        };

        TcamQcaps {
            ingress: mask(Direction::Ingress),
            egress: mask(Direction::Egress),
        }
    }

    pub fn table(
        &self,
        dir: Direction,
        tbl: TcamTblType,
    ) -> Result<&TcamTable, TcamError> {
        let table = self.tables[dir.idx()][tbl.idx()]
            .as_ref()
            .ok_or(TcamError::NotSupported(dir, tbl))?;
        if !table.is_bound() {
            return Err(TcamError::NotBound(dir, tbl));
        }
        Ok(table)
    }

    // Split the borrow of the manager so that a table and the entry
    // descriptors can be changed together.
    fn ctx<'a>(
        &'a mut self,
        dir: Direction,
        tbl: TcamTblType,
        dev: &'a mut dyn Device,
    ) -> Result<(TableCtx<'a>, &'a mut BitPool), TcamError> {
        let table = self.tables[dir.idx()][tbl.idx()]
            .as_mut()
            .ok_or(TcamError::NotSupported(dir, tbl))?;
        if !table.is_bound() {
            return Err(TcamError::NotBound(dir, tbl));
        }

        let ctx = TableCtx::new(dir, table, &mut self.entries, dev);
        Ok((ctx, &mut self.session_bmp))
    }

    /// Allocate an entry for a key of `key_size` bits at `priority`.
    ///
    /// The entry is placed but not programmed; hardware is only
    /// touched here to move other rows out of the way.
    pub fn alloc(
        &mut self,
        dev: &mut dyn Device,
        dir: Direction,
        tbl: TcamTblType,
        key_size: u16,
        priority: u16,
    ) -> Result<EntryId, TcamError> {
        let (mut ctx, ids) = self.ctx(dir, tbl, dev)?;
        let num_slices = ctx.table.slices_for_key(key_size.div_ceil(8))?;
        let id = ids.alloc().map_err(|_| TcamError::IdsExhausted)?;
        let id = EntryId(id as u16);

        match ctx.place(num_slices, priority) {
            Ok((row, slot)) => {
                ctx.install(row, slot, id, num_slices, priority);
                Ok(id)
            }
            Err(e) => {
                // The ID was allocated just above.
                let freed = ids.free(id.0 as u32);
                debug_assert!(freed.is_ok(), "TCAM entry {id}: {freed:?}");
                Err(e)
            }
        }
    }

    /// Take another reference on `id`; it is only freed once every
    /// reference has been released.
    pub fn add_ref(&mut self, id: EntryId) -> Result<u8, TcamError> {
        let desc = self
            .entries
            .get_mut(id.0 as usize)
            .and_then(|d| d.as_mut())
            .ok_or(TcamError::NotAllocated(id))?;
        desc.ref_cnt =
            desc.ref_cnt.checked_add(1).ok_or(TcamError::RefOverflow(id))?;
        Ok(desc.ref_cnt)
    }

    fn desc(&self, id: EntryId) -> Result<EntryDesc, TcamError> {
        self.entries
            .get(id.0 as usize)
            .copied()
            .flatten()
            .ok_or(TcamError::NotAllocated(id))
    }

    // The table type holding `id`, checking `tbl` if the caller named
    // one.
    fn locate(
        &self,
        dir: Direction,
        tbl: Option<TcamTblType>,
        id: EntryId,
    ) -> Result<(TcamTblType, EntryDesc), TcamError> {
        let desc = self.desc(id)?;
        let holds = |t: TcamTblType| {
            self.tables[dir.idx()][t.idx()]
                .as_ref()
                .is_some_and(|table| table.holds(desc.row, desc.slot, id))
        };

        let found = match tbl {
            Some(t) => Some(t).filter(|t| holds(*t)),
            None => TcamTblType::ALL.into_iter().find(|t| holds(*t)),
        };
        found.map(|t| (t, desc)).ok_or(TcamError::NotAllocated(id))
    }

    /// Release one reference on `id`, returning how many remain.
    ///
    /// When the last reference goes, the entry's slot is invalidated
    /// and the table is compacted. With `tbl` of `None` the table is
    /// found from the ID.
    pub fn free(
        &mut self,
        dev: &mut dyn Device,
        dir: Direction,
        tbl: Option<TcamTblType>,
        id: EntryId,
    ) -> Result<u8, TcamError> {
        let (tbl, desc) = self.locate(dir, tbl, id)?;
        if desc.ref_cnt > 1 {
            let remaining = desc.ref_cnt - 1;
            if let Some(d) = self.entries[id.0 as usize].as_mut() {
                d.ref_cnt = remaining;
            }
            return Ok(remaining);
        }

        let (mut ctx, ids) = self.ctx(dir, tbl, dev)?;
        let priority = ctx.table.row(desc.row).priority();
        let released = ctx.release(desc.row, desc.slot);
        ids.free(id.0 as u32).map_err(|_| TcamError::NotAllocated(id))?;
        released?;
        ctx.reclaim(desc.row, priority)?;
        Ok(0)
    }

    /// Program `id` with a key, mask and result.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &self,
        dev: &mut dyn Device,
        dir: Direction,
        tbl: TcamTblType,
        id: EntryId,
        key: &[u8],
        mask: &[u8],
        result: &[u8],
    ) -> Result<(), TcamError> {
        let (tbl, desc) = self.locate(dir, Some(tbl), id)?;
        let table = self.table(dir, tbl)?;
        let entry_size = table.row(desc.row).entry_size();

        let max_key = table.key_size(entry_size);
        let max_result = table.shape.result_size as usize;
        if key.len() > max_key {
            return Err(TcamError::BadLength {
                what: "key",
                len: key.len(),
                max: max_key,
            });
        }
        if mask.len() != key.len() {
            return Err(TcamError::BadLength {
                what: "mask",
                len: mask.len(),
                max: key.len(),
            });
        }
        if result.len() > max_result {
            return Err(TcamError::BadLength {
                what: "result",
                len: result.len(),
                max: max_result,
            });
        }

        let index = table.hw_index(desc.row, desc.slot, entry_size);
        let hcapi = table.shape.hcapi_type;
        dev.tcam_set(dir, hcapi, index, key, mask, result)?;
        Ok(())
    }

    /// Read back the key, mask and result of `id`.
    pub fn get(
        &self,
        dev: &mut dyn Device,
        dir: Direction,
        tbl: TcamTblType,
        id: EntryId,
    ) -> Result<TcamRecord, TcamError> {
        let (tbl, desc) = self.locate(dir, Some(tbl), id)?;
        let table = self.table(dir, tbl)?;
        let entry_size = table.row(desc.row).entry_size();
        let index = table.hw_index(desc.row, desc.slot, entry_size);
        Ok(dev.tcam_get(dir, table.shape.hcapi_type, index)?)
    }

    /// The row and slot `id` currently occupies.
    pub fn location(&self, id: EntryId) -> Option<(u16, u8)> {
        self.desc(id).ok().map(|d| (d.row, d.slot))
    }

    pub fn ref_count(&self, id: EntryId) -> Option<u8> {
        self.desc(id).ok().map(|d| d.ref_cnt)
    }

    pub fn used_entries(&self, dir: Direction, tbl: TcamTblType) -> u16 {
        self.table(dir, tbl).map(|t| t.used_entries()).unwrap_or(0)
    }

    /// The number of entry IDs in use across all tables.
    pub fn live_ids(&self) -> u32 {
        self.session_bmp.in_use_count()
    }

    pub fn dump(
        &self,
        dir: Direction,
        tbl: TcamTblType,
    ) -> Result<DumpTcamResp, TcamError> {
        self.table(dir, tbl).map(|t| t.dump(dir))
    }

    /// Verify every table's layout and that the entry descriptors
    /// agree with the rows.
    #[cfg(any(test, feature = "test-help"))]
    pub fn check(&self) -> Result<(), alloc::string::String> {
        let mut placed = 0;
        for dir in Direction::ALL {
            for table in self.tables[dir.idx()].iter().flatten() {
                table.check()?;
                for r in table.range().filter(|_| table.is_bound()) {
                    let row = table.row(r);
                    for slot in 0..row.slots(table.max_slices()) {
                        let Some(id) = row.entry(slot) else {
                            continue;
                        };
                        if self.location(id) != Some((r, slot)) {
                            return Err(format!(
                                "{dir} {}: entry {id} at row {r} slot {slot} \
                                 but recorded at {:?}",
                                table.tbl,
                                self.location(id)
                            ));
                        }
                        placed += 1;
                    }
                }
            }
        }

        if placed != self.live_ids() {
            return Err(format!(
                "{placed} entries placed, {} IDs live",
                self.live_ids()
            ));
        }
        Ok(())
    }
}
