// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The SRAM slice manager.
//!
//! The resource manager leases SRAM in 64-byte blocks, one resource
//! type per bank. This module carves those blocks into 8, 16, 32 or
//! 64-byte slices. Each direction, bank and slice size keeps its own
//! list of blocks; a block only ever holds slices of one size.
//!
//! An SRAM offset is expressed in 8-byte units:
//!
//! ```text
//! offset = ((block_id + bank_base) << 3) + slice_offset
//! ```
//!
//! The list is kept so that its head is never full when any block in
//! it has room: new blocks go to the head, and a block that gains a
//! free slice moves to the head. Allocation therefore only ever needs
//! to look at `first_not_full`.

use super::rm::ResourceMgr;
use super::rm::RmError;
use crate::api::CfaError;
use crate::api::Direction;
use crate::api::DumpSramResp;
use crate::api::ResourceType;
use crate::api::SRAM_BANKS;
use crate::api::SliceSize;
use crate::api::SramBank;
use crate::api::SramBlockDump;
use crate::bit_on;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use alloc::collections::VecDeque;
use core::fmt;
use core::fmt::Display;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SramError {
    /// The offset falls outside the bank.
    BadOffset(u32),
    /// The offset is not aligned to the slice size.
    Misaligned { offset: u32, size: SliceSize },
    BlockTooLarge(u32),
    /// The offset's block is not in the list.
    NotAllocated(u32),
    DoubleFree(u32),
    Rm(RmError),
}

impl Display for SramError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadOffset(off) => write!(f, "offset {off:#x} outside bank"),
            Self::Misaligned { offset, size } => {
                write!(f, "offset {offset:#x} not aligned to {size}")
            }
            Self::BlockTooLarge(id) => write!(f, "block {id} out of range"),
            Self::NotAllocated(off) => {
                write!(f, "offset {off:#x} not allocated")
            }
            Self::DoubleFree(off) => write!(f, "offset {off:#x} already free"),
            Self::Rm(e) => write!(f, "{e}"),
        }
    }
}

impl From<RmError> for SramError {
    fn from(err: RmError) -> Self {
        Self::Rm(err)
    }
}

impl From<SramError> for CfaError {
    fn from(err: SramError) -> Self {
        match err {
            SramError::Rm(e) => e.into(),
            SramError::NotAllocated(_) => Self::NotAllocated(format!("{err}")),
            SramError::DoubleFree(_) => Self::DoubleFree(format!("{err}")),
            _ => Self::InvalidArgument(format!("{err}")),
        }
    }
}

/// Compute the SRAM offset of a slice.
pub fn sram_offset(bank: SramBank, block_id: u16, slice_units: u8) -> u32 {
    ((block_id as u32 + bank.base()) << 3) + slice_units as u32
}

// The block ID of `block` within `bank`, if the bank has such a block.
// Every bank but the last ends where the next one begins.
fn bank_block(bank: SramBank, block: u32) -> Option<u16> {
    let next_base = SramBank::new(bank.id() + 1).map(|b| b.base());
    if next_base.is_some_and(|nb| block >= nb - bank.base()) {
        return None;
    }
    u16::try_from(block).ok()
}

/// Split an SRAM offset into its block and its slice offset within the
/// block, both relative to `bank`.
pub fn split_offset(
    bank: SramBank,
    offset: u32,
) -> Result<(u16, u8), SramError> {
    let block_id = (offset >> 3)
        .checked_sub(bank.base())
        .and_then(|block| bank_block(bank, block))
        .ok_or(SramError::BadOffset(offset))?;
    Ok((block_id, (offset & 0x7) as u8))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Block {
    id: u16,
    in_use: u8,
}

#[derive(Clone, Debug, Default)]
struct SliceList {
    blocks: VecDeque<Block>,
    first_not_full: Option<u16>,
}

impl SliceList {
    fn position(&self, id: u16) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    fn refresh(&mut self, size: SliceSize) {
        let full = size.full_mask();
        self.first_not_full =
            self.blocks.iter().find(|b| b.in_use & full != full).map(|b| b.id);
    }
}

type BankLists = [SliceList; 4];

/// Slice lists for every direction, bank and slice size.
#[derive(Debug, Default)]
pub struct SramMgr {
    lists: [[BankLists; SRAM_BANKS]; 2],
}

impl SramMgr {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(
        &self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
    ) -> &SliceList {
        &self.lists[dir.idx()][bank.idx()][size.idx()]
    }

    fn list_mut(
        &mut self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
    ) -> &mut SliceList {
        &mut self.lists[dir.idx()][bank.idx()][size.idx()]
    }

    /// Allocate one slice, taking a new block from `rm` when every
    /// block in the list is full.
    pub fn alloc(
        &mut self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
        rm: &mut dyn ResourceMgr,
    ) -> Result<u32, SramError> {
        let list = self.list_mut(dir, bank, size);

        let pos = match list.first_not_full.and_then(|id| list.position(id)) {
            Some(pos) => pos,
            None => {
                let rtype = ResourceType::SramBank(bank);
                let idx = rm.alloc(dir, rtype)?;
                let Some(id) = bank_block(bank, idx) else {
                    rm.free(dir, rtype, idx)?;
                    return Err(SramError::BlockTooLarge(idx));
                };
                list.blocks.push_front(Block { id, in_use: 0 });
                0
            }
        };

        let blk = &mut list.blocks[pos];
        let slot = (!blk.in_use & size.full_mask()).trailing_zeros() as u8;
        blk.in_use |= bit_on(slot);
        let offset = sram_offset(bank, blk.id, slot << size.shift());
        list.refresh(size);
        Ok(offset)
    }

    fn locate(
        &self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
        offset: u32,
    ) -> Result<(usize, u8), SramError> {
        let (block_id, units) = split_offset(bank, offset)?;
        if units % size.units() != 0 {
            return Err(SramError::Misaligned { offset, size });
        }

        let pos = self
            .list(dir, bank, size)
            .position(block_id)
            .ok_or(SramError::NotAllocated(offset))?;
        Ok((pos, units >> size.shift()))
    }

    /// Free the slice at `offset`, returning its block to `rm` if it
    /// was the last slice in use.
    pub fn free(
        &mut self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
        offset: u32,
        rm: &mut dyn ResourceMgr,
    ) -> Result<(), SramError> {
        let (pos, slot) = self.locate(dir, bank, size, offset)?;
        let list = self.list_mut(dir, bank, size);

        let blk = list.blocks[pos];
        if blk.in_use & bit_on(slot) == 0 {
            return Err(SramError::DoubleFree(offset));
        }
        let in_use = blk.in_use & !bit_on(slot);

        // An emptied block stays listed until the RM takes it back.
        if in_use == 0 {
            rm.free(dir, ResourceType::SramBank(bank), blk.id as u32)?;
        }
        list.blocks.remove(pos);
        if in_use != 0 {
            list.blocks.push_front(Block { id: blk.id, in_use });
        }
        list.refresh(size);
        Ok(())
    }

    pub fn is_allocated(
        &self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
        offset: u32,
    ) -> Result<bool, SramError> {
        match self.locate(dir, bank, size, offset) {
            Ok((pos, slot)) => {
                let blk = &self.list(dir, bank, size).blocks[pos];
                Ok(blk.in_use & bit_on(slot) != 0)
            }
            Err(SramError::NotAllocated(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn dump(
        &self,
        dir: Direction,
        bank: SramBank,
        size: SliceSize,
    ) -> DumpSramResp {
        let list = self.list(dir, bank, size);
        DumpSramResp {
            dir,
            bank,
            slice_size: size,
            first_not_full: list.first_not_full,
            blocks: list
                .blocks
                .iter()
                .map(|b| SramBlockDump {
                    block_id: b.id,
                    in_use_mask: b.in_use,
                })
                .collect(),
        }
    }

    /// Return every block to `rm`, regardless of the slices still in
    /// use. Failures are logged and skipped.
    pub fn unbind(&mut self, rm: &mut dyn ResourceMgr, log: &dyn LogProvider) {
        for dir in Direction::ALL {
            for bank in SramBank::ALL {
                for size in SliceSize::ALL {
                    let list = self.list_mut(dir, bank, size);
                    let blocks: VecDeque<Block> =
                        core::mem::take(&mut list.blocks);
                    list.first_not_full = None;

                    for blk in blocks {
                        let rtype = ResourceType::SramBank(bank);
                        if let Err(e) = rm.free(dir, rtype, blk.id as u32) {
                            let msg = format!(
                                "SRAM unbind: {size} block {}: {e}",
                                blk.id
                            );
                            log.log(LogLevel::Warn, &msg);
                        }
                    }
                }
            }
        }
    }

    /// Verify that no block is empty and that `first_not_full` names
    /// the first block with a free slice.
    #[cfg(any(test, feature = "test-help"))]
    pub fn check(&self) -> Result<(), alloc::string::String> {
        for dir in Direction::ALL {
            for bank in SramBank::ALL {
                for size in SliceSize::ALL {
                    let list = self.list(dir, bank, size);
                    let full = size.full_mask();
                    let what = format!("{dir} {bank} {size}");
                    for b in list.blocks.iter() {
                        if b.in_use == 0 {
                            return Err(format!("{what}: block {} empty", b.id));
                        }
                        if b.in_use & !full != 0 {
                            let id = b.id;
                            return Err(format!("{what}: block {id} bad mask"));
                        }
                    }

                    let expect = list
                        .blocks
                        .iter()
                        .find(|b| b.in_use != full)
                        .map(|b| b.id);
                    if list.first_not_full != expect {
                        return Err(format!(
                            "{what}: first_not_full {:?}, expected {expect:?}",
                            list.first_not_full,
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Reservation;
    use crate::engine::rm::ResourceDb;

    const BANK1: SramBank = SramBank::ALL[1];

    fn rm() -> ResourceDb {
        let mut db = ResourceDb::new();
        db.add_reservations(
            Direction::Ingress,
            &[Reservation {
                rtype: ResourceType::SramBank(BANK1),
                start: 0,
                stride: 8,
            }],
        )
        .unwrap();
        db
    }

    #[test]
    fn sixteen_byte_slices_reuse_freed_slot() {
        let mut rm = rm();
        let mut sram = SramMgr::new();
        let dir = Direction::Ingress;
        let base = 2048 << 3;

        let offs: Vec<u32> = (0..4)
            .map(|_| sram.alloc(dir, BANK1, SliceSize::S16, &mut rm).unwrap())
            .collect();
        assert_eq!(offs, vec![base, base + 2, base + 4, base + 6]);

        let fifth = sram.alloc(dir, BANK1, SliceSize::S16, &mut rm).unwrap();
        assert_eq!(fifth, (2049 << 3));
        assert_eq!(rm.in_use(dir, ResourceType::SramBank(BANK1)), 2);

        sram.free(dir, BANK1, SliceSize::S16, base + 4, &mut rm).unwrap();
        sram.check().unwrap();
        assert_eq!(
            sram.alloc(dir, BANK1, SliceSize::S16, &mut rm),
            Ok(base + 4)
        );
        sram.check().unwrap();
    }

    #[test]
    fn empty_block_goes_back_to_rm() {
        let mut rm = rm();
        let mut sram = SramMgr::new();
        let dir = Direction::Ingress;
        let rtype = ResourceType::SramBank(BANK1);

        let off = sram.alloc(dir, BANK1, SliceSize::S64, &mut rm).unwrap();
        assert_eq!(rm.in_use(dir, rtype), 1);
        let s64 = SliceSize::S64;
        assert_eq!(sram.is_allocated(dir, BANK1, s64, off), Ok(true));

        sram.free(dir, BANK1, SliceSize::S64, off, &mut rm).unwrap();
        assert_eq!(rm.in_use(dir, rtype), 0);
        assert_eq!(sram.is_allocated(dir, BANK1, s64, off), Ok(false));
        assert_eq!(
            sram.free(dir, BANK1, SliceSize::S64, off, &mut rm),
            Err(SramError::NotAllocated(off))
        );
        sram.check().unwrap();
    }

    #[test]
    fn bad_offsets() {
        let mut rm = rm();
        let mut sram = SramMgr::new();
        let dir = Direction::Ingress;

        let a = sram.alloc(dir, BANK1, SliceSize::S32, &mut rm).unwrap();
        let b = sram.alloc(dir, BANK1, SliceSize::S32, &mut rm).unwrap();
        assert_eq!(b, a + 4);

        assert_eq!(
            sram.free(dir, BANK1, SliceSize::S32, a + 2, &mut rm),
            Err(SramError::Misaligned { offset: a + 2, size: SliceSize::S32 })
        );
        assert_eq!(
            sram.free(dir, BANK1, SliceSize::S32, 8, &mut rm),
            Err(SramError::BadOffset(8))
        );

        sram.free(dir, BANK1, SliceSize::S32, a, &mut rm).unwrap();
        assert_eq!(
            sram.free(dir, BANK1, SliceSize::S32, a, &mut rm),
            Err(SramError::DoubleFree(a))
        );
    }

    #[test]
    fn block_exhaustion() {
        let mut rm = rm();
        let mut sram = SramMgr::new();
        let dir = Direction::Ingress;

        for _ in 0..8 {
            sram.alloc(dir, BANK1, SliceSize::S64, &mut rm).unwrap();
        }
        assert!(matches!(
            sram.alloc(dir, BANK1, SliceSize::S64, &mut rm),
            Err(SramError::Rm(RmError::Exhausted(..)))
        ));
        sram.check().unwrap();

        sram.unbind(&mut rm, &crate::provider::NullLog);
        assert_eq!(rm.in_use(dir, ResourceType::SramBank(BANK1)), 0);
        assert!(sram.dump(dir, BANK1, SliceSize::S64).blocks.is_empty());
    }

    #[test]
    fn lease_past_bank_end() {
        let bank0 = SramBank::ALL[0];
        let rtype = ResourceType::SramBank(bank0);
        let dir = Direction::Ingress;
        let mut rm = ResourceDb::new();
        rm.add_reservations(
            dir,
            &[Reservation { rtype, start: 0, stride: 2049 }],
        )
        .unwrap();
        let mut sram = SramMgr::new();

        for _ in 0..2048 {
            sram.alloc(dir, bank0, SliceSize::S64, &mut rm).unwrap();
        }
        assert_eq!(
            sram.alloc(dir, bank0, SliceSize::S64, &mut rm),
            Err(SramError::BlockTooLarge(2048))
        );
        assert_eq!(rm.in_use(dir, rtype), 2048);
        let past = 2048 << 3;
        assert_eq!(split_offset(bank0, past), Err(SramError::BadOffset(past)));

        let last = 2047 << 3;
        sram.free(dir, bank0, SliceSize::S64, last, &mut rm).unwrap();
        assert_eq!(rm.in_use(dir, rtype), 2047);
        sram.check().unwrap();
    }

    // Delegates to a resource DB, refusing frees on demand.
    struct RefusingRm {
        db: ResourceDb,
        refuse: bool,
    }

    impl ResourceMgr for RefusingRm {
        fn alloc(
            &mut self,
            dir: Direction,
            rtype: ResourceType,
        ) -> Result<u32, RmError> {
            self.db.alloc(dir, rtype)
        }

        fn free(
            &mut self,
            dir: Direction,
            rtype: ResourceType,
            index: u32,
        ) -> Result<(), RmError> {
            if self.refuse {
                return Err(RmError::BadIndex(dir, rtype, index));
            }
            self.db.free(dir, rtype, index)
        }

        fn is_allocated(
            &self,
            dir: Direction,
            rtype: ResourceType,
            index: u32,
        ) -> Result<bool, RmError> {
            self.db.is_allocated(dir, rtype, index)
        }

        fn reservation(
            &self,
            dir: Direction,
            rtype: ResourceType,
        ) -> Option<Reservation> {
            self.db.reservation(dir, rtype)
        }
    }

    #[test]
    fn refused_block_return_keeps_slice() {
        let mut rm = RefusingRm { db: rm(), refuse: false };
        let mut sram = SramMgr::new();
        let dir = Direction::Ingress;
        let s32 = SliceSize::S32;

        let off = sram.alloc(dir, BANK1, s32, &mut rm).unwrap();
        rm.refuse = true;
        assert!(matches!(
            sram.free(dir, BANK1, s32, off, &mut rm),
            Err(SramError::Rm(RmError::BadIndex(..)))
        ));
        assert_eq!(sram.is_allocated(dir, BANK1, s32, off), Ok(true));
        assert_eq!(sram.dump(dir, BANK1, s32).blocks.len(), 1);
        sram.check().unwrap();

        rm.refuse = false;
        sram.free(dir, BANK1, s32, off, &mut rm).unwrap();
        assert_eq!(rm.db.in_use(dir, ResourceType::SramBank(BANK1)), 0);
        assert!(sram.dump(dir, BANK1, s32).blocks.is_empty());
        sram.check().unwrap();
    }
}
