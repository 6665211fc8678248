// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::Direction;
use super::SliceSize;
use super::SramBank;
use super::TcamTblType;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Firmware message opcodes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[repr(u16)]
pub enum FwCmd {
    SessionOpen = 0x01,  // open a firmware session
    SessionClose = 0x02, // close a firmware session
    RescQcaps = 0x10,    // query resource capabilities
    RescAlloc = 0x11,    // reserve resources
    RescInfo = 0x12,     // query existing reservations
    RescFlush = 0x13,    // return reservations
    TcamSet = 0x20,      // program a TCAM entry
    TcamGet = 0x21,      // read back a TCAM entry
    TcamFree = 0x22,     // release a TCAM entry
    EmInsert = 0x30,     // insert an exact-match record
    EmDelete = 0x31,     // delete an exact-match record
    EmMove = 0x32,       // relocate an exact-match record
    TblSet = 0x40,       // write an index table entry
    TblGet = 0x41,       // read an index table entry
}

impl TryFrom<u16> for FwCmd {
    type Error = ();

    fn try_from(num: u16) -> Result<Self, Self::Error> {
        match num {
            0x01 => Ok(Self::SessionOpen),
            0x02 => Ok(Self::SessionClose),
            0x10 => Ok(Self::RescQcaps),
            0x11 => Ok(Self::RescAlloc),
            0x12 => Ok(Self::RescInfo),
            0x13 => Ok(Self::RescFlush),
            0x20 => Ok(Self::TcamSet),
            0x21 => Ok(Self::TcamGet),
            0x22 => Ok(Self::TcamFree),
            0x30 => Ok(Self::EmInsert),
            0x31 => Ok(Self::EmDelete),
            0x32 => Ok(Self::EmMove),
            0x40 => Ok(Self::TblSet),
            0x41 => Ok(Self::TblGet),
            _ => Err(()),
        }
    }
}

/// Errno values reported alongside a [`CfaError`].
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const EOPNOTSUPP: i32 = 95;
    pub const EALREADY: i32 = 114;
}

/// The error type returned by every public operation.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum CfaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of space: {0}")]
    OutOfSpace(String),

    /// A free, get or set named something that is not allocated.
    #[error("not allocated: {0}")]
    NotAllocated(String),

    #[error("double free: {0}")]
    DoubleFree(String),

    /// Firmware or the transport to it reported a failure.
    #[error("device error: {0}")]
    Device(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl CfaError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> i32 {
        use errno::*;

        match self {
            Self::InvalidArgument(_) => EINVAL,
            Self::OutOfSpace(_) => ENOSPC,
            Self::NotAllocated(_) => ENOENT,
            Self::DoubleFree(_) => EALREADY,
            Self::Device(_) => EIO,
            Self::NotSupported(_) => EOPNOTSUPP,
        }
    }
}

/// A marker trait indicating a success response type that may be
/// handed to a consumer of the API.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// The state of one TCAM row.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TcamRowDump {
    pub row: u16,
    pub priority: u16,
    /// Slices occupied by each entry in this row.
    pub entry_size: u8,
    pub inuse: u8,
    /// The entry ID in each slot, in slot order.
    pub entries: Vec<Option<u16>>,
}

/// Dump the rows of one TCAM table, for use in debugging or
/// administrative purposes. Only rows in use are included.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpTcamResp {
    pub dir: Direction,
    pub tbl: TcamTblType,
    pub start_row: u16,
    pub end_row: u16,
    pub max_slices: u8,
    pub used_entries: u16,
    pub max_entries: u16,
    pub rows: Vec<TcamRowDump>,
}

impl CmdOk for DumpTcamResp {}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SramBlockDump {
    pub block_id: u16,
    pub in_use_mask: u8,
}

/// Dump the slice list for one direction, bank and slice size.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpSramResp {
    pub dir: Direction,
    pub bank: SramBank,
    pub slice_size: SliceSize,
    pub first_not_full: Option<u16>,
    /// Blocks in list order.
    pub blocks: Vec<SramBlockDump>,
}

impl CmdOk for DumpSramResp {}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DpoolExtentDump {
    pub index: u32,
    pub size: u32,
}

/// Dump the allocated extents of a dynamic pool.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpDpoolResp {
    pub start_index: u32,
    pub size: u32,
    pub max_alloc: u32,
    pub free: u32,
    pub largest_free: u32,
    pub extents: Vec<DpoolExtentDump>,
}

impl CmdOk for DumpDpoolResp {}
