// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Resource types, requests and reservations.

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The highest TCAM priority.
///
/// Entries with a larger priority value are placed in lower-indexed
/// rows and therefore match first. Entries of this priority form a
/// contiguous band at the top of a table.
pub const TCAM_PRIORITY_MAX: u16 = u16::MAX;

/// The number of logical TCAM table types.
pub const TCAM_TBL_TYPES: usize = 7;

/// The number of SRAM banks.
pub const SRAM_BANKS: usize = 4;

/// The base block of each SRAM bank, in 64-byte blocks.
pub const SRAM_BANK_BASE: [u32; SRAM_BANKS] = [0, 2048, 4096, 6144];

/// A logical TCAM table type.
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
pub enum TcamTblType {
    L2CtxtHigh,
    L2CtxtLow,
    ProfTcam,
    Wc,
    SpTcam,
    CtRule,
    Veb,
}

impl TcamTblType {
    pub const ALL: [TcamTblType; TCAM_TBL_TYPES] = [
        TcamTblType::L2CtxtHigh,
        TcamTblType::L2CtxtLow,
        TcamTblType::ProfTcam,
        TcamTblType::Wc,
        TcamTblType::SpTcam,
        TcamTblType::CtRule,
        TcamTblType::Veb,
    ];

    pub const fn idx(self) -> usize {
        self as usize
    }

    /// The bit representing this table type in a capability mask.
    pub const fn cap_bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl Display for TcamTblType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::L2CtxtHigh => "l2-ctxt-high",
            Self::L2CtxtLow => "l2-ctxt-low",
            Self::ProfTcam => "prof-tcam",
            Self::Wc => "wc",
            Self::SpTcam => "sp-tcam",
            Self::CtRule => "ct-rule",
            Self::Veb => "veb",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TcamTblType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| format!("{t}") == s)
            .ok_or_else(|| format!("invalid TCAM table type: {s}"))
    }
}

/// One of the four SRAM banks.
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
pub struct SramBank(u8);

impl SramBank {
    pub const ALL: [SramBank; SRAM_BANKS] =
        [SramBank(0), SramBank(1), SramBank(2), SramBank(3)];

    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < SRAM_BANKS { Some(Self(id)) } else { None }
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    /// The first 64-byte block of this bank in the global SRAM space.
    pub const fn base(self) -> u32 {
        SRAM_BANK_BASE[self.0 as usize]
    }
}

impl Display for SramBank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bank{}", self.0)
    }
}

/// The size of an SRAM slice carved from a 64-byte block.
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
pub enum SliceSize {
    S8 = 0,
    S16 = 1,
    S32 = 2,
    S64 = 3,
}

impl SliceSize {
    pub const ALL: [SliceSize; 4] =
        [SliceSize::S8, SliceSize::S16, SliceSize::S32, SliceSize::S64];

    pub const fn idx(self) -> usize {
        self as usize
    }

    pub const fn bytes(self) -> u32 {
        8 << (self as u32)
    }

    /// The slice size in 8-byte offset units.
    pub const fn units(self) -> u8 {
        1 << (self as u8)
    }

    /// How many slices of this size fit in one block.
    pub const fn per_block(self) -> u8 {
        8 >> (self as u8)
    }

    /// The in-use mask of a block holding only slices of this size,
    /// with every slice taken.
    pub const fn full_mask(self) -> u8 {
        match self {
            Self::S8 => 0xFF,
            Self::S16 => 0x0F,
            Self::S32 => 0x03,
            Self::S64 => 0x01,
        }
    }

    /// The shift converting an offset in 8-byte units to a slice
    /// number within its block.
    pub const fn shift(self) -> u8 {
        match self {
            Self::S8 | Self::S64 => 0,
            Self::S16 => 1,
            Self::S32 => 2,
        }
    }
}

impl Display for SliceSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}B", self.bytes())
    }
}

/// The device family a session manages.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum DevFamily {
    #[default]
    P4,
    P5,
}

impl Display for DevFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::P4 => "P4",
            Self::P5 => "P5",
        };
        write!(f, "{s}")
    }
}

/// A class of hardware resource leased from firmware.
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
pub enum ResourceType {
    Tcam(TcamTblType),
    SramBank(SramBank),
    EmRecord,
    FullAction,
    Encap,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcam(t) => write!(f, "tcam-{t}"),
            Self::SramBank(b) => write!(f, "sram-{b}"),
            Self::EmRecord => write!(f, "em-record"),
            Self::FullAction => write!(f, "full-action"),
            Self::Encap => write!(f, "encap"),
        }
    }
}

/// A request for a number of resources of one type.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceReq {
    pub rtype: ResourceType,
    pub min: u16,
    pub max: u16,
}

impl ResourceReq {
    pub const fn new(rtype: ResourceType, count: u16) -> Self {
        Self { rtype, min: count, max: count }
    }
}

/// A contiguous range of indices granted by firmware for one
/// resource type in one direction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Reservation {
    pub rtype: ResourceType,
    pub start: u32,
    pub stride: u32,
}

impl Reservation {
    /// One past the last index of this reservation.
    pub const fn end(&self) -> u32 {
        self.start + self.stride
    }

    pub const fn contains(&self, index: u32) -> bool {
        index >= self.start && index < self.end()
    }
}

/// The capability of firmware to grant one resource type.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceCap {
    pub rtype: ResourceType,
    pub min: u16,
    pub max: u16,
}

/// How firmware hands out reservations.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ResvStrategy {
    #[default]
    Static,
    Dynamic,
}

/// The table types a TCAM manager is managing in each direction, as
/// masks of [`TcamTblType::cap_bit`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TcamQcaps {
    pub ingress: u32,
    pub egress: u32,
}

impl TcamQcaps {
    pub fn supports(&self, dir: super::Direction, tbl: TcamTblType) -> bool {
        let mask = match dir {
            super::Direction::Ingress => self.ingress,
            super::Direction::Egress => self.egress,
        };
        mask & tbl.cap_bit() != 0
    }
}
