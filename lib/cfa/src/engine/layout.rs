// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Per-family hardware layout.
//!
//! Each device family numbers its resource types differently on the
//! wire and shapes its TCAMs differently. Everything family-specific
//! the engine needs lives here.

use crate::api::DevFamily;
use crate::api::ResourceType;
use crate::api::SramBank;
use crate::api::TcamTblType;

/// The physical shape of one TCAM table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcamShape {
    /// The firmware resource type of the table.
    pub hcapi_type: u16,
    /// Slices per row; a power of two no larger than 8.
    pub max_slices: u8,
    /// Key bytes per row, across all slices.
    pub row_width: u8,
    pub result_size: u8,
    pub num_rows: u16,
}

impl TcamShape {
    pub const fn slice_width(&self) -> u8 {
        self.row_width / self.max_slices
    }
}

const fn shape(
    hcapi_type: u16,
    max_slices: u8,
    row_width: u8,
    result_size: u8,
    num_rows: u16,
) -> Option<TcamShape> {
    Some(TcamShape { hcapi_type, max_slices, row_width, result_size, num_rows })
}

/// The shape of `tbl` on `family`, if the family has such a table.
pub fn tcam_shape(family: DevFamily, tbl: TcamTblType) -> Option<TcamShape> {
    use TcamTblType::*;

    let hcapi = hcapi_type(family, ResourceType::Tcam(tbl))?;
    match (family, tbl) {
        (_, L2CtxtHigh | L2CtxtLow) => shape(hcapi, 1, 24, 8, 1024),
        (_, ProfTcam) => shape(hcapi, 1, 8, 8, 256),
        (DevFamily::P4, Wc) => shape(hcapi, 4, 80, 4, 2048),
        (DevFamily::P5, Wc) => shape(hcapi, 8, 96, 4, 1024),
        (DevFamily::P4, SpTcam | CtRule) => shape(hcapi, 1, 16, 8, 512),
        (DevFamily::P4, Veb) => shape(hcapi, 1, 16, 8, 128),
        (DevFamily::P5, SpTcam | CtRule | Veb) => None,
    }
}

/// The firmware type number of `rtype` on `family`.
pub fn hcapi_type(family: DevFamily, rtype: ResourceType) -> Option<u16> {
    use TcamTblType::*;

    match (family, rtype) {
        (_, ResourceType::Tcam(L2CtxtHigh)) => Some(0x00),
        (_, ResourceType::Tcam(L2CtxtLow)) => Some(0x01),
        (_, ResourceType::Tcam(ProfTcam)) => Some(0x02),
        (_, ResourceType::Tcam(Wc)) => Some(0x03),
        (DevFamily::P4, ResourceType::Tcam(SpTcam)) => Some(0x04),
        (DevFamily::P4, ResourceType::Tcam(CtRule)) => Some(0x05),
        (DevFamily::P4, ResourceType::Tcam(Veb)) => Some(0x06),
        (DevFamily::P5, ResourceType::Tcam(SpTcam | CtRule | Veb)) => None,
        (DevFamily::P4, ResourceType::EmRecord) => Some(0x10),
        (DevFamily::P4, ResourceType::FullAction) => Some(0x11),
        (DevFamily::P4, ResourceType::Encap) => Some(0x12),
        (DevFamily::P4, ResourceType::SramBank(b)) => {
            Some(0x20 + b.id() as u16)
        }
        (DevFamily::P5, ResourceType::EmRecord) => Some(0x08),
        (DevFamily::P5, ResourceType::FullAction) => Some(0x09),
        (DevFamily::P5, ResourceType::Encap) => Some(0x0A),
        (DevFamily::P5, ResourceType::SramBank(b)) => {
            Some(0x0C + b.id() as u16)
        }
    }
}

/// The resource type firmware calls `hcapi` on `family`.
pub fn resource_type(family: DevFamily, hcapi: u16) -> Option<ResourceType> {
    all_resource_types().find(|rt| hcapi_type(family, *rt) == Some(hcapi))
}

pub fn all_resource_types() -> impl Iterator<Item = ResourceType> {
    TcamTblType::ALL
        .into_iter()
        .map(ResourceType::Tcam)
        .chain(SramBank::ALL.into_iter().map(ResourceType::SramBank))
        .chain([
            ResourceType::EmRecord,
            ResourceType::FullAction,
            ResourceType::Encap,
        ])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hcapi_types_are_unique() {
        for family in [DevFamily::P4, DevFamily::P5] {
            for rt in all_resource_types() {
                if let Some(hcapi) = hcapi_type(family, rt) {
                    assert_eq!(resource_type(family, hcapi), Some(rt));
                }
            }
        }
    }

    #[test]
    fn shapes_are_sliceable() {
        for family in [DevFamily::P4, DevFamily::P5] {
            for tbl in TcamTblType::ALL {
                let Some(s) = tcam_shape(family, tbl) else {
                    continue;
                };
                assert!(s.max_slices.is_power_of_two() && s.max_slices <= 8);
                assert_eq!(s.row_width % s.max_slices, 0);
            }
        }
        assert!(tcam_shape(DevFamily::P5, TcamTblType::Veb).is_none());
        assert_eq!(
            tcam_shape(DevFamily::P5, TcamTblType::Wc).map(|s| s.slice_width()),
            Some(12)
        );
    }
}
