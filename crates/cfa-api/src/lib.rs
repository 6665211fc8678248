// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod cmd;
pub mod flow;
pub mod resc;

pub use cfg::*;
pub use cmd::*;
pub use flow::*;
pub use resc::*;

/// The overall version of the API. Anytime a type in this crate is
/// added, removed, or modified, this number should increment. It
/// carries no semantic meaning beyond letting a consumer verify that
/// it was compiled against the same API as the engine.
pub const API_VERSION: u64 = 3;

/// The direction of traffic a table or resource serves.
///
/// Every hardware table exists once per direction, and every
/// reservation, allocation and free is scoped to exactly one of them.
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
pub enum Direction {
    Ingress = 0,
    Egress = 1,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Ingress, Direction::Egress];

    /// The index of this direction in per-direction arrays.
    pub const fn idx(self) -> usize {
        self as usize
    }
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rx" | "ingress" => Ok(Direction::Ingress),
            "tx" | "egress" => Ok(Direction::Egress),
            _ => Err(format!("invalid direction: {}", s)),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::Ingress => "RX",
            Direction::Egress => "TX",
        };

        write!(f, "{}", dirstr)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn direction_from_str() {
        assert_eq!("rx".parse::<Direction>(), Ok(Direction::Ingress));
        assert_eq!("Egress".parse::<Direction>(), Ok(Direction::Egress));
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Egress.to_string(), "TX");
    }
}
