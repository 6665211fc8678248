// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The resource manager.
//!
//! Firmware grants each session a range of indices per resource type
//! and direction. The resource manager tracks which indices of those
//! ranges the session has handed out.

use super::bitpool::BitPool;
use super::bitpool::BitPoolError;
use crate::api::CfaError;
use crate::api::Direction;
use crate::api::Reservation;
use crate::api::ResourceType;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RmError {
    NoReservation(Direction, ResourceType),
    DuplicateReservation(Direction, ResourceType),
    Exhausted(Direction, ResourceType),
    BadIndex(Direction, ResourceType, u32),
    DoubleFree(Direction, ResourceType, u32),
}

impl Display for RmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoReservation(dir, rt) => {
                write!(f, "no {rt} reservation for {dir}")
            }
            Self::DuplicateReservation(dir, rt) => {
                write!(f, "{rt} already reserved for {dir}")
            }
            Self::Exhausted(dir, rt) => write!(f, "{dir} {rt} exhausted"),
            Self::BadIndex(dir, rt, idx) => {
                write!(f, "{dir} {rt} index {idx} outside reservation")
            }
            Self::DoubleFree(dir, rt, idx) => {
                write!(f, "{dir} {rt} index {idx} already free")
            }
        }
    }
}

impl From<RmError> for CfaError {
    fn from(err: RmError) -> Self {
        match err {
            RmError::Exhausted(..) => Self::OutOfSpace(format!("{err}")),
            RmError::DoubleFree(..) => Self::DoubleFree(format!("{err}")),
            RmError::NoReservation(..) | RmError::BadIndex(..) => {
                Self::NotAllocated(format!("{err}"))
            }
            RmError::DuplicateReservation(..) => {
                Self::InvalidArgument(format!("{err}"))
            }
        }
    }
}

/// Hands out and takes back single indices of leased resources.
pub trait ResourceMgr {
    fn alloc(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Result<u32, RmError>;

    fn free(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
    ) -> Result<(), RmError>;

    fn is_allocated(
        &self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
    ) -> Result<bool, RmError>;

    fn reservation(
        &self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Option<Reservation>;
}

#[derive(Clone, Debug)]
struct Lease {
    resv: Reservation,
    pool: BitPool,
}

/// The reservations held by one session, with an index pool per
/// reservation.
#[derive(Clone, Debug, Default)]
pub struct ResourceDb {
    leases: BTreeMap<(Direction, ResourceType), Lease>,
}

impl ResourceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `resv`, granted for `dir`. Zero-length reservations are
    /// skipped.
    pub fn add_reservations(
        &mut self,
        dir: Direction,
        resv: &[Reservation],
    ) -> Result<(), RmError> {
        for r in resv.iter().filter(|r| r.stride > 0) {
            if self.leases.contains_key(&(dir, r.rtype)) {
                return Err(RmError::DuplicateReservation(dir, r.rtype));
            }

            let lease = Lease { resv: *r, pool: BitPool::new(r.stride, true) };
            self.leases.insert((dir, r.rtype), lease);
        }
        Ok(())
    }

    /// The reservations held for `dir`.
    pub fn reservations(&self, dir: Direction) -> Vec<Reservation> {
        self.leases
            .iter()
            .filter(|((d, _), _)| *d == dir)
            .map(|(_, l)| l.resv)
            .collect()
    }

    /// The reservations to hand back to firmware for `dir`.
    pub fn flush_list(&self, dir: Direction) -> Vec<Reservation> {
        self.reservations(dir)
    }

    pub fn in_use(&self, dir: Direction, rtype: ResourceType) -> u32 {
        self.leases
            .get(&(dir, rtype))
            .map(|l| l.pool.in_use_count())
            .unwrap_or(0)
    }

    /// Every lease with indices still handed out, and how many.
    pub fn leaked(&self) -> Vec<(Direction, ResourceType, u32)> {
        self.leases
            .iter()
            .filter(|(_, l)| l.pool.in_use_count() > 0)
            .map(|((dir, rt), l)| (*dir, *rt, l.pool.in_use_count()))
            .collect()
    }

    fn lease(
        &self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Result<&Lease, RmError> {
        self.leases
            .get(&(dir, rtype))
            .ok_or(RmError::NoReservation(dir, rtype))
    }

    fn lease_mut(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Result<&mut Lease, RmError> {
        self.leases
            .get_mut(&(dir, rtype))
            .ok_or(RmError::NoReservation(dir, rtype))
    }
}

impl ResourceMgr for ResourceDb {
    fn alloc(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Result<u32, RmError> {
        let lease = self.lease_mut(dir, rtype)?;
        let off =
            lease.pool.alloc().map_err(|_| RmError::Exhausted(dir, rtype))?;
        Ok(lease.resv.start + off)
    }

    fn free(
        &mut self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
    ) -> Result<(), RmError> {
        let lease = self.lease_mut(dir, rtype)?;
        if !lease.resv.contains(index) {
            return Err(RmError::BadIndex(dir, rtype, index));
        }

        match lease.pool.free(index - lease.resv.start) {
            Ok(()) => Ok(()),
            Err(BitPoolError::DoubleFree(_)) => {
                Err(RmError::DoubleFree(dir, rtype, index))
            }
            Err(_) => Err(RmError::BadIndex(dir, rtype, index)),
        }
    }

    fn is_allocated(
        &self,
        dir: Direction,
        rtype: ResourceType,
        index: u32,
    ) -> Result<bool, RmError> {
        let lease = self.lease(dir, rtype)?;
        if !lease.resv.contains(index) {
            return Err(RmError::BadIndex(dir, rtype, index));
        }
        Ok(lease.pool.is_in_use(index - lease.resv.start))
    }

    fn reservation(
        &self,
        dir: Direction,
        rtype: ResourceType,
    ) -> Option<Reservation> {
        self.leases.get(&(dir, rtype)).map(|l| l.resv)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::SramBank;
    use crate::api::TcamTblType;

    const WC: ResourceType = ResourceType::Tcam(TcamTblType::Wc);

    fn db() -> ResourceDb {
        let mut db = ResourceDb::new();
        db.add_reservations(
            Direction::Ingress,
            &[
                Reservation { rtype: WC, start: 64, stride: 2 },
                Reservation { rtype: ResourceType::Encap, start: 0, stride: 0 },
            ],
        )
        .unwrap();
        db
    }

    #[test]
    fn alloc_within_lease() {
        let mut db = db();
        let a = db.alloc(Direction::Ingress, WC).unwrap();
        let b = db.alloc(Direction::Ingress, WC).unwrap();
        assert_eq!((a, b), (64, 65));
        assert_eq!(
            db.alloc(Direction::Ingress, WC),
            Err(RmError::Exhausted(Direction::Ingress, WC))
        );
        assert_eq!(db.in_use(Direction::Ingress, WC), 2);

        db.free(Direction::Ingress, WC, 64).unwrap();
        assert_eq!(db.is_allocated(Direction::Ingress, WC, 64), Ok(false));
        assert_eq!(
            db.free(Direction::Ingress, WC, 64),
            Err(RmError::DoubleFree(Direction::Ingress, WC, 64))
        );
        assert_eq!(db.leaked(), vec![(Direction::Ingress, WC, 1)]);
    }

    #[test]
    fn missing_and_empty_reservations() {
        let mut db = db();
        let bank = ResourceType::SramBank(SramBank::ALL[0]);
        assert_eq!(
            db.alloc(Direction::Egress, WC),
            Err(RmError::NoReservation(Direction::Egress, WC))
        );
        assert!(db.reservation(Direction::Ingress, bank).is_none());
        assert!(
            db.reservation(Direction::Ingress, ResourceType::Encap).is_none()
        );
        assert_eq!(
            db.free(Direction::Ingress, WC, 66),
            Err(RmError::BadIndex(Direction::Ingress, WC, 66))
        );
        assert_eq!(db.flush_list(Direction::Ingress).len(), 1);
    }
}
