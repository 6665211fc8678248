// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Session configuration.

use super::CfaError;
use super::DevFamily;
use super::Direction;
use super::ResourceReq;
use super::ResourceType;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// The longest control channel name firmware accepts.
pub const CTRL_CHAN_NAME_MAX: usize = 64;

/// The largest exact-match record, in 16-byte record entries.
pub const EM_MAX_ALLOC: u32 = 4;

/// How a dynamic pool should respond to an allocation that does not
/// fit in any free run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum DefragMode {
    /// Fail the allocation.
    #[default]
    None,
    /// Compact until no further move grows the largest free run.
    All,
    /// Compact only until the request fits.
    ToFit,
}

/// Configuration of the internal exact-match table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EmCfg {
    /// The largest record, in record entries.
    pub max_alloc: u32,
    pub defrag: DefragMode,
    pub hash_seed: u32,
}

impl Default for EmCfg {
    fn default() -> Self {
        Self {
            max_alloc: EM_MAX_ALLOC,
            defrag: DefragMode::ToFit,
            hash_seed: 0,
        }
    }
}

/// Everything needed to open a session.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionCfg {
    /// The name of the control channel, used by firmware to identify
    /// the session.
    pub ctrl_chan_name: String,
    /// Attach to an existing session instead of creating one.
    pub shared: bool,
    pub family: DevFamily,
    pub ingress: Vec<ResourceReq>,
    pub egress: Vec<ResourceReq>,
    /// The number of TCAM entry IDs handed out across all tables.
    pub tcam_max_entries: u16,
    pub em: EmCfg,
}

impl SessionCfg {
    pub fn new(ctrl_chan_name: &str, family: DevFamily) -> Self {
        Self {
            ctrl_chan_name: ctrl_chan_name.into(),
            shared: false,
            family,
            ingress: Vec::new(),
            egress: Vec::new(),
            tcam_max_entries: 1024,
            em: EmCfg::default(),
        }
    }

    /// Add a request for `count` resources of `rtype` in `dir`.
    pub fn request(
        mut self,
        dir: Direction,
        rtype: ResourceType,
        count: u16,
    ) -> Self {
        let req = ResourceReq::new(rtype, count);
        match dir {
            Direction::Ingress => self.ingress.push(req),
            Direction::Egress => self.egress.push(req),
        }
        self
    }

    pub fn requests(&self, dir: Direction) -> &[ResourceReq] {
        match dir {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    pub fn validate(&self) -> Result<(), CfaError> {
        if self.ctrl_chan_name.is_empty()
            || self.ctrl_chan_name.len() > CTRL_CHAN_NAME_MAX
        {
            return Err(CfaError::InvalidArgument(format!(
                "control channel name must be 1-{} bytes: {:?}",
                CTRL_CHAN_NAME_MAX, self.ctrl_chan_name
            )));
        }

        if self.tcam_max_entries == 0 {
            return Err(CfaError::InvalidArgument(
                "tcam_max_entries must be non-zero".into(),
            ));
        }

        if self.em.max_alloc == 0 || self.em.max_alloc > EM_MAX_ALLOC {
            return Err(CfaError::InvalidArgument(format!(
                "EM max_alloc must be 1-{}: {}",
                EM_MAX_ALLOC, self.em.max_alloc
            )));
        }

        for dir in Direction::ALL {
            let reqs = self.requests(dir);
            for (i, req) in reqs.iter().enumerate() {
                if req.min > req.max {
                    return Err(CfaError::InvalidArgument(format!(
                        "{dir} {}: min {} exceeds max {}",
                        req.rtype, req.min, req.max
                    )));
                }

                if reqs[..i].iter().any(|r| r.rtype == req.rtype) {
                    return Err(CfaError::InvalidArgument(format!(
                        "{dir} {}: requested more than once",
                        req.rtype
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TcamTblType;

    #[test]
    fn validate_rejects_bad_cfg() {
        let good = SessionCfg::new("cfa0", DevFamily::P4).request(
            Direction::Ingress,
            ResourceType::Tcam(TcamTblType::Wc),
            64,
        );
        assert_eq!(good.validate(), Ok(()));

        let mut long = good.clone();
        long.ctrl_chan_name = "x".repeat(CTRL_CHAN_NAME_MAX + 1);
        assert!(long.validate().is_err());

        let dup = good.clone().request(
            Direction::Ingress,
            ResourceType::Tcam(TcamTblType::Wc),
            8,
        );
        assert!(dup.validate().is_err());

        let mut em = good;
        em.em.max_alloc = EM_MAX_ALLOC + 1;
        assert!(em.validate().is_err());
    }
}
