// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use cfa::engine::session::Session;
use cfa::print::print_tcam_into;
use cfa_test_utils as common;
use common::*;

const WC: TcamTblType = TcamTblType::Wc;
const BANK1: SramBank = SramBank::ALL[1];

fn cfg() -> SessionCfg {
    SessionCfg::new("cfa0", DevFamily::P4)
        .request(Ingress, ResourceType::Tcam(WC), 64)
        .request(Ingress, ResourceType::SramBank(BANK1), 8)
        .request(Ingress, ResourceType::EmRecord, 16)
        .request(Ingress, ResourceType::FullAction, 32)
}

fn open(log: &CaptureLog) -> Session<MockFw> {
    Session::open(MockFw::new(DevFamily::P4), cfg(), log.providers())
        .unwrap()
}

#[test]
fn open_and_close() {
    let log = CaptureLog::new();
    let sess = open(&log);

    assert_eq!(sess.info().fw_session_id, 1);
    assert!(!sess.info().shared_creator);
    assert!(sess.tcam_qcaps().supports(Ingress, WC));
    assert!(!sess.tcam_qcaps().supports(Egress, WC));
    assert!(sess.em(Ingress).is_some());
    assert!(sess.em(Egress).is_none());
    assert_eq!(sess.fw().transport().count(FwCmd::RescAlloc), 1);

    let fw = sess.close();
    assert!(!fw.session_open);
    assert_eq!(fw.flushed.len(), 4);
    assert!(fw.grants.values().all(|g| g.is_empty()));
    assert_eq!(fw.cmds.last(), Some(&FwCmd::SessionClose));
    assert_eq!(log.count(LogLevel::Note), 1);
    assert_eq!(log.count(LogLevel::Warn), 0);
}

#[test]
fn capabilities() {
    let log = CaptureLog::new();
    let mut sess = open(&log);

    let caps = sess.resc_qcaps(Ingress).unwrap();
    assert_eq!(caps.strategy, ResvStrategy::Static);
    assert_eq!(caps.caps.len(), 14);
    let wc = caps
        .caps
        .iter()
        .find(|c| c.rtype == ResourceType::Tcam(WC))
        .unwrap();
    assert_eq!(wc.max, 8192);
    sess.close();
}

#[test]
fn shared_session_attaches() {
    let log = CaptureLog::new();
    let fw = MockFw::with_existing_session(
        DevFamily::P4,
        &[(Ingress, ResourceType::Tcam(WC), 0, 64)],
    );
    let mut cfg = SessionCfg::new("cfa0", DevFamily::P4).request(
        Ingress,
        ResourceType::Tcam(WC),
        64,
    );
    cfg.shared = true;

    let mut sess = Session::open(fw, cfg, log.providers()).unwrap();
    assert_eq!(sess.info().fw_session_client_id, 1);
    assert!(!sess.info().shared_creator);
    assert_eq!(sess.fw().transport().count(FwCmd::RescInfo), 1);
    assert_eq!(sess.fw().transport().count(FwCmd::RescAlloc), 0);
    assert!(sess.tcam_alloc(Ingress, WC, 64, 1).is_ok());

    // The creator's reservations stay in place.
    let fw = sess.close();
    assert_eq!(fw.count(FwCmd::RescFlush), 0);
    assert!(fw.flushed.is_empty());
    assert_eq!(fw.grants.values().flatten().count(), 1);
}

#[test]
fn shared_session_creator() {
    let mut cfg = SessionCfg::new("cfa0", DevFamily::P4);
    cfg.shared = true;
    let fw = MockFw::new(DevFamily::P4);
    let sess = Session::open(fw, cfg, CaptureLog::new().providers()).unwrap();
    assert!(sess.info().shared_creator);
    sess.close();
}

#[test]
fn bind_failure_closes_session() {
    let log = CaptureLog::new();
    let cfg = cfg().request(Egress, ResourceType::Encap, 2000);

    let res = Session::open(MockFw::new(DevFamily::P4), cfg, log.providers());
    assert!(matches!(res, Err(CfaError::Device(_))));
    assert_eq!(log.count(LogLevel::Error), 1);
    assert!(
        log.msgs()
            .iter()
            .any(|(_, m)| m.starts_with("session bind failed"))
    );
}

#[test]
fn open_failure() {
    let mut fw = MockFw::new(DevFamily::P4);
    fw.fail = Some((FwCmd::SessionOpen, errno::EIO));
    let res = Session::open(fw, cfg(), CaptureLog::new().providers());
    assert!(matches!(res, Err(CfaError::Device(_))));

    let mut bad = cfg();
    bad.ctrl_chan_name = String::new();
    let res = Session::open(
        MockFw::new(DevFamily::P4),
        bad,
        CaptureLog::new().providers(),
    );
    assert!(matches!(res, Err(CfaError::InvalidArgument(_))));
}

#[test]
fn tcam_entries() {
    let log = CaptureLog::new();
    let mut sess = open(&log);

    // ================================================================
    // A one-slice entry fits inline in the request.
    // ================================================================
    let small = sess.tcam_alloc(Ingress, WC, 64, 10).unwrap();
    assert_eq!(sess.tcam().location(small), Some((15, 0)));
    sess.tcam_set(Ingress, WC, small, &[1; 8], &[0xFF; 8], &[9; 4])
        .unwrap();
    let fw = sess.fw().transport();
    assert_eq!(fw.tcam[&(Ingress, 0x03, 60)].key, vec![1; 8]);
    assert_eq!(fw.dma_staged, 0);

    // ================================================================
    // A full-row entry does not, and goes by DMA.
    // ================================================================
    let wide = sess.tcam_alloc(Ingress, WC, 640, 10).unwrap();
    assert_eq!(sess.tcam().location(wide), Some((14, 0)));
    sess.tcam_set(Ingress, WC, wide, &[2; 80], &[0xFF; 80], &[3; 4])
        .unwrap();
    let fw = sess.fw().transport();
    assert_eq!(fw.dma_staged, 1);
    assert_eq!(fw.dma_released, 1);
    assert_eq!(fw.dma_outstanding(), 0);

    let rec = sess.tcam_get(Ingress, WC, wide).unwrap();
    assert_eq!(rec.key, vec![2; 80]);
    assert_eq!(rec.mask, vec![0xFF; 80]);
    assert_eq!(rec.result, vec![3; 4]);

    let dump = sess.dump_tcam(Ingress, WC).unwrap();
    assert_eq!(dump.used_entries, 2);
    assert_eq!(dump.rows.len(), 2);
    let mut out = Vec::new();
    print_tcam_into(&mut out, &dump).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("RX wc TCAM rows 0-15"));

    assert_eq!(sess.tcam_add_ref(small), Ok(2));
    assert_eq!(sess.tcam_free(Ingress, None, small), Ok(1));

    // Closing invalidates every row still in use.
    let fw = sess.close();
    assert!(
        fw.tcam
            .values()
            .all(|r| r.key.iter().all(|b| *b == 0)
                && r.mask.iter().all(|b| *b == 0xFF))
    );
}

#[test]
fn tcam_device_error() {
    let log = CaptureLog::new();
    let mut sess = open(&log);

    let id = sess.tcam_alloc(Ingress, WC, 64, 10).unwrap();
    sess.fw_mut().transport_mut().fail = Some((FwCmd::TcamSet, errno::EIO));
    let res = sess.tcam_set(Ingress, WC, id, &[1; 8], &[0xFF; 8], &[]);
    assert!(matches!(res, Err(CfaError::Device(_))));
    assert_eq!(res.unwrap_err().to_errno(), errno::EIO);

    // The next attempt goes through.
    sess.tcam_set(Ingress, WC, id, &[1; 8], &[0xFF; 8], &[]).unwrap();
    sess.close();
}

#[test]
fn sram_slices() {
    let log = CaptureLog::new();
    let mut sess = open(&log);
    let s16 = SliceSize::S16;
    let rtype = ResourceType::SramBank(BANK1);
    let base = 2048 << 3;

    let offs: Vec<u32> = (0..4)
        .map(|_| sess.sram_alloc(Ingress, BANK1, s16).unwrap())
        .collect();
    assert_eq!(offs, vec![base, base + 2, base + 4, base + 6]);
    assert_eq!(sess.rm().in_use(Ingress, rtype), 1);

    assert_eq!(sess.sram_alloc(Ingress, BANK1, s16), Ok(base + 8));
    assert_eq!(sess.rm().in_use(Ingress, rtype), 2);

    sess.sram_free(Ingress, BANK1, s16, base + 4).unwrap();
    assert_eq!(
        sess.sram_is_allocated(Ingress, BANK1, s16, base + 4),
        Ok(false)
    );
    assert_eq!(
        sess.dump_sram(Ingress, BANK1, s16).first_not_full,
        Some(0)
    );
    assert_eq!(sess.sram_alloc(Ingress, BANK1, s16), Ok(base + 4));
    sess.sram().check().unwrap();

    assert!(matches!(
        sess.sram_free(Ingress, BANK1, s16, base + 3),
        Err(CfaError::InvalidArgument(_))
    ));

    // Blocks still in use go back to the pool on close without
    // complaint.
    sess.close();
    assert_eq!(log.count(LogLevel::Warn), 0);
}

#[test]
fn em_flows() {
    let log = CaptureLog::new();
    let mut sess = open(&log);

    let a = sess.em_insert(Ingress, &[0xA; 48], 0x100, 1).unwrap();
    let b = sess.em_insert(Ingress, &[0xB; 64], 0x200, 1).unwrap();
    let c = sess.em_insert(Ingress, &[0xC; 64], 0x300, 1).unwrap();
    let d = sess.em_insert(Ingress, &[0xD; 48], 0x400, 1).unwrap();
    assert_eq!(
        [a, b, c, d].map(|h| h.record_index()),
        [0, 3, 7, 11]
    );
    assert_eq!(d.dir(), Ingress);
    assert_eq!(d.unpack().entries, 3);

    let fw = sess.fw().transport();
    let flow = &fw.em[&(Ingress, 7)];
    assert_eq!(flow.handle, c);
    assert_eq!(flow.key, vec![0xC; 64]);
    assert_eq!(flow.action_ptr, 0x300);

    // ================================================================
    // Deleting `a` leaves runs of 3 and 2 free. A 4-entry flow only
    // fits after `d` moves into the first run.
    // ================================================================
    sess.em_delete(a).unwrap();
    let e = sess.em_insert(Ingress, &[0xE; 64], 0x500, 1).unwrap();
    assert_eq!(e.record_index(), 11);

    let moves = sess.em_take_moves(Ingress).unwrap();
    assert_eq!(moves.len(), 1);
    let (old, new) = moves[0];
    assert_eq!(old, d);
    assert_eq!(new.record_index(), 0);
    assert!(sess.em_take_moves(Ingress).unwrap().is_empty());

    let fw = sess.fw().transport();
    assert_eq!(fw.count(FwCmd::EmMove), 1);
    assert_eq!(fw.em[&(Ingress, 0)].key, vec![0xD; 48]);
    assert_eq!(fw.em[&(Ingress, 11)].key, vec![0xE; 64]);

    assert!(matches!(sess.em_delete(d), Err(CfaError::NotAllocated(_))));
    sess.em_delete(new).unwrap();

    let largest = sess.em_defrag(Ingress).unwrap();
    assert_eq!(sess.dump_em(Ingress).unwrap().largest_free, largest);
    sess.em(Ingress).unwrap().check().unwrap();
    assert_eq!(sess.em(Ingress).unwrap().len(), 3);

    assert!(matches!(
        sess.em_insert(Ingress, &[], 0, 0),
        Err(CfaError::InvalidArgument(_))
    ));
    assert!(matches!(
        sess.em_insert(Egress, &[1; 16], 0, 0),
        Err(CfaError::NotSupported(_))
    ));

    // Remaining flows are deleted on close.
    let fw = sess.close();
    assert!(fw.em.is_empty());
}

#[test]
fn index_tables() {
    let log = CaptureLog::new();
    let mut sess = open(&log);
    let fa = ResourceType::FullAction;

    let idx = sess.tbl_alloc(Ingress, fa).unwrap();
    assert_eq!(idx, 0);
    sess.tbl_set(Ingress, fa, idx, &[7; 16]).unwrap();
    assert_eq!(sess.tbl_get(Ingress, fa, idx, 16).unwrap(), vec![7; 16]);

    let big: Vec<u8> = (0..200).map(|i| i as u8).collect();
    sess.tbl_set(Ingress, fa, idx, &big).unwrap();
    assert_eq!(sess.fw().transport().dma_staged, 1);
    assert_eq!(sess.tbl_get(Ingress, fa, idx, 200).unwrap(), big);

    assert!(matches!(
        sess.tbl_set(Ingress, fa, 5, &[1]),
        Err(CfaError::NotAllocated(_))
    ));
    assert!(matches!(
        sess.tbl_alloc(Ingress, ResourceType::EmRecord),
        Err(CfaError::InvalidArgument(_))
    ));
    assert!(matches!(
        sess.tbl_alloc(Egress, fa),
        Err(CfaError::NotAllocated(_))
    ));

    // An index left allocated is reported on close.
    sess.close();
    assert_eq!(log.count(LogLevel::Warn), 1);
    assert!(log.msgs().iter().any(|(_, m)| m.contains("full-action")));
}
