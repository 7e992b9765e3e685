//! The PDCP entity (LTE undelivered-queue and NR reorder-queue variants share
//! this type, selected by [`PdcpVariant`]).
//!
//! Grounded on `tox-sequenced`'s `session.rs` for the "one entity value owns both
//! the tx and rx halves" shape, generalized from the session's message-reassembly
//! bookkeeping to PDCP's COUNT-keyed reordering, discard timers, and handover
//! state export.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::error::L2Error;
use crate::flat_map::FlatMap;
use crate::pdcp::header::{self as pdcp_header, RbType};
use crate::pdcp::security::{CipherAlgo, Direction, IntegrityAlgo, SecurityContext, SecurityProvider};
use crate::sn::{Count, SnWidth, reconstruct_count};
use crate::timer::{TickTimerWheel, TimerHandle};

/// Which 3GPP PDCP flavor an entity implements. LTE (36.323) delivers strictly in
/// order with a small out-of-order buffer and no reordering timer; NR (38.323) adds
/// `t_reordering` and a full Count-keyed reorder queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdcpVariant {
    Lte,
    Nr,
}

#[derive(Debug, Clone, Copy)]
pub struct PdcpConfig {
    pub sn_len: SnWidth,
    pub rb_type: RbType,
    pub variant: PdcpVariant,
    /// `lcid`, used (minus one) as the `bearer` input to the security primitives.
    pub bearer_id: u8,
    /// This entity's own transmit direction; the opposite direction is used when
    /// verifying/deciphering received PDUs.
    pub direction: Direction,
    pub t_reordering_ticks: u64,
    /// `None` models `t_discard = infinity` (discard timer never arms).
    pub t_discard_ticks: Option<u64>,
}

impl PdcpConfig {
    pub fn validate(&self) -> Result<(), L2Error> {
        pdcp_header::validate_combination(self.sn_len, self.rb_type)
    }
}

/// Handover state exported/restored via `get_bearer_state`/`set_bearer_state`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BearerState {
    pub tx_hfn: u32,
    pub next_pdcp_tx_sn: u32,
    pub rx_hfn: u32,
    pub next_pdcp_rx_sn: u32,
    pub last_submitted_pdcp_rx_sn: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdcpMetrics {
    pub tx_sdus: u64,
    pub rx_sdus: u64,
    pub tx_dropped: u64,
    pub rx_dropped: u64,
    pub integrity_failures: u64,
}

/// What happened during one [`PdcpEntity::step`] call: SDUs whose `t_discard`
/// expired (the caller must also tell RLC to `discard_sdu` these PDCP SNs) and, for
/// the NR variant, SDUs released by a `t_reordering` expiry.
#[derive(Debug, Clone, Default)]
pub struct StepEvents {
    pub discarded_sns: Vec<u32>,
    pub delivered_sdus: Vec<Vec<u8>>,
}

struct UndeliveredEntry {
    sdu: Vec<u8>,
    timer: Option<TimerHandle>,
}

pub struct PdcpEntity<P: SecurityProvider> {
    cfg: PdcpConfig,
    sec: SecurityContext,
    provider: P,

    tx_next: u32,
    tx_hfn: u32,

    /// Lowest Count not yet delivered upward. For LTE this is also the "next
    /// expected SN" (no buffering beyond `lte_reorder`); for NR it is `RX_DELIV`.
    rx_deliv: Count,
    /// NR only: `RX_NEXT`, the highest Count received + 1.
    rx_next: Count,
    /// NR only: armed when a gap exists above `RX_DELIV`.
    rx_reord: Option<Count>,

    reorder: FlatMap<u32, Vec<u8>>,
    lte_reorder: FlatMap<u32, Vec<u8>>,
    /// LTE only: highest raw SN seen + 1, bounding the status-report bitmap.
    lte_rx_next_highest: u32,

    undelivered: FlatMap<u32, UndeliveredEntry>,
    fms: u32,
    lms: u32,
    /// LWA-style forward-most-confirmed, installed by `set_bearer_state(_, true)`.
    fmc: Option<u32>,

    timers: TickTimerWheel,
    t_reordering: TimerHandle,
    discard_handles: HashMap<TimerHandle, u32>,

    metrics: PdcpMetrics,
}

impl<P: SecurityProvider> PdcpEntity<P> {
    pub fn new(cfg: PdcpConfig, sec: SecurityContext, provider: P) -> Result<Self, L2Error> {
        cfg.validate()?;
        let mut timers = TickTimerWheel::new();
        let t_reordering = timers.create(cfg.t_reordering_ticks.max(1));
        Ok(Self {
            cfg,
            sec,
            provider,
            tx_next: 0,
            tx_hfn: 0,
            rx_deliv: Count(0),
            rx_next: Count(0),
            rx_reord: None,
            reorder: FlatMap::new(),
            lte_reorder: FlatMap::new(),
            lte_rx_next_highest: 0,
            undelivered: FlatMap::new(),
            fms: 0,
            lms: 0,
            fmc: None,
            timers,
            t_reordering,
            discard_handles: HashMap::new(),
            metrics: PdcpMetrics::default(),
        })
    }

    pub fn metrics(&self) -> PdcpMetrics {
        self.metrics
    }

    pub fn fms(&self) -> u32 {
        self.fms
    }

    pub fn lms(&self) -> u32 {
        self.lms
    }

    fn opposite_direction(&self) -> Direction {
        match self.cfg.direction {
            Direction::Uplink => Direction::Downlink,
            Direction::Downlink => Direction::Uplink,
        }
    }

    fn bearer_minus_one(&self) -> u8 {
        self.cfg.bearer_id.wrapping_sub(1)
    }

    fn advance_tx_sn(&mut self) {
        if self.tx_next == self.cfg.sn_len.mask() {
            self.tx_hfn = self.tx_hfn.wrapping_add(1);
            self.tx_next = 0;
        } else {
            self.tx_next += 1;
        }
    }

    /// Packs the header, applies security in the mandated order (MAC generated
    /// over header+plaintext first, then payload, and on SRB the MAC itself,
    /// enciphered), and, for LTE, arms a discard timer. Returns the bytes to hand
    /// to RLC via `write_sdu`.
    pub fn write_sdu(&mut self, data: Vec<u8>, explicit_sn: Option<u32>) -> Result<Vec<u8>, L2Error> {
        if data.len() > crate::buffer::MIN_PAYLOAD_CAPACITY {
            self.metrics.tx_dropped += 1;
            return Err(L2Error::parse("PDCP SDU exceeds 9000 bytes"));
        }
        let sn = explicit_sn.unwrap_or(self.tx_next);
        let header = pdcp_header::encode_header(sn, self.cfg.sn_len, self.cfg.rb_type)?;
        let count = Count::new(self.tx_hfn, sn, self.cfg.sn_len);

        let mac = if self.sec.integrity_algo != IntegrityAlgo::Null {
            let mut plain = header.clone();
            plain.extend_from_slice(&data);
            self.provider.integrity_generate(
                self.sec.integrity_algo,
                &self.sec.k_int,
                count.0,
                self.bearer_minus_one(),
                self.cfg.direction,
                &plain,
            )
        } else {
            [0; 4]
        };

        let ciphered_payload = if self.sec.cipher_algo != CipherAlgo::Null {
            self.provider.cipher_encrypt(
                self.sec.cipher_algo,
                &self.sec.k_enc,
                count.0,
                self.bearer_minus_one(),
                self.cfg.direction,
                &data,
            )
        } else {
            data.clone()
        };

        let mut out = header;
        out.extend_from_slice(&ciphered_payload);
        if self.sec.integrity_algo != IntegrityAlgo::Null {
            let mac_bytes = if self.sec.cipher_algo != CipherAlgo::Null && self.cfg.rb_type == RbType::Srb {
                self.provider.cipher_encrypt(
                    self.sec.cipher_algo,
                    &self.sec.k_enc,
                    count.0,
                    self.bearer_minus_one(),
                    self.cfg.direction,
                    &mac,
                )
            } else {
                mac.to_vec()
            };
            out.extend_from_slice(&mac_bytes);
        }

        if explicit_sn.is_none() {
            self.advance_tx_sn();
        }

        if self.cfg.variant == PdcpVariant::Lte {
            self.arm_discard(sn, data);
            self.lms = sn;
        }

        self.metrics.tx_sdus += 1;
        trace!(sn, count = count.0, "pdcp sdu packed");
        Ok(out)
    }

    fn arm_discard(&mut self, sn: u32, data: Vec<u8>) {
        let timer = self.cfg.t_discard_ticks.map(|ticks| {
            let handle = self.timers.create(ticks);
            self.timers.run(handle, ticks);
            self.discard_handles.insert(handle, sn);
            handle
        });
        self.undelivered.insert(sn, UndeliveredEntry { sdu: data, timer });
        self.recompute_fms();
    }

    fn recompute_fms(&mut self) {
        let mask = self.cfg.sn_len.mask();
        self.fms = self
            .undelivered
            .keys()
            .copied()
            .max_by_key(|&k| self.tx_next.wrapping_sub(k) & mask)
            .unwrap_or(self.tx_next);
    }

    /// Invoked by RLC on ack: cancels the discard timer and drops the SDU from the
    /// undelivered queue (I3: a discard timer exists iff its SDU is still
    /// referenced there).
    pub fn notify_delivery(&mut self, pdcp_sns: &[u32]) {
        for &sn in pdcp_sns {
            if let Some(entry) = self.undelivered.remove(&sn) {
                if let Some(handle) = entry.timer {
                    self.timers.stop(handle);
                    self.timers.remove(handle);
                    self.discard_handles.remove(&handle);
                }
            }
        }
        self.recompute_fms();
    }

    /// Invoked by RLC on `max_retx_attempted`-style permanent loss: same cleanup as
    /// delivery, but counted as dropped rather than delivered.
    pub fn notify_failure(&mut self, pdcp_sns: &[u32]) {
        self.metrics.tx_dropped += pdcp_sns.len() as u64;
        self.notify_delivery(pdcp_sns);
    }

    /// Parses, deciphers, and integrity-verifies a received PDU, then applies the
    /// variant's delivery algorithm. Returns every SDU now ready for upward
    /// delivery (zero, one, or — for NR after a `t_reordering` flush path driven
    /// through `step` — more than one).
    pub fn write_pdu(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, L2Error> {
        let (sn, hdr_len) = pdcp_header::decode_header(bytes, self.cfg.sn_len, self.cfg.rb_type)?;
        let has_mac = self.sec.integrity_algo != IntegrityAlgo::Null;
        if bytes.len() < hdr_len {
            return Err(L2Error::parse("PDCP PDU truncated"));
        }
        let body = &bytes[hdr_len..];
        if has_mac && body.len() < 4 {
            return Err(L2Error::parse("PDCP PDU missing MAC-I"));
        }
        let (ct, mac_bytes) = if has_mac {
            body.split_at(body.len() - 4)
        } else {
            (body, &[][..])
        };

        let count = reconstruct_count(sn, self.rx_deliv, self.cfg.sn_len);
        let opposite = self.opposite_direction();

        let plaintext = if self.sec.cipher_algo != CipherAlgo::Null {
            self.provider.cipher_decrypt(
                self.sec.cipher_algo,
                &self.sec.k_enc,
                count.0,
                self.bearer_minus_one(),
                opposite,
                ct,
            )
        } else {
            ct.to_vec()
        };

        if has_mac {
            let mac_plain = if self.sec.cipher_algo != CipherAlgo::Null && self.cfg.rb_type == RbType::Srb {
                self.provider.cipher_decrypt(
                    self.sec.cipher_algo,
                    &self.sec.k_enc,
                    count.0,
                    self.bearer_minus_one(),
                    opposite,
                    mac_bytes,
                )
            } else {
                mac_bytes.to_vec()
            };
            let mut check = bytes[..hdr_len].to_vec();
            check.extend_from_slice(&plaintext);
            let mac_arr: [u8; 4] = mac_plain
                .try_into()
                .map_err(|_| L2Error::parse("malformed MAC-I length"))?;
            if !self.provider.integrity_verify(
                self.sec.integrity_algo,
                &self.sec.k_int,
                count.0,
                self.bearer_minus_one(),
                opposite,
                &check,
                &mac_arr,
            ) {
                self.metrics.integrity_failures += 1;
                self.metrics.rx_dropped += 1;
                warn!(sn, count = count.0, "pdcp integrity verification failed");
                return Err(L2Error::IntegrityFailure);
            }
        }

        self.metrics.rx_sdus += 1;
        Ok(match self.cfg.variant {
            PdcpVariant::Nr => self.nr_receive(count, plaintext),
            PdcpVariant::Lte => self.lte_receive(count, plaintext),
        })
    }

    /// NR in-order delivery with a COUNT-keyed reordering window.
    fn nr_receive(&mut self, count: Count, data: Vec<u8>) -> Vec<Vec<u8>> {
        if count.0 < self.rx_deliv.0 || self.reorder.contains_key(&count.0) {
            trace!(count = count.0, "dropping old/duplicate pdcp pdu");
            self.metrics.rx_dropped += 1;
            return Vec::new();
        }

        self.reorder.insert(count.0, data);
        if count.0 >= self.rx_next.0 {
            self.rx_next = Count(count.0 + 1);
        }

        let mut delivered = Vec::new();
        while let Some(d) = self.reorder.remove(&self.rx_deliv.0) {
            delivered.push(d);
            self.rx_deliv = Count(self.rx_deliv.0 + 1);
        }

        if self.rx_next.0 > self.rx_deliv.0 && !self.timers.is_running(self.t_reordering) {
            self.timers.run(self.t_reordering, self.cfg.t_reordering_ticks);
            self.rx_reord = Some(self.rx_next);
            debug!(rx_reord = self.rx_next.0, "t_reordering armed");
        }
        delivered
    }

    fn on_reordering_expiry(&mut self, delivered: &mut Vec<Vec<u8>>) {
        let Some(rx_reord) = self.rx_reord else {
            return;
        };
        let mut keys: Vec<u32> = self.reorder.keys().copied().filter(|&k| k < rx_reord.0).collect();
        keys.sort_unstable();
        for k in keys {
            if let Some(d) = self.reorder.remove(&k) {
                delivered.push(d);
            }
        }

        let mut candidate = rx_reord.0;
        while self.reorder.contains_key(&candidate) {
            candidate += 1;
        }
        self.rx_deliv = Count(candidate);
        debug!(rx_deliv = candidate, "t_reordering expired, status flushed");

        if self.rx_next.0 > self.rx_deliv.0 {
            self.timers.run(self.t_reordering, self.cfg.t_reordering_ticks);
            self.rx_reord = Some(self.rx_next);
        } else {
            self.rx_reord = None;
        }
    }

    /// LTE delivers strictly in order (the underlying AM bearer already orders
    /// SNs); a PDU arriving ahead of `rx_deliv` is buffered without a reordering
    /// timer, matching TS 36.323's lack of `t_reordering`.
    fn lte_receive(&mut self, count: Count, data: Vec<u8>) -> Vec<Vec<u8>> {
        if count.0 < self.rx_deliv.0 || self.lte_reorder.contains_key(&count.0) {
            self.metrics.rx_dropped += 1;
            return Vec::new();
        }
        if count.0 + 1 > self.lte_rx_next_highest {
            self.lte_rx_next_highest = count.0 + 1;
        }

        if count.0 == self.rx_deliv.0 {
            let mut delivered = vec![data];
            self.rx_deliv = Count(self.rx_deliv.0 + 1);
            while let Some(d) = self.lte_reorder.remove(&self.rx_deliv.0) {
                delivered.push(d);
                self.rx_deliv = Count(self.rx_deliv.0 + 1);
            }
            delivered
        } else {
            self.lte_reorder.insert(count.0, data);
            Vec::new()
        }
    }

    /// Advances discard and `t_reordering` timers. Returns any PDCP SNs whose
    /// `t_discard` fired (the caller must forward these to RLC's `discard_sdu`)
    /// and any SDUs a `t_reordering` expiry just released.
    pub fn step(&mut self, ticks: u64) -> StepEvents {
        let mut events = StepEvents::default();
        let expired = self.timers.step(ticks);
        for handle in expired {
            if let Some(sn) = self.discard_handles.remove(&handle) {
                self.undelivered.remove(&sn);
                events.discarded_sns.push(sn);
                debug!(sn, "t_discard expired");
            } else if handle == self.t_reordering {
                self.on_reordering_expiry(&mut events.delivered_sdus);
            }
        }
        if !events.discarded_sns.is_empty() {
            self.recompute_fms();
        }
        events
    }

    /// LTE handover status report: a bitmap of received-but-undelivered SNs
    /// relative to `FMS`.
    pub fn send_status_report(&self) -> Result<Vec<u8>, L2Error> {
        if self.cfg.variant != PdcpVariant::Lte {
            return Err(L2Error::ConfigError("status report is LTE-only".into()));
        }
        let fms = self.rx_deliv.sn(self.cfg.sn_len);
        let mut bitmap = Vec::new();
        let mut sn = fms.wrapping_add(1) & self.cfg.sn_len.mask();
        let mut steps = 0u32;
        while sn != (self.lte_rx_next_highest & self.cfg.sn_len.mask()) && steps < self.cfg.sn_len.window() {
            bitmap.push(self.lte_reorder.contains_key(&sn));
            sn = sn.wrapping_add(1) & self.cfg.sn_len.mask();
            steps += 1;
        }
        Ok(pdcp_header::encode_lte_status_report(fms, &bitmap))
    }

    /// Applies a peer's status report: any SN it marks as received cancels this
    /// entity's own discard timer for it (it need not be retransmitted/forwarded).
    pub fn handle_status_report_pdu(&mut self, bytes: &[u8]) -> Result<(), L2Error> {
        let (fms, bitmap) = pdcp_header::decode_lte_status_report(bytes)?;
        let mask = self.cfg.sn_len.mask();
        let mut to_remove: Vec<u32> = self
            .undelivered
            .keys()
            .copied()
            .filter(|&sn| {
                let age = fms.wrapping_sub(sn) & mask;
                sn != fms && age != 0 && age < self.cfg.sn_len.window()
            })
            .collect();
        for (i, &received) in bitmap.iter().enumerate() {
            if received {
                let sn = fms.wrapping_add(1 + i as u32) & mask;
                if self.undelivered.contains_key(&sn) {
                    to_remove.push(sn);
                }
            }
        }
        for sn in to_remove {
            if let Some(entry) = self.undelivered.remove(&sn) {
                if let Some(handle) = entry.timer {
                    self.timers.stop(handle);
                    self.timers.remove(handle);
                    self.discard_handles.remove(&handle);
                }
            }
        }
        self.recompute_fms();
        Ok(())
    }

    /// The tx-side undelivered queue, for forwarding to a target cell at handover.
    pub fn get_buffered_pdus(&self) -> Vec<(u32, Vec<u8>)> {
        self.undelivered.iter().map(|(sn, e)| (*sn, e.sdu.clone())).collect()
    }

    pub fn get_bearer_state(&self) -> BearerState {
        BearerState {
            tx_hfn: self.tx_hfn,
            next_pdcp_tx_sn: self.tx_next,
            rx_hfn: self.rx_deliv.hfn(self.cfg.sn_len),
            next_pdcp_rx_sn: self.rx_deliv.sn(self.cfg.sn_len),
            last_submitted_pdcp_rx_sn: self.rx_deliv.sn(self.cfg.sn_len).wrapping_sub(1) & self.cfg.sn_len.mask(),
        }
    }

    pub fn set_bearer_state(&mut self, state: BearerState, set_fmc: bool) {
        self.tx_hfn = state.tx_hfn;
        self.tx_next = state.next_pdcp_tx_sn;
        self.rx_deliv = Count::new(state.rx_hfn, state.next_pdcp_rx_sn, self.cfg.sn_len);
        self.rx_next = self.rx_deliv;
        self.lte_rx_next_highest = state.next_pdcp_rx_sn;
        if set_fmc {
            self.fmc = Some(state.last_submitted_pdcp_rx_sn);
        }
    }

    pub fn fmc(&self) -> Option<u32> {
        self.fmc
    }

    /// Non-destructive reset: clears windows/timers/queues and restarts SNs at 0,
    /// keeping configuration and security context.
    pub fn reestablish(&mut self) {
        self.tx_next = 0;
        self.tx_hfn = 0;
        self.rx_deliv = Count(0);
        self.rx_next = Count(0);
        self.rx_reord = None;
        self.reorder.clear();
        self.lte_reorder.clear();
        self.lte_rx_next_highest = 0;
        self.undelivered.clear();
        self.fms = 0;
        self.lms = 0;
        self.fmc = None;
        self.timers.stop(self.t_reordering);
        for handle in self.discard_handles.keys().copied().collect::<Vec<_>>() {
            self.timers.stop(handle);
            self.timers.remove(handle);
        }
        self.discard_handles.clear();
    }

    /// Destructive reset: identical to `reestablish` for this entity (no
    /// persistent-across-reset state beyond configuration/security live here).
    pub fn reset(&mut self) {
        self.reestablish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdcp::security::TestSecurityProvider;

    fn nr_entity() -> PdcpEntity<TestSecurityProvider> {
        PdcpEntity::new(
            PdcpConfig {
                sn_len: SnWidth::Bits12,
                rb_type: RbType::Drb,
                variant: PdcpVariant::Nr,
                bearer_id: 4,
                direction: Direction::Downlink,
                t_reordering_ticks: 50,
                t_discard_ticks: None,
            },
            SecurityContext::null(),
            TestSecurityProvider,
        )
        .unwrap()
    }

    fn lte_entity(t_discard_ticks: Option<u64>) -> PdcpEntity<TestSecurityProvider> {
        PdcpEntity::new(
            PdcpConfig {
                sn_len: SnWidth::Bits12,
                rb_type: RbType::Drb,
                variant: PdcpVariant::Lte,
                bearer_id: 4,
                direction: Direction::Uplink,
                t_reordering_ticks: 50,
                t_discard_ticks,
            },
            SecurityContext::null(),
            TestSecurityProvider,
        )
        .unwrap()
    }

    #[test]
    fn header_security_roundtrip_no_crypto() {
        let mut tx = nr_entity();
        let mut rx = nr_entity();
        let pdu = tx.write_sdu(b"hello".to_vec(), None).unwrap();
        let delivered = rx.write_pdu(&pdu).unwrap();
        assert_eq!(delivered, vec![b"hello".to_vec()]);
    }

    #[test]
    fn integrity_protected_roundtrip() {
        let sec = SecurityContext {
            k_int: [9; 32],
            integrity_algo: IntegrityAlgo::AesCmac,
            ..SecurityContext::null()
        };
        let cfg = PdcpConfig {
            sn_len: SnWidth::Bits12,
            rb_type: RbType::Drb,
            variant: PdcpVariant::Nr,
            bearer_id: 1,
            direction: Direction::Uplink,
            t_reordering_ticks: 50,
            t_discard_ticks: None,
        };
        let mut tx = PdcpEntity::new(cfg, sec.clone(), TestSecurityProvider).unwrap();
        let mut rx = PdcpEntity::new(
            PdcpConfig {
                direction: Direction::Downlink,
                ..cfg
            },
            sec,
            TestSecurityProvider,
        )
        .unwrap();
        let pdu = tx.write_sdu(b"secure".to_vec(), None).unwrap();
        assert_eq!(rx.write_pdu(&pdu).unwrap(), vec![b"secure".to_vec()]);
    }

    #[test]
    fn integrity_mismatch_is_rejected() {
        let sec = SecurityContext {
            k_int: [9; 32],
            integrity_algo: IntegrityAlgo::AesCmac,
            ..SecurityContext::null()
        };
        let cfg = PdcpConfig {
            sn_len: SnWidth::Bits12,
            rb_type: RbType::Drb,
            variant: PdcpVariant::Nr,
            bearer_id: 1,
            direction: Direction::Uplink,
            t_reordering_ticks: 50,
            t_discard_ticks: None,
        };
        let mut tx = PdcpEntity::new(cfg, sec.clone(), TestSecurityProvider).unwrap();
        let mut rx = PdcpEntity::new(
            PdcpConfig {
                direction: Direction::Downlink,
                ..cfg
            },
            sec,
            TestSecurityProvider,
        )
        .unwrap();
        let mut pdu = tx.write_sdu(b"secure".to_vec(), None).unwrap();
        let last = pdu.len() - 1;
        pdu[last] ^= 0xff;
        assert_eq!(rx.write_pdu(&pdu).unwrap_err(), L2Error::IntegrityFailure);
    }

    #[test]
    fn nr_reordering_delivers_out_of_order_counts_after_expiry() {
        let mut tx = nr_entity();
        let mut rx = nr_entity();
        let pdus: Vec<Vec<u8>> = (0..4u8).map(|i| tx.write_sdu(vec![i], None).unwrap()).collect();

        assert_eq!(rx.write_pdu(&pdus[0]).unwrap(), vec![vec![0]]);
        assert_eq!(rx.write_pdu(&pdus[2]).unwrap(), Vec::<Vec<u8>>::new());
        assert_eq!(rx.write_pdu(&pdus[3]).unwrap(), Vec::<Vec<u8>>::new());

        let events = rx.step(50);
        assert_eq!(events.delivered_sdus, vec![vec![2], vec![3]]);
    }

    #[test]
    fn lte_discard_timer_fires_without_delivery() {
        let mut tx = lte_entity(Some(20));
        tx.write_sdu(b"a".to_vec(), None).unwrap();
        assert_eq!(tx.fms(), 0);
        let events = tx.step(20);
        assert_eq!(events.discarded_sns, vec![0]);
        assert_eq!(tx.fms(), 1); // nothing left undelivered -> fms tracks tx_next
    }

    #[test]
    fn notify_delivery_cancels_discard_timer() {
        let mut tx = lte_entity(Some(20));
        tx.write_sdu(b"a".to_vec(), None).unwrap();
        tx.notify_delivery(&[0]);
        let events = tx.step(20);
        assert!(events.discarded_sns.is_empty());
    }

    #[test]
    fn bearer_state_roundtrip_for_handover() {
        let mut tx = nr_entity();
        for i in 0..3u8 {
            tx.write_sdu(vec![i], None).unwrap();
        }
        let state = tx.get_bearer_state();
        assert_eq!(state.next_pdcp_tx_sn, 3);

        let mut target = nr_entity();
        target.set_bearer_state(state, true);
        assert_eq!(target.get_bearer_state().next_pdcp_tx_sn, 3);
        assert_eq!(target.fmc(), Some(state.last_submitted_pdcp_rx_sn));
    }

    #[test]
    fn reestablish_resets_all_state() {
        let mut tx = lte_entity(Some(20));
        tx.write_sdu(b"a".to_vec(), None).unwrap();
        tx.reestablish();
        assert_eq!(tx.get_bearer_state().next_pdcp_tx_sn, 0);
        assert!(tx.get_buffered_pdus().is_empty());
    }
}
