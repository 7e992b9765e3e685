//! Collaborator contracts and the bearer registry.
//!
//! Grounded on `tox-sequenced`'s `session.rs` for the plain-struct-construction
//! idiom and the `Arc<dyn ...>` collaborator-handle pattern (there:
//! `time_provider: Arc<dyn TimeProvider>`; here: the upper-layer handle).

use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use crate::error::L2Error;
use crate::flat_map::FlatMap;
use crate::pdcp::{
    BearerState, CipherAlgo, Direction, IntegrityAlgo, PdcpConfig, PdcpEntity, PdcpMetrics,
    PdcpVariant, RbType, SecurityContext, SecurityProvider,
};
use crate::rlc::rx::{RlcAmRx, RxConfig};
use crate::rlc::tx::{AckOutcome, BufferState, RlcAmTx, TxConfig};
use crate::rlc::RlcFlavor;
use crate::sn::SnWidth;

/// A single status PDU is small; this bounds how much of a grant `step` spends
/// opportunistically building one when `t_status_prohibit` allows it.
const MAX_STATUS_PDU_BYTES: usize = 64;

/// Upper-layer (RRC/GW) collaborator contract.
pub trait UpperLayer: Send + Sync {
    /// A PDCP SDU is ready for upward delivery.
    fn write_pdu(&self, lcid: u8, sdu: Vec<u8>);
    /// A received PDU failed MAC verification.
    fn notify_integrity_error(&self, lcid: u8);
    /// An RLC-AM SN exceeded `max_retx_threshold`; the bearer is now terminal.
    fn max_retx_attempted(&self, lcid: u8);
    /// A peer status PDU was inconsistent with local state.
    fn protocol_failure(&self, lcid: u8);
}

/// A no-op upper layer, useful for tests and for bearers that only ferry metrics.
#[derive(Debug, Default)]
pub struct NullUpperLayer;

impl UpperLayer for NullUpperLayer {
    fn write_pdu(&self, _lcid: u8, _sdu: Vec<u8>) {}
    fn notify_integrity_error(&self, _lcid: u8) {}
    fn max_retx_attempted(&self, _lcid: u8) {}
    fn protocol_failure(&self, _lcid: u8) {}
}

/// The RLC mode a bearer is configured for. Only `Am` is actually wired up;
/// `Tm`/`Um` are carried in the data model so configuration round-trips, but
/// constructing a bearer with either is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlcMode {
    Tm,
    Um,
    Am,
}

/// Wraps a boxed [`SecurityProvider`] so heterogeneous bearers (different crypto
/// back ends per bearer) can share one [`BearerRegistry`] type.
pub struct DynSecurityProvider(pub Box<dyn SecurityProvider + Send + Sync>);

impl SecurityProvider for DynSecurityProvider {
    fn integrity_generate(
        &self,
        algo: IntegrityAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
    ) -> [u8; 4] {
        self.0.integrity_generate(algo, key, count, bearer, direction, msg)
    }

    fn integrity_verify(
        &self,
        algo: IntegrityAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
        mac: &[u8; 4],
    ) -> bool {
        self.0.integrity_verify(algo, key, count, bearer, direction, msg, mac)
    }

    fn cipher_encrypt(
        &self,
        algo: CipherAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        msg: &[u8],
    ) -> Vec<u8> {
        self.0.cipher_encrypt(algo, key, count, bearer, direction, msg)
    }

    fn cipher_decrypt(
        &self,
        algo: CipherAlgo,
        key: &[u8; 32],
        count: u32,
        bearer: u8,
        direction: Direction,
        ct: &[u8],
    ) -> Vec<u8> {
        self.0.cipher_decrypt(algo, key, count, bearer, direction, ct)
    }
}

/// Static configuration for one radio bearer, flattened into the concrete
/// sub-configs each component expects.
#[derive(Debug, Clone)]
pub struct BearerConfig {
    /// Purely for log readability; not semantically load-bearing.
    pub name: String,
    pub lcid: u8,
    pub rb_type: RbType,
    pub rlc_mode: RlcMode,
    pub rlc_flavor: RlcFlavor,
    pub rlc_sn_len: SnWidth,
    pub pdcp_sn_len: SnWidth,
    pub pdcp_variant: PdcpVariant,
    pub direction: Direction,
    pub tx: TxConfig,
    pub rx: RxConfig,
    pub t_reordering_ticks: u64,
    pub t_discard_ticks: Option<u64>,
    pub security: SecurityContext,
}

/// One configured radio bearer: the RLC-AM tx/rx pair plus its PDCP entity, wired
/// together into a single transmit/receive path.
pub struct Bearer {
    cfg: BearerConfig,
    tx: RlcAmTx,
    rx: RlcAmRx,
    pdcp: PdcpEntity<DynSecurityProvider>,
    upper: Arc<dyn UpperLayer>,
    stopped: bool,
}

impl Bearer {
    pub fn new(
        cfg: BearerConfig,
        provider: Box<dyn SecurityProvider + Send + Sync>,
        upper: Arc<dyn UpperLayer>,
    ) -> Result<Self, L2Error> {
        if cfg.rlc_mode != RlcMode::Am {
            return Err(L2Error::ConfigError(
                "only rlc_mode=Am is implemented in this core".into(),
            ));
        }
        let pdcp_cfg = PdcpConfig {
            sn_len: cfg.pdcp_sn_len,
            rb_type: cfg.rb_type,
            variant: cfg.pdcp_variant,
            bearer_id: cfg.lcid,
            direction: cfg.direction,
            t_reordering_ticks: cfg.t_reordering_ticks,
            t_discard_ticks: cfg.t_discard_ticks,
        };
        let pdcp = PdcpEntity::new(pdcp_cfg, cfg.security.clone(), DynSecurityProvider(provider))?;
        let tx = RlcAmTx::new(cfg.rlc_flavor, cfg.rlc_sn_len, cfg.tx);
        let rx = RlcAmRx::new(cfg.rlc_flavor, cfg.rlc_sn_len, cfg.rx);
        Ok(Self {
            cfg,
            tx,
            rx,
            pdcp,
            upper,
            stopped: false,
        })
    }

    pub fn lcid(&self) -> u8 {
        self.cfg.lcid
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Upper-layer -> PDCP -> RLC-AM tx queue.
    pub fn write_sdu(&mut self, data: Vec<u8>) -> Result<(), L2Error> {
        if self.stopped {
            return Err(L2Error::protocol("bearer stopped"));
        }
        let sn = self.pdcp.get_bearer_state().next_pdcp_tx_sn;
        let pdu = self.pdcp.write_sdu(data, None)?;
        self.tx.write_sdu(sn, pdu)
    }

    pub fn read_pdu(&mut self, grant_bytes: usize) -> Vec<u8> {
        self.tx.read_pdu(grant_bytes)
    }

    pub fn has_data(&self) -> bool {
        self.tx.has_data()
    }

    pub fn get_buffer_state(&self) -> BufferState {
        self.tx.get_buffer_state()
    }

    /// MAC -> RLC-AM -> PDCP -> upper-layer receive path. Dispatches on the D/C
    /// bit: data PDUs go to the receiver, status PDUs go to the transmitter's ARQ
    /// bookkeeping.
    pub fn on_pdu_from_mac(&mut self, bytes: &[u8]) -> Result<(), L2Error> {
        if bytes.is_empty() {
            return Err(L2Error::parse("empty PDU from MAC"));
        }
        if bytes[0] & 0x80 != 0 {
            self.rx.write_pdu(bytes)?;
            while let Some(pdcp_pdu) = self.rx.take_sdu() {
                match self.pdcp.write_pdu(&pdcp_pdu) {
                    Ok(sdus) => {
                        for sdu in sdus {
                            self.upper.write_pdu(self.cfg.lcid, sdu);
                        }
                    }
                    Err(L2Error::IntegrityFailure) => {
                        self.upper.notify_integrity_error(self.cfg.lcid);
                    }
                    Err(err) => {
                        warn!(lcid = self.cfg.lcid, %err, "dropping undecodable pdcp pdu");
                    }
                }
            }
        } else {
            match self.tx.handle_control_pdu(bytes) {
                Ok(AckOutcome {
                    newly_delivered_pdcp_sns,
                    max_retx_exceeded,
                }) => {
                    if !newly_delivered_pdcp_sns.is_empty() {
                        self.pdcp.notify_delivery(&newly_delivered_pdcp_sns);
                    }
                    if let Some(sn) = max_retx_exceeded {
                        self.pdcp.notify_failure(&[sn]);
                        self.stopped = true;
                        error!(lcid = self.cfg.lcid, sn, "max retransmissions exceeded");
                        self.upper.max_retx_attempted(self.cfg.lcid);
                    }
                }
                Err(_) => self.upper.protocol_failure(self.cfg.lcid),
            }
        }
        Ok(())
    }

    /// Advances every timer owned by this bearer by `ticks` and drains whatever
    /// they release: discard-expired SNs are forwarded to RLC, `t_reordering`
    /// releases go straight upward, and a prohibit-timer-cleared pending status PDU
    /// is queued for the next `read_pdu`.
    pub fn step(&mut self, ticks: u64) {
        self.rx.step(ticks);
        if self.rx.has_pending_status() {
            if let Some(status) = self.rx.build_status_pdu(MAX_STATUS_PDU_BYTES) {
                self.tx.queue_status_pdu(status);
            }
        }
        self.tx.step(ticks);

        let events = self.pdcp.step(ticks);
        for sn in events.discarded_sns {
            self.tx.discard_sdu(sn);
        }
        for sdu in events.delivered_sdus {
            self.upper.write_pdu(self.cfg.lcid, sdu);
        }
    }

    pub fn rlc_metrics(&self) -> (crate::rlc::RlcAmMetrics, crate::rlc::RlcAmMetrics) {
        (self.tx.metrics(), self.rx.metrics())
    }

    pub fn reset_metrics(&mut self) {
        self.tx.reset_metrics();
        self.rx.reset_metrics();
    }

    pub fn pdcp_metrics(&self) -> PdcpMetrics {
        self.pdcp.metrics()
    }

    pub fn get_bearer_state(&self) -> BearerState {
        self.pdcp.get_bearer_state()
    }

    pub fn set_bearer_state(&mut self, state: BearerState, set_fmc: bool) {
        self.pdcp.set_bearer_state(state, set_fmc);
    }

    pub fn get_buffered_pdus(&self) -> Vec<(u32, Vec<u8>)> {
        self.pdcp.get_buffered_pdus()
    }

    pub fn send_status_report(&self) -> Result<Vec<u8>, L2Error> {
        self.pdcp.send_status_report()
    }

    pub fn handle_status_report_pdu(&mut self, bytes: &[u8]) -> Result<(), L2Error> {
        self.pdcp.handle_status_report_pdu(bytes)
    }

    /// Clears windows, restarts SNs at 0, keeps security config.
    pub fn reestablish(&mut self) {
        self.tx.reestablish();
        self.rx.reestablish();
        self.pdcp.reestablish();
        self.stopped = false;
        info!(lcid = self.cfg.lcid, name = %self.cfg.name, "bearer reestablished");
    }

    pub fn stop(&mut self) {
        self.tx.stop();
        self.stopped = true;
    }
}

/// The set of configured bearers, guarded by a reader-writer lock so a separate I/O
/// thread may enumerate bearers without tearing while the owning entity thread
/// drives tick/PDU processing.
pub struct BearerRegistry {
    bearers: RwLock<FlatMap<u8, Bearer>>,
}

impl Default for BearerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BearerRegistry {
    pub fn new() -> Self {
        Self {
            bearers: RwLock::new(FlatMap::new()),
        }
    }

    pub fn add_bearer(&self, bearer: Bearer) -> Result<(), L2Error> {
        let lcid = bearer.lcid();
        let mut guard = self.bearers.write().expect("bearer registry lock poisoned");
        if guard.contains_key(&lcid) {
            return Err(L2Error::ConfigError(format!("lcid {lcid} already configured")));
        }
        guard.insert(lcid, bearer);
        Ok(())
    }

    pub fn del_bearer(&self, lcid: u8) -> bool {
        self.bearers
            .write()
            .expect("bearer registry lock poisoned")
            .remove(&lcid)
            .is_some()
    }

    pub fn contains(&self, lcid: u8) -> bool {
        self.bearers.read().expect("bearer registry lock poisoned").contains_key(&lcid)
    }

    pub fn len(&self) -> usize {
        self.bearers.read().expect("bearer registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with exclusive access to one bearer's state. Returns `None` if
    /// `lcid` isn't configured.
    pub fn with_bearer_mut<R>(&self, lcid: u8, f: impl FnOnce(&mut Bearer) -> R) -> Option<R> {
        let mut guard = self.bearers.write().expect("bearer registry lock poisoned");
        guard.get_mut(&lcid).map(f)
    }

    /// Advances every configured bearer's timers by `ticks`.
    pub fn step_all(&self, ticks: u64) {
        let mut guard = self.bearers.write().expect("bearer registry lock poisoned");
        for (_, bearer) in guard.iter_mut() {
            bearer.step(ticks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdcp::security::TestSecurityProvider;

    fn test_config(lcid: u8) -> BearerConfig {
        BearerConfig {
            name: format!("drb{lcid}"),
            lcid,
            rb_type: RbType::Drb,
            rlc_mode: RlcMode::Am,
            rlc_flavor: RlcFlavor::Nr,
            rlc_sn_len: SnWidth::Bits12,
            pdcp_sn_len: SnWidth::Bits12,
            pdcp_variant: PdcpVariant::Nr,
            direction: Direction::Uplink,
            tx: TxConfig::default(),
            rx: RxConfig::default(),
            t_reordering_ticks: 50,
            t_discard_ticks: None,
            security: SecurityContext::null(),
        }
    }

    fn bearer(lcid: u8) -> Bearer {
        Bearer::new(test_config(lcid), Box::new(TestSecurityProvider), Arc::new(NullUpperLayer)).unwrap()
    }

    #[test]
    fn end_to_end_sdu_roundtrip_through_rlc_and_pdcp() {
        let mut tx_bearer = bearer(3);
        let mut rx_bearer = bearer(3);
        tx_bearer.write_sdu(b"hello from rrc".to_vec()).unwrap();
        let pdu = tx_bearer.read_pdu(1500);
        assert!(!pdu.is_empty());
        rx_bearer.on_pdu_from_mac(&pdu).unwrap();
    }

    #[test]
    fn registry_rejects_duplicate_lcid() {
        let registry = BearerRegistry::new();
        registry.add_bearer(bearer(5)).unwrap();
        assert!(registry.add_bearer(bearer(5)).is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.del_bearer(5));
        assert!(registry.is_empty());
    }

    #[test]
    fn wrong_rlc_mode_is_rejected_at_construction() {
        let mut cfg = test_config(1);
        cfg.rlc_mode = RlcMode::Um;
        let err = Bearer::new(cfg, Box::new(TestSecurityProvider), Arc::new(NullUpperLayer)).unwrap_err();
        assert!(matches!(err, L2Error::ConfigError(_)));
    }
}
