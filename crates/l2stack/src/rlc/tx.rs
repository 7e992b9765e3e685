//! The RLC-AM transmitter.
//!
//! Grounded on `tox-sequenced`'s `OutgoingMessage` (acked bitset, retransmit queue,
//! in-flight tracking) generalized from fragment-index ARQ to SN-space ARQ with
//! poll-driven status requests.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::error::L2Error;
use crate::flat_map::FlatMap;
use crate::rlc::header::{
    FramingInfo, LteDataHeader, NrDataHeader, SegmentIndicator, StatusPdu, decode_status_pdu,
};
use crate::rlc::{QueuedSdu, RetxEntry, RlcAmMetrics, RlcFlavor, SegmentRange, TxWindowEntry};
use crate::sn::{SnWidth, in_window, sn_less};
use crate::timer::{TickTimerWheel, TimerHandle};

/// Static configuration for one transmitter instance.
#[derive(Debug, Clone, Copy)]
pub struct TxConfig {
    pub sdu_queue_capacity: usize,
    pub poll_pdu: u32,
    pub poll_byte: u32,
    pub t_poll_retx_ticks: u64,
    pub max_retx_threshold: u32,
}

impl Default for TxConfig {
    /// TS 36.322/38.322 typical test-suite defaults.
    fn default() -> Self {
        Self {
            sdu_queue_capacity: 256,
            poll_pdu: 4,
            poll_byte: 25000,
            t_poll_retx_ticks: 80,
            max_retx_threshold: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    TxEnabled,
}

/// Per-grant byte budget the caller needs to drain the transmitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferState {
    pub newtx_bytes: usize,
    pub prio_bytes: usize,
}

/// Outcome of processing one peer status PDU.
#[derive(Debug, Clone, Default)]
pub struct AckOutcome {
    /// PDCP SNs now fully acknowledged (forward to `PdcpEntity::notify_delivery`).
    pub newly_delivered_pdcp_sns: Vec<u32>,
    /// Set when some SN's `retx_count` has just crossed `max_retx_threshold`;
    /// terminal for the bearer.
    pub max_retx_exceeded: Option<u32>,
}

pub struct RlcAmTx {
    flavor: RlcFlavor,
    sn_width: SnWidth,
    cfg: TxConfig,
    state: TxState,

    sdu_queue: VecDeque<QueuedSdu>,
    tx_window: FlatMap<u32, TxWindowEntry>,
    retx_queue: VecDeque<RetxEntry>,

    tx_next: u32,
    tx_next_ack: u32,

    pdu_without_poll: u32,
    byte_without_poll: u32,
    poll_sn: Option<u32>,

    timers: TickTimerWheel,
    poll_retx_timer: TimerHandle,

    pending_status: Option<Vec<u8>>,
    metrics: RlcAmMetrics,
    quiescent: bool,

    bsr_callback: Option<Box<dyn FnMut(BufferState)>>,
}

impl RlcAmTx {
    pub fn new(flavor: RlcFlavor, sn_width: SnWidth, cfg: TxConfig) -> Self {
        let mut timers = TickTimerWheel::new();
        let poll_retx_timer = timers.create(cfg.t_poll_retx_ticks);
        Self {
            flavor,
            sn_width,
            cfg,
            state: TxState::TxEnabled,
            sdu_queue: VecDeque::new(),
            tx_window: FlatMap::new(),
            retx_queue: VecDeque::new(),
            tx_next: 0,
            tx_next_ack: 0,
            pdu_without_poll: 0,
            byte_without_poll: 0,
            poll_sn: None,
            timers,
            poll_retx_timer,
            pending_status: None,
            metrics: RlcAmMetrics::default(),
            quiescent: false,
            bsr_callback: None,
        }
    }

    pub fn set_bsr_callback(&mut self, cb: impl FnMut(BufferState) + 'static) {
        self.bsr_callback = Some(Box::new(cb));
    }

    pub fn metrics(&self) -> RlcAmMetrics {
        self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = RlcAmMetrics::default();
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn window_size(&self) -> u32 {
        self.sn_width.window()
    }

    fn window_full(&self) -> bool {
        self.tx_next.wrapping_sub(self.tx_next_ack) & self.sn_width.mask() == self.window_size()
    }

    /// Enqueues an SDU for transmission. Fails with [`L2Error::QueueFull`] when the
    /// SDU queue is at capacity; otherwise always succeeds.
    pub fn write_sdu(&mut self, pdcp_sn: u32, data: Vec<u8>) -> Result<(), L2Error> {
        if self.sdu_queue.len() >= self.cfg.sdu_queue_capacity {
            return Err(L2Error::QueueFull);
        }
        self.sdu_queue.push_back(QueuedSdu::new(pdcp_sn, data));
        self.notify_bsr();
        Ok(())
    }

    /// Removes a queued SDU by PDCP SN iff it has not yet begun transmission;
    /// no-ops otherwise.
    pub fn discard_sdu(&mut self, pdcp_sn: u32) {
        if let Some(pos) = self
            .sdu_queue
            .iter()
            .position(|s| s.pdcp_sn == pdcp_sn && !s.started)
        {
            self.sdu_queue.remove(pos);
            self.notify_bsr();
        }
    }

    /// Drains the SDU queue unconditionally.
    pub fn empty_queue(&mut self) {
        self.sdu_queue.clear();
    }

    pub fn has_data(&self) -> bool {
        let state = self.get_buffer_state();
        state.newtx_bytes > 0 || state.prio_bytes > 0
    }

    pub fn get_buffer_state(&self) -> BufferState {
        let newtx_bytes = self.sdu_queue.iter().map(QueuedSdu::remaining).sum();
        let mut prio_bytes = self
            .pending_status
            .as_ref()
            .map(Vec::len)
            .unwrap_or_default();
        for entry in &self.retx_queue {
            prio_bytes += (entry.so_end - entry.so_start) as usize;
        }
        BufferState {
            newtx_bytes,
            prio_bytes,
        }
    }

    fn notify_bsr(&mut self) {
        if let Some(cb) = self.bsr_callback.as_mut() {
            let state_newtx = self.sdu_queue.iter().map(QueuedSdu::remaining).sum();
            let mut state_prio = self.pending_status.as_ref().map(Vec::len).unwrap_or_default();
            for entry in &self.retx_queue {
                state_prio += (entry.so_end - entry.so_start) as usize;
            }
            cb(BufferState {
                newtx_bytes: state_newtx,
                prio_bytes: state_prio,
            });
        }
    }

    /// Injects a status PDU produced by the paired [`super::rx::RlcAmRx`] half, to
    /// be sent with top priority on the next `read_pdu`.
    pub fn queue_status_pdu(&mut self, bytes: Vec<u8>) {
        self.pending_status = Some(bytes);
    }

    /// Builds one PDU no larger than `grant_bytes`. Empty when there is nothing to
    /// send, or when `grant_bytes` cannot even fit a minimal header.
    pub fn read_pdu(&mut self, grant_bytes: usize) -> Vec<u8> {
        if self.quiescent || grant_bytes == 0 {
            return Vec::new();
        }

        if let Some(status) = &self.pending_status {
            if status.len() <= grant_bytes {
                let bytes = self.pending_status.take().unwrap();
                trace!(len = bytes.len(), "sending status PDU");
                return bytes;
            }
        }

        if let Some(pdu) = self.build_retx_pdu(grant_bytes) {
            self.on_data_pdu_sent(pdu.len());
            return self.finalize_poll(pdu);
        }

        if self.window_full() {
            if let Some(pdu) = self.force_retransmit_oldest(grant_bytes) {
                self.on_data_pdu_sent(pdu.len());
                return self.finalize_poll(pdu);
            }
            return Vec::new();
        }

        if let Some(pdu) = self.pack_new_tx(grant_bytes) {
            self.on_data_pdu_sent(pdu.len());
            return self.finalize_poll(pdu);
        }

        Vec::new()
    }

    fn on_data_pdu_sent(&mut self, bytes: usize) {
        self.pdu_without_poll += 1;
        self.byte_without_poll += bytes as u32;
        self.metrics.tx_pdus += 1;
        self.metrics.tx_bytes += bytes as u64;
        self.notify_bsr();
    }

    /// Decides the poll bit and patches it into the already-encoded PDU.
    /// Patching the single poll-bit byte avoids re-running the whole header codec.
    fn finalize_poll(&mut self, mut pdu: Vec<u8>) -> Vec<u8> {
        let sdu_queue_empty = self.sdu_queue.is_empty();
        let retx_queue_empty = self.retx_queue.is_empty();
        let should_poll = self.pdu_without_poll >= self.cfg.poll_pdu
            || self.byte_without_poll >= self.cfg.poll_byte
            || sdu_queue_empty
            || retx_queue_empty
            || self.window_full();

        if should_poll && !pdu.is_empty() {
            let poll_bit = match self.flavor {
                RlcFlavor::Lte => 0x20,
                RlcFlavor::Nr => 0x40,
            };
            pdu[0] |= poll_bit;
            self.poll_sn = Some(self.tx_next.wrapping_sub(1) & self.sn_width.mask());
            self.pdu_without_poll = 0;
            self.byte_without_poll = 0;
            self.timers.run(self.poll_retx_timer, self.cfg.t_poll_retx_ticks);
            debug!(poll_sn = ?self.poll_sn, "poll bit set");
        }
        pdu
    }

    fn li_cost_bytes(n: usize) -> usize {
        (n * 12).div_ceil(8)
    }

    /// Packs one new-transmission PDU from the SDU queue, assigning it the next SN.
    /// LTE may concatenate several SDUs (with LI boundaries) or split the tail SDU
    /// across PDUs; NR carries at most one SDU/segment per PDU.
    fn pack_new_tx(&mut self, grant_bytes: usize) -> Option<Vec<u8>> {
        if self.sdu_queue.is_empty() {
            return None;
        }

        match self.flavor {
            RlcFlavor::Lte => self.pack_new_tx_lte(grant_bytes),
            RlcFlavor::Nr => self.pack_new_tx_nr(grant_bytes),
        }
    }

    fn pack_new_tx_lte(&mut self, grant_bytes: usize) -> Option<Vec<u8>> {
        let is_first = self.sdu_queue.front()?.offset == 0;
        let mut pieces: Vec<Vec<u8>> = Vec::new();
        let mut pdcp_sns: Vec<u32> = Vec::new();
        let mut last_piece_completed = false;
        let mut idx = 0usize;

        loop {
            if idx >= self.sdu_queue.len() {
                break;
            }
            let li_count = pieces.len();
            let header_len = crate::rlc::header::LTE_FIXED_HEADER_LEN + Self::li_cost_bytes(li_count);
            if header_len >= grant_bytes {
                break;
            }
            let used: usize = pieces.iter().map(Vec::len).sum();
            let remaining_budget = grant_bytes - header_len - used;
            if remaining_budget == 0 {
                break;
            }
            let sdu = &self.sdu_queue[idx];
            let avail = sdu.remaining();
            let take = avail.min(remaining_budget);
            if take == 0 {
                break;
            }
            pieces.push(sdu.data[sdu.offset..sdu.offset + take].to_vec());
            pdcp_sns.push(sdu.pdcp_sn);
            let completes = take == avail;
            last_piece_completed = completes;
            if completes {
                idx += 1;
            } else {
                break;
            }
        }

        if pieces.is_empty() {
            return None;
        }

        let is_last = last_piece_completed;
        let framing = match (is_first, is_last) {
            (true, true) => FramingInfo::FirstAndLast,
            (true, false) => FramingInfo::FirstOnly,
            (false, true) => FramingInfo::LastOnly,
            (false, false) => FramingInfo::Middle,
        };

        let length_indicators: Vec<u16> = if pieces.len() > 1 {
            pieces[..pieces.len() - 1]
                .iter()
                .map(|p| p.len() as u16)
                .collect()
        } else {
            Vec::new()
        };
        // Absolute offset of each piece boundary within the concatenated `sdu`,
        // so a later resegmented retransmission can recover the right subset.
        let li_offsets: Vec<u16> = length_indicators
            .iter()
            .scan(0u16, |acc, &li| {
                *acc += li;
                Some(*acc)
            })
            .collect();

        let sn = self.tx_next;
        let header = LteDataHeader {
            resegmented: false,
            poll: false,
            framing,
            sn: sn as u16,
            length_indicators,
            segment_offset: None,
        };
        let mut bytes = header.encode().ok()?;
        let mut sdu_bytes = Vec::new();
        for piece in &pieces {
            sdu_bytes.extend_from_slice(piece);
        }
        bytes.extend_from_slice(&sdu_bytes);

        // Consume the pieces from the real queue now that the PDU is committed.
        let completed_count = if last_piece_completed {
            pieces.len()
        } else {
            pieces.len() - 1
        };
        for _ in 0..completed_count {
            self.sdu_queue.pop_front();
        }
        if !last_piece_completed {
            let last_len = pieces.last().map(Vec::len).unwrap_or(0);
            let front = self.sdu_queue.front_mut().expect("partial piece implies a remaining queue entry");
            front.offset += last_len;
            front.started = true;
        }
        self.tx_window
            .insert(sn, TxWindowEntry::new(sn, pdcp_sns, sdu_bytes, li_offsets));
        self.tx_next = sn.wrapping_add(1) & self.sn_width.mask();
        Some(bytes)
    }

    fn pack_new_tx_nr(&mut self, grant_bytes: usize) -> Option<Vec<u8>> {
        let sdu = self.sdu_queue.front()?;
        let is_first = sdu.offset == 0;
        let sn_bits = self.sn_width.bits() as u8;
        let header_len_whole = crate::rlc::nr_fixed_header_len(self.sn_width);
        if header_len_whole >= grant_bytes {
            return None;
        }
        let budget_whole = grant_bytes - header_len_whole;
        let avail = sdu.remaining();

        let (take, needs_so) = if avail <= budget_whole {
            (avail, false)
        } else {
            let header_len_seg = header_len_whole + 2;
            if header_len_seg >= grant_bytes {
                return None;
            }
            (avail.min(grant_bytes - header_len_seg), true)
        };
        if take == 0 {
            return None;
        }

        let is_last = take == avail;
        let si = match (is_first, is_last) {
            (true, true) => SegmentIndicator::Whole,
            (true, false) => SegmentIndicator::First,
            (false, true) => SegmentIndicator::Last,
            (false, false) => SegmentIndicator::Middle,
        };

        let sn = self.tx_next;
        let segment_offset = if needs_so || si.carries_so() {
            Some(sdu.offset as u16)
        } else {
            None
        };
        let header = NrDataHeader {
            poll: false,
            si,
            sn_bits,
            sn,
            segment_offset,
        };
        let mut bytes = header.encode().ok()?;
        let payload = sdu.data[sdu.offset..sdu.offset + take].to_vec();
        bytes.extend_from_slice(&payload);

        let pdcp_sn = sdu.pdcp_sn;
        if is_last {
            self.sdu_queue.pop_front();
        } else {
            let front = self.sdu_queue.front_mut().unwrap();
            front.offset += take;
            front.started = true;
        }

        // NR assigns each segment its own SN, so the tracked range is the segment
        // itself, not the whole original SDU (unlike the LTE flavor above).
        self.tx_window
            .insert(sn, TxWindowEntry::new(sn, vec![pdcp_sn], payload, Vec::new()));
        self.tx_next = sn.wrapping_add(1) & self.sn_width.mask();
        Some(bytes)
    }

    /// Builds a retransmission PDU from the head of the retx queue, resegmenting
    /// further if the grant cannot carry the whole outstanding range.
    fn build_retx_pdu(&mut self, grant_bytes: usize) -> Option<Vec<u8>> {
        let entry = *self.retx_queue.front()?;
        let tx_entry = self.tx_window.get(&entry.sn)?;
        let original_len = tx_entry.sdu.len() as u16;
        let total = (entry.so_end - entry.so_start) as usize;

        let base_header_len = match self.flavor {
            RlcFlavor::Lte => crate::rlc::header::LTE_FIXED_HEADER_LEN,
            RlcFlavor::Nr => crate::rlc::nr_fixed_header_len(self.sn_width),
        };
        if base_header_len >= grant_bytes {
            return None;
        }

        let this_start = entry.so_start;
        // Most generous starting guess (as if neither the SO field nor any LI were
        // needed); the loop below only ever shrinks it, converging on the largest
        // range that actually fits once both are accounted for.
        let mut this_end = entry.so_start + total.min(grant_bytes - base_header_len) as u16;
        let mut length_indicators: Vec<u16> = if matches!(self.flavor, RlcFlavor::Lte) {
            tx_entry.length_indicators_for_range(this_start, this_end)
        } else {
            Vec::new()
        };

        // The header's real byte cost depends on whether this chosen sub-range
        // still spans the whole original SDU (no SO field needed) and how many
        // LIs the sub-range recovers — both of which depend on `this_end`. Shrink
        // `this_end` (dropping the trailing-most recovered LI first, then byte by
        // byte) until the header plus payload actually fits `grant_bytes`. Each
        // step strictly shrinks `this_end`, so this always terminates.
        loop {
            let is_last = this_end == original_len;
            let so_cost = if this_start == 0 && is_last { 0 } else { 2 };
            let li_cost = Self::li_cost_bytes(length_indicators.len());
            let used = base_header_len + so_cost + li_cost + (this_end - this_start) as usize;
            if used <= grant_bytes {
                break;
            }
            if length_indicators.pop().is_some() {
                this_end = length_indicators.last().copied().unwrap_or(this_start);
            } else if this_end > this_start {
                this_end -= 1;
            } else {
                return None;
            }
        }
        if this_end == this_start {
            return None;
        }

        let is_first = this_start == 0;
        let is_last = this_end == original_len;
        let resegmented = !(is_first && is_last);

        let tx_entry = self.tx_window.get(&entry.sn)?;
        let payload = tx_entry.sdu[this_start as usize..this_end as usize].to_vec();

        let bytes = match self.flavor {
            RlcFlavor::Lte => {
                let framing = match (is_first, is_last) {
                    (true, true) => FramingInfo::FirstAndLast,
                    (true, false) => FramingInfo::FirstOnly,
                    (false, true) => FramingInfo::LastOnly,
                    (false, false) => FramingInfo::Middle,
                };
                let header = LteDataHeader {
                    resegmented,
                    poll: false,
                    framing,
                    sn: entry.sn as u16,
                    length_indicators,
                    segment_offset: if resegmented { Some(this_start) } else { None },
                };
                let mut out = header.encode().ok()?;
                out.extend_from_slice(&payload);
                out
            }
            RlcFlavor::Nr => {
                let si = match (is_first, is_last) {
                    (true, true) => SegmentIndicator::Whole,
                    (true, false) => SegmentIndicator::First,
                    (false, true) => SegmentIndicator::Last,
                    (false, false) => SegmentIndicator::Middle,
                };
                let header = NrDataHeader {
                    poll: false,
                    si,
                    sn_bits: self.sn_width.bits() as u8,
                    sn: entry.sn,
                    segment_offset: if si.carries_so() { Some(this_start) } else { None },
                };
                let mut out = header.encode().ok()?;
                out.extend_from_slice(&payload);
                out
            }
        };

        self.retx_queue.pop_front();
        if this_end < entry.so_end {
            self.retx_queue.push_front(RetxEntry {
                sn: entry.sn,
                so_start: this_end,
                so_end: entry.so_end,
            });
        }
        Some(bytes)
    }

    /// Full-window behavior: instead of minting a new SN, retransmit
    /// the oldest fully-un-acked PDU whole, to force a status response.
    fn force_retransmit_oldest(&mut self, grant_bytes: usize) -> Option<Vec<u8>> {
        let sn = self.tx_next_ack;
        let entry = self.tx_window.get(&sn)?;
        let len = entry.sdu.len();
        let length_indicators: Vec<u16> = if matches!(self.flavor, RlcFlavor::Lte) {
            entry.length_indicators_for_range(0, len as u16)
        } else {
            Vec::new()
        };
        let li_cost = Self::li_cost_bytes(length_indicators.len());
        let header_len = match self.flavor {
            RlcFlavor::Lte => crate::rlc::header::LTE_FIXED_HEADER_LEN,
            RlcFlavor::Nr => crate::rlc::nr_fixed_header_len(self.sn_width),
        };
        if header_len + li_cost + len > grant_bytes {
            return None;
        }
        let payload = entry.sdu.clone();
        let bytes = match self.flavor {
            RlcFlavor::Lte => {
                let header = LteDataHeader {
                    resegmented: false,
                    poll: false,
                    framing: FramingInfo::FirstAndLast,
                    sn: sn as u16,
                    length_indicators,
                    segment_offset: None,
                };
                let mut out = header.encode().ok()?;
                out.extend_from_slice(&payload);
                out
            }
            RlcFlavor::Nr => {
                let header = NrDataHeader {
                    poll: false,
                    si: SegmentIndicator::Whole,
                    sn_bits: self.sn_width.bits() as u8,
                    sn,
                    segment_offset: None,
                };
                let mut out = header.encode().ok()?;
                out.extend_from_slice(&payload);
                out
            }
        };
        Some(bytes)
    }

    /// Parses a peer status PDU, applying ACKs/NACKs to the tx-window and retx
    /// queue.
    pub fn handle_control_pdu(&mut self, bytes: &[u8]) -> Result<AckOutcome, L2Error> {
        let status: StatusPdu = decode_status_pdu(bytes)?;
        let mut outcome = AckOutcome::default();

        if !in_window(status.ack_sn, self.tx_next_ack, self.sn_width)
            && status.ack_sn != self.tx_next
        {
            return Err(L2Error::protocol(format!(
                "ACK_SN {} outside tx window",
                status.ack_sn
            )));
        }

        let mut nacked_sns = std::collections::HashSet::new();
        for nack in &status.nacks {
            for k in 0..=nack.nack_range as u32 {
                nacked_sns.insert(nack.sn.wrapping_add(k) & self.sn_width.mask());
            }
        }

        // Cumulative ACK: every SN in [tx_next_ack, ack_sn) not named by a NACK is
        // fully acknowledged. Bounded by the window size so a malformed ACK_SN can
        // never spin this loop.
        let mut sn = self.tx_next_ack;
        let mut steps = 0u32;
        while sn != status.ack_sn && steps < self.sn_width.window() {
            if !nacked_sns.contains(&sn) {
                if let Some(entry) = self.tx_window.remove(&sn) {
                    outcome.newly_delivered_pdcp_sns.extend(entry.pdcp_sns);
                }
                self.retx_queue.retain(|e| e.sn != sn);
            }
            sn = sn.wrapping_add(1) & self.sn_width.mask();
            steps += 1;
        }

        for nack in &status.nacks {
            for k in 0..=nack.nack_range as u32 {
                let nacked_sn = nack.sn.wrapping_add(k) & self.sn_width.mask();
                let Some(entry) = self.tx_window.get_mut(&nacked_sn) else {
                    continue;
                };
                entry.retx_count += 1;
                if entry.retx_count > self.cfg.max_retx_threshold {
                    outcome.max_retx_exceeded = Some(nacked_sn);
                    self.quiescent = true;
                    warn!(sn = nacked_sn, "max retransmissions exceeded");
                    continue;
                }
                let (so_start, so_end) = nack
                    .so_range
                    .unwrap_or((0, entry.sdu.len() as u16));
                self.retx_queue.push_back(RetxEntry {
                    sn: nacked_sn,
                    so_start,
                    so_end,
                });
                entry.outstanding = smallvec::smallvec![SegmentRange { so_start, so_end }];
            }
        }

        // Advance tx_next_ack past whatever is no longer tracked.
        while !self.tx_window.contains_key(&self.tx_next_ack) && self.tx_next_ack != self.tx_next {
            self.tx_next_ack = self.tx_next_ack.wrapping_add(1) & self.sn_width.mask();
        }

        if let Some(poll_sn) = self.poll_sn {
            if !self.tx_window.contains_key(&poll_sn) || sn_less(status.ack_sn, poll_sn, self.sn_width) {
                self.poll_sn = None;
                self.timers.stop(self.poll_retx_timer);
            }
        }

        Ok(outcome)
    }

    /// Advances timers by `ticks`. If `t_poll_retx` has expired without an ACK for
    /// `POLL_SN`, schedules that PDU's byte range (or any un-acked PDU) for
    /// retransmission.
    pub fn step(&mut self, ticks: u64) {
        let expired = self.timers.step(ticks);
        if expired.contains(&self.poll_retx_timer) {
            self.on_poll_retx_expiry();
        }
    }

    fn on_poll_retx_expiry(&mut self) {
        let target_sn = self
            .poll_sn
            .filter(|sn| self.tx_window.contains_key(sn))
            .or_else(|| self.tx_window.keys().next().copied());

        if let Some(sn) = target_sn {
            if let Some(entry) = self.tx_window.get(&sn) {
                let so_end = entry.sdu.len() as u16;
                if !self.retx_queue.iter().any(|e| e.sn == sn) {
                    self.retx_queue.push_back(RetxEntry {
                        sn,
                        so_start: 0,
                        so_end,
                    });
                }
                debug!(sn, "t_poll_retx expired without ack, rescheduling");
            }
        }
    }

    /// Non-destructive reset: clears windows/queues and restarts SNs at 0, keeps
    /// configuration.
    pub fn reestablish(&mut self) {
        self.sdu_queue.clear();
        self.tx_window.clear();
        self.retx_queue.clear();
        self.tx_next = 0;
        self.tx_next_ack = 0;
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_sn = None;
        self.pending_status = None;
        self.quiescent = false;
        self.timers.stop(self.poll_retx_timer);
        self.state = TxState::TxEnabled;
    }

    pub fn stop(&mut self) {
        self.empty_queue();
        self.timers.stop(self.poll_retx_timer);
        self.state = TxState::Idle;
    }

    pub fn tx_next(&self) -> u32 {
        self.tx_next
    }

    pub fn tx_next_ack(&self) -> u32 {
        self.tx_next_ack
    }
}
