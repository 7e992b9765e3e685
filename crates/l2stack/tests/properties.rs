//! Randomized checks for cross-cutting invariants: SN-window arithmetic, tx-window
//! sizing, discard visibility, lossy ARQ delivery, and reestablish resets.
//!
//! SN arithmetic gets exhaustive proptest coverage since it is pure and cheap to
//! check on every input; the RLC-AM ARQ loop is checked instead with seeded,
//! reproducible loss injection (`StdRng::seed_from_u64`), since a `proptest!`
//! shrinker over a whole transmit/receive run is more friction than it's worth for
//! a stateful protocol loop.

use l2stack::rlc::header::{decode_status_pdu, encode_status_pdu, StatusPdu};
use l2stack::rlc::rx::RxConfig;
use l2stack::rlc::tx::TxConfig;
use l2stack::sn::{in_window, sn_add, sn_less};
use l2stack::{RlcAmRx, RlcAmTx, RlcFlavor, SnWidth};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn widths() -> impl Strategy<Value = SnWidth> {
    prop_oneof![
        Just(SnWidth::Bits5),
        Just(SnWidth::Bits7),
        Just(SnWidth::Bits10),
        Just(SnWidth::Bits12),
        Just(SnWidth::Bits18),
    ]
}

proptest! {
    /// `sn_less` is a strict, asymmetric, modular-window order: `a` can't be both
    /// less than and not-less-than `b`, and a SN is never less than itself.
    #[test]
    fn sn_less_is_irreflexive_and_antisymmetric(w in widths(), a in 0u32..1 << 18, b in 0u32..1 << 18) {
        let a = a & w.mask();
        let b = b & w.mask();
        prop_assert!(!sn_less(a, a, w));
        if a != b {
            prop_assert!(!(sn_less(a, b, w) && sn_less(b, a, w)));
        }
    }

    /// `in_window(sn, base, w)` holds for exactly the first `M` SNs counting up from
    /// `base`, and not for the `M` after that.
    #[test]
    fn in_window_covers_exactly_m_sns(w in widths(), base in 0u32..1 << 18, k in 0u32..1 << 19) {
        let base = base & w.mask();
        let sn = sn_add(base, k % w.modulus(), w);
        let expected = (k % w.modulus()) < w.window();
        prop_assert_eq!(in_window(sn, base, w), expected);
    }

    /// `sn_add` round-trips through `sn_less`: adding a positive step smaller than
    /// the window always moves a SN strictly forward in modular order.
    #[test]
    fn sn_add_moves_forward_within_window(w in widths(), base in 0u32..1 << 18, step in 1u32..1 << 17) {
        let base = base & w.mask();
        let step = 1 + step % (w.window() - 1).max(1);
        let next = sn_add(base, step, w);
        prop_assert!(sn_less(base, next, w));
    }

    /// Discarding a queued SDU before it begins transmission means no later
    /// `read_pdu` call, at any grant size, ever emits bytes carrying it.
    #[test]
    fn discard_before_send_is_never_observed_on_the_wire(
        grant in 1usize..64,
        marker in 1u8..=255,
    ) {
        let mut tx = RlcAmTx::new(RlcFlavor::Nr, SnWidth::Bits12, TxConfig::default());
        tx.write_sdu(0, vec![marker; 5]).unwrap();
        tx.discard_sdu(0);
        let pdu = tx.read_pdu(grant);
        prop_assert!(!pdu.iter().any(|&b| b == marker));
    }
}

/// `(TX_NEXT - TX_NEXT_ACK) mod 2^W <= M` must hold after every `write_sdu`,
/// `read_pdu`, and processed status PDU, across a seeded randomized ACK/NACK
/// sequence.
#[test]
fn tx_window_never_exceeds_half_the_sn_space() {
    for seed in 0..16u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let width = SnWidth::Bits10;
        let m = width.window();
        let mut tx = RlcAmTx::new(RlcFlavor::Lte, width, TxConfig::default());

        let mut next_pdcp_sn = 0u32;
        for _ in 0..500 {
            if rng.gen_bool(0.6) {
                let _ = tx.write_sdu(next_pdcp_sn, vec![rng.gen::<u8>()]);
                next_pdcp_sn = next_pdcp_sn.wrapping_add(1);
            }
            let pdu = tx.read_pdu(50);
            assert!((tx.tx_next().wrapping_sub(tx.tx_next_ack()) & width.mask()) <= m);

            if !pdu.is_empty() && rng.gen_bool(0.3) {
                let ack_sn = tx.tx_next();
                let status = StatusPdu {
                    ack_sn,
                    nacks: vec![],
                };
                let bytes = encode_status_pdu(&status, 64, 0);
                let _ = tx.handle_control_pdu(&bytes);
            }
            assert!((tx.tx_next().wrapping_sub(tx.tx_next_ack()) & width.mask()) <= m);
        }
    }
}

/// A seeded random-loss ARQ run between a real tx/rx pair must, after every
/// NACKed SN is retransmitted and delivered, reproduce exactly the original SDU
/// byte sequence in SN order, regardless of which SNs the "air interface" dropped.
#[test]
fn lossy_arq_loop_eventually_delivers_every_sdu_in_order() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let width = SnWidth::Bits10;
        let mut tx = RlcAmTx::new(RlcFlavor::Nr, width, TxConfig::default());
        let mut rx = RlcAmRx::new(RlcFlavor::Nr, width, RxConfig::default());

        let sdu_count = 20u32;
        let expected: Vec<Vec<u8>> = (0..sdu_count).map(|i| vec![i as u8; 1 + (i as usize % 4)]).collect();
        for (sn, sdu) in expected.iter().enumerate() {
            tx.write_sdu(sn as u32, sdu.clone()).unwrap();
        }

        let mut in_flight: Vec<Vec<u8>> = Vec::new();
        for _ in 0..sdu_count {
            let pdu = tx.read_pdu(64);
            if !pdu.is_empty() {
                in_flight.push(pdu);
            }
        }

        // Randomized loss: drop roughly a third of the original transmissions.
        for pdu in in_flight.drain(..) {
            if !rng.gen_bool(0.33) {
                rx.write_pdu(&pdu).unwrap();
            }
        }

        // Let t_reassembly fire, exchange a status report, retransmit, and repeat
        // until nothing is left to drive.
        for _ in 0..10 {
            rx.step(35);
            if let Some(status) = rx.build_status_pdu(512) {
                tx.handle_control_pdu(&status).unwrap();
            }
            loop {
                let retx = tx.read_pdu(64);
                if retx.is_empty() {
                    break;
                }
                rx.write_pdu(&retx).unwrap();
            }
            rx.step(1);
        }

        let mut delivered = Vec::new();
        while let Some(sdu) = rx.take_sdu() {
            delivered.push(sdu);
        }
        assert_eq!(delivered, expected, "seed {seed} diverged from the original SDU sequence");
    }
}

/// `reestablish()` is a full reset of transient state. Configuration (SN width,
/// timer durations) survives; SN counters, windows, and queues do not.
#[test]
fn reestablish_zeroes_every_counter_on_both_halves() {
    let width = SnWidth::Bits12;
    let mut tx = RlcAmTx::new(RlcFlavor::Nr, width, TxConfig::default());
    let mut rx = RlcAmRx::new(RlcFlavor::Nr, width, RxConfig::default());

    for sn in 0..10u32 {
        tx.write_sdu(sn, vec![sn as u8]).unwrap();
        let pdu = tx.read_pdu(64);
        if sn != 3 {
            rx.write_pdu(&pdu).unwrap();
        }
    }
    rx.step(35);
    assert!(rx.has_pending_status());

    tx.reestablish();
    rx.reestablish();

    assert_eq!(tx.tx_next(), 0);
    assert_eq!(tx.tx_next_ack(), 0);
    assert_eq!(rx.rx_next(), 0);
    assert!(!rx.has_pending_status());
    assert_eq!(rx.get_rx_buffered_bytes(), 0);
}
