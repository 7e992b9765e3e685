//! Repeated NACKs against the same SN eventually cross `max_retx_threshold`,
//! terminating the transmitter.

use l2stack::rlc::header::{encode_status_pdu, NackRecord, StatusPdu};
use l2stack::rlc::tx::TxConfig;
use l2stack::{RlcAmTx, RlcFlavor, SnWidth};

#[test]
fn exceeding_max_retx_threshold_quiesces_the_transmitter() {
    let width = SnWidth::Bits10;
    let cfg = TxConfig {
        max_retx_threshold: 4,
        ..TxConfig::default()
    };
    let mut tx = RlcAmTx::new(RlcFlavor::Lte, width, cfg);

    tx.write_sdu(0, vec![1, 2, 3]).unwrap();
    assert!(!tx.read_pdu(100).is_empty());

    let nack = StatusPdu {
        ack_sn: 1,
        nacks: vec![NackRecord {
            sn: 0,
            so_range: None,
            nack_range: 0,
        }],
    };
    let nack_bytes = encode_status_pdu(&nack, 1500, 0);

    for attempt in 1..=4u32 {
        let outcome = tx.handle_control_pdu(&nack_bytes).unwrap();
        assert!(
            outcome.max_retx_exceeded.is_none(),
            "should not exceed threshold on attempt {attempt}"
        );
        // Re-send whatever the NACK scheduled so the loop mirrors a real ARQ cycle.
        let retx = tx.read_pdu(100);
        assert!(!retx.is_empty());
    }

    // The 5th NACK against the same SN pushes retx_count past the threshold.
    let outcome = tx.handle_control_pdu(&nack_bytes).unwrap();
    assert_eq!(outcome.max_retx_exceeded, Some(0));

    // The transmitter is now quiescent: no more PDUs, even with data queued.
    tx.write_sdu(1, vec![9]).unwrap();
    assert!(tx.read_pdu(100).is_empty());
}
