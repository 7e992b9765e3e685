//! # l2stack
//!
//! A cellular Layer-2 protocol stack: a selective-repeat RLC Acknowledged-Mode
//! transmitter/receiver pair and a PDCP entity (LTE undelivered-queue and NR
//! reorder-queue variants), driven entirely by tick-based timers so the whole
//! stack is deterministic and testable without a wall clock.
//!
//! ## Architecture
//!
//! - **RLC-AM** ([`rlc`]): segmentation, selective-repeat ARQ, poll-driven status
//!   reporting, and SN-window arithmetic shared by the LTE and NR header flavors.
//! - **PDCP** ([`pdcp`]): header packing, COUNT/HFN derivation, replay-protected
//!   deciphering, integrity verification, in-order delivery, and discard timers.
//! - **Bearer glue** ([`bearer`]): wires one RLC-AM pair to one PDCP entity and
//!   exposes the collaborator contracts (upper-layer delivery, lower-layer framing)
//!   plus the RwLock-guarded bearer registry.
//! - **Shared primitives**: a byte-buffer arena with headroom ([`buffer`]), a
//!   tick-driven timer wheel ([`timer`]), a cooperative procedure scheduler
//!   ([`procedure`]), SN/COUNT arithmetic ([`sn`]), and a flat associative
//!   container for small SN-keyed windows ([`flat_map`]).

pub mod bearer;
pub mod buffer;
pub mod error;
pub mod flat_map;
pub mod pdcp;
pub mod procedure;
pub mod rlc;
pub mod sn;
pub mod timer;

pub use bearer::{Bearer, BearerConfig, BearerRegistry, NullUpperLayer, RlcMode, UpperLayer};
pub use error::L2Error;
pub use pdcp::{PdcpConfig, PdcpEntity, PdcpVariant, RbType, SecurityContext, SecurityProvider};
pub use rlc::rx::RlcAmRx;
pub use rlc::tx::RlcAmTx;
pub use rlc::RlcFlavor;
pub use sn::{Count, SnWidth};
