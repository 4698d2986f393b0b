//! The per-block state transition pipeline.
//!
//! Sub-stages run in protocol order — safrole, disputes, guarantees,
//! assurances, accumulation, preimages — each reading and writing state
//! exclusively through the copy-on-write transition buffer. Any error aborts
//! the block; the buffer is dropped and the base state stays observable.

pub mod accumulate;
pub mod authorizations;
pub mod builder;
pub mod disputes;
pub mod import;
pub mod preimages;
pub mod reports;
pub mod safrole;

pub use accumulate::{AccumulateItem, AccumulateOutcome, DevServiceExecutor, ServiceExecutor};
pub use builder::{AuthorCredentials, BuildError, Mempool};
pub use import::{Chain, ImportOutcome, Stf};
pub use safrole::TicketRegistry;

use crate::codec::{DecodeError, EncodeError};
use crate::state::InvariantViolation;

/// VRF signing contexts. The entropy index inside each context is chosen so
/// the value seen at ticket submission (η₂) equals the value seen at sealing
/// one epoch later (η₃).
pub const TICKET_SEAL_CONTEXT: &[u8] = b"jam_ticket_seal";
pub const FALLBACK_SEAL_CONTEXT: &[u8] = b"jam_fallback_seal";
pub const ENTROPY_CONTEXT: &[u8] = b"jam_entropy";

/// Ed25519 signing contexts.
pub const GUARANTEE_CONTEXT: &[u8] = b"jam_guarantee";
pub const AVAILABLE_CONTEXT: &[u8] = b"jam_available";
pub const VALID_CONTEXT: &[u8] = b"jam_valid";
pub const INVALID_CONTEXT: &[u8] = b"jam_invalid";

#[derive(Debug, thiserror::Error)]
pub enum StfError {
    #[error("block decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Header(#[from] import::HeaderError),
    #[error(transparent)]
    Safrole(#[from] safrole::SafroleError),
    #[error(transparent)]
    Disputes(#[from] disputes::DisputeError),
    #[error(transparent)]
    Reports(#[from] reports::ReportsError),
    #[error(transparent)]
    Preimages(#[from] preimages::PreimageError),
    #[error("posterior state violates an invariant: {0}")]
    Invariant(#[from] InvariantViolation),
}
