//! Data association.
//!
//! Decides which landmark a detection refers to. Every detection yields
//! exactly one [`AssociationDecision`]: an existing landmark, a newly
//! minted one, or a rejection.
//!
//! ```text
//!   detection ──▶ line override? ──▶ swath line? ──▶ manual table?
//!                                                        │ miss
//!                                                        ▼
//!                 identity hint passing the gate? ──▶ automatic gating
//!                                                        │
//!                              nearest under threshold ◀─┴─▶ none: mint / reject
//! ```
//!
//! Gating reads the last committed estimate only, never a solve in progress.

mod resolver;
mod seq_table;

pub use resolver::{
    AssociationConfig, AssociationContext, AssociationDecision, AssociationEngine,
    AssociationMethod, AssociationOutcome, RejectReason,
};
pub use seq_table::{ManualTarget, SeqSelector, SeqTable, SeqTableError, SwathTable};
