//! # Updraft Approval Gate
//!
//! Human-in-the-loop decisions for the update lifecycle.
//!
//! ## Overview
//!
//! A decision request posts a [`Prompt`] through an [`ApprovalChannel`] and
//! registers a [`DecisionHandle`]. Awaiting the handle waits a bounded time
//! for the first accepted [`Signal`] and yields exactly one [`Decision`]:
//!
//! - `Approved`: the caller applies the decision and renders the outcome with
//!   [`ApprovalGate::conclude`]
//! - `Dismissed` / `Expired`: nothing is applied; the gate edits the prompt
//!
//! Deploy prompts for a server whose live occupancy exceeds its threshold
//! accept only the distinct override signal; a plain proceed is ignored.
//!
//! Outstanding waits are abandoned as `Expired` when the shutdown watch
//! channel passed to [`ApprovalGate::with_shutdown`] flips.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod channel;
pub mod error;
pub mod gate;
pub mod prompt;

pub use channel::{ApprovalChannel, SignalEvent};
pub use error::{ApprovalError, ChannelError, Result};
pub use gate::{
    ApprovalGate, Conclusion, Decision, DecisionContext, DecisionHandle, DecisionSubject,
};
pub use prompt::{Prompt, PromptField, Signal, Tone};
