//! Narration
//!
//! Incremental text that tells the user what the AI pipeline is doing while a
//! website analysis runs. The UX moves through four moments:
//!
//! ```text
//! Scraping ──► Transition ──(timer)──► Analysis ──► Audiences
//!    │                                                 ▲
//!    └──────────── narration unavailable ──────────────┘
//! ```
//!
//! - [`controller`]: the moment state machine and its two text channels
//! - [`feed`]: where the analysis text comes from, either the live narration
//!   stream or the legacy poll-and-simulate fallback

pub mod controller;
pub mod feed;

pub use controller::{NarrationController, NarrationMoment, NarrationSession};
pub use feed::{split_tokens, LegacyNarration, LiveNarration, NarrationKind, NarrationRequest};
