//! Narration State Machine
//!
//! Owns one [`NarrationSession`] per analysis job and publishes a snapshot to
//! observers after every change.
//!
//! # Rules
//!
//! - Moments only move forward; a backward request is ignored.
//! - `Transition` advances to `Analysis` by itself after a fixed delay.
//! - A session belongs to one job id. `reset` with a new id replaces it
//!   wholesale, and a timer armed for the old session never touches the new
//!   one.
//! - After `abort` nothing mutates the session again.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::NarrationConfig;
use crate::error::ClientError;
use crate::operation::{AsyncOperation, NarrationUpdate};

/// UX phase of a narrated analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationMoment {
    /// Reading the website
    Scraping,
    /// Short pause between scraping and analysis
    Transition,
    /// Narrating the analysis
    Analysis,
    /// Showing results; terminal
    Audiences,
}

impl NarrationMoment {
    /// Whether no further moment follows
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Audiences
    }
}

impl std::fmt::Display for NarrationMoment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Scraping => "scraping",
            Self::Transition => "transition",
            Self::Analysis => "analysis",
            Self::Audiences => "audiences",
        };
        f.write_str(label)
    }
}

/// Narration state of one analysis job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationSession {
    /// Job being narrated
    pub job_id: Option<String>,
    /// Current moment
    pub moment: NarrationMoment,
    /// Scraping text, words joined by single spaces
    pub scraping_narrative: String,
    /// Analysis text, chunks concatenated as received
    pub analysis_narrative: String,
    /// False once the backend said it has no narration for this flow
    pub narrative_available: bool,
}

impl NarrationSession {
    /// A fresh session in `Scraping`
    #[must_use]
    pub fn new(job_id: Option<String>) -> Self {
        Self {
            job_id,
            moment: NarrationMoment::Scraping,
            scraping_narrative: String::new(),
            analysis_narrative: String::new(),
            narrative_available: true,
        }
    }
}

struct ControllerState {
    session: NarrationSession,
    generation: u64,
}

struct ControllerInner {
    state: Mutex<ControllerState>,
    updates: watch::Sender<NarrationSession>,
    cancel: CancellationToken,
    transition_delay: Duration,
}

impl ControllerInner {
    /// Apply `change` unless aborted, then publish the result
    fn mutate(&self, change: impl FnOnce(&mut ControllerState)) {
        if self.cancel.is_cancelled() {
            return;
        }
        let snapshot = {
            let mut state = self.state.lock();
            change(&mut state);
            state.session.clone()
        };
        self.updates.send_replace(snapshot);
    }
}

fn advance(session: &mut NarrationSession, next: NarrationMoment) {
    if next > session.moment {
        tracing::debug!(from = %session.moment, to = %next, "Narration moment advanced");
        session.moment = next;
    } else if next < session.moment {
        tracing::debug!(current = %session.moment, requested = %next, "Ignoring backward narration moment");
    }
}

/// Drives a [`NarrationSession`]
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct NarrationController {
    inner: Arc<ControllerInner>,
}

impl NarrationController {
    /// Create a controller with no job attached
    #[must_use]
    pub fn new(config: &NarrationConfig) -> Self {
        Self::with_transition_delay(config.transition_delay)
    }

    /// Create a controller with an explicit transition delay
    #[must_use]
    pub fn with_transition_delay(transition_delay: Duration) -> Self {
        let session = NarrationSession::new(None);
        let (updates, _) = watch::channel(session.clone());
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ControllerState {
                    session,
                    generation: 0,
                }),
                updates,
                cancel: CancellationToken::new(),
                transition_delay,
            }),
        }
    }

    /// Current session
    #[must_use]
    pub fn session(&self) -> NarrationSession {
        self.inner.state.lock().session.clone()
    }

    /// Watch session snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NarrationSession> {
        self.inner.updates.subscribe()
    }

    /// Token that fires when the controller is aborted
    ///
    /// Feeds driven by this controller should run under a child of it.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    /// Start narrating `job_id`
    ///
    /// A different id replaces the session; the same id is a no-op.
    pub fn reset(&self, job_id: &str) {
        self.inner.mutate(|state| {
            if state.session.job_id.as_deref() == Some(job_id) {
                return;
            }
            tracing::debug!(job_id, "Narration session reset");
            state.generation += 1;
            state.session = NarrationSession::new(Some(job_id.to_string()));
        });
    }

    /// Append words to the scraping narrative
    pub fn push_scraping_word(&self, word: &str) {
        self.inner.mutate(|state| {
            let narrative = &mut state.session.scraping_narrative;
            for word in word.split_whitespace() {
                if !narrative.is_empty() {
                    narrative.push(' ');
                }
                narrative.push_str(word);
            }
        });
    }

    /// Append a pre-tokenized chunk to the analysis narrative
    ///
    /// Jumps to `Analysis` if the session is still earlier than that.
    pub fn push_analysis_chunk(&self, chunk: &str) {
        self.inner.mutate(|state| {
            state.session.analysis_narrative.push_str(chunk);
            advance(&mut state.session, NarrationMoment::Analysis);
        });
    }

    /// Scraping finished: enter `Transition` and arm the timer to `Analysis`
    ///
    /// Must be called within a tokio runtime.
    pub fn complete_scraping(&self) {
        let mut armed = None;
        self.inner.mutate(|state| {
            if state.session.moment < NarrationMoment::Transition {
                advance(&mut state.session, NarrationMoment::Transition);
                armed = Some(state.generation);
            }
        });
        let Some(generation) = armed else {
            return;
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => {}
                () = tokio::time::sleep(inner.transition_delay) => {
                    inner.mutate(|state| {
                        if state.generation == generation
                            && state.session.moment == NarrationMoment::Transition
                        {
                            advance(&mut state.session, NarrationMoment::Analysis);
                        }
                    });
                }
            }
        });
    }

    /// Analysis narration finished: show results
    pub fn complete_analysis(&self) {
        self.inner
            .mutate(|state| advance(&mut state.session, NarrationMoment::Audiences));
    }

    /// The backend has no narration for this flow: skip to results
    pub fn mark_unavailable(&self) {
        self.inner.mutate(|state| {
            tracing::info!(job_id = ?state.session.job_id, "Narration unavailable, skipping");
            state.session.narrative_available = false;
            advance(&mut state.session, NarrationMoment::Audiences);
        });
    }

    /// Stop all narration work; idempotent
    pub fn abort(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::debug!("Narration aborted");
            self.inner.cancel.cancel();
        }
    }

    /// Whether `abort` has been called
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Feed analysis narration from `feed` into this session
    ///
    /// Chunks go to the analysis channel and completion moves to
    /// `Audiences`. An unavailable feed flips `narrative_available` and
    /// returns `Ok`; aborting returns `Ok` as well.
    ///
    /// # Errors
    ///
    /// Any other [`ClientError`] from the feed.
    pub async fn run_analysis_feed(
        &self,
        feed: &(dyn AsyncOperation<Update = NarrationUpdate, Output = String>),
    ) -> Result<(), ClientError> {
        let cancel = self.cancel_token();
        let controller = self.clone();
        let mut on_update = move |update: NarrationUpdate| match update {
            NarrationUpdate::Chunk(chunk) => controller.push_analysis_chunk(&chunk),
            NarrationUpdate::Complete(_) => controller.complete_analysis(),
            NarrationUpdate::BusinessProfile(_) => {}
        };

        match feed.subscribe(&mut on_update, &cancel).await {
            Ok(_) | Err(ClientError::Aborted) => Ok(()),
            Err(ClientError::NarrationUnavailable) => {
                self.mark_unavailable();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for NarrationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrationController")
            .field("session", &self.session())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn controller() -> NarrationController {
        NarrationController::with_transition_delay(Duration::from_millis(20))
    }

    #[test]
    fn test_scraping_words_are_space_joined() {
        let c = controller();
        c.reset("j1");
        c.push_scraping_word("Reading ");
        c.push_scraping_word("  your   homepage");
        c.push_scraping_word("");
        assert_eq!(c.session().scraping_narrative, "Reading your homepage");
    }

    #[test]
    fn test_analysis_chunks_are_raw_and_jump_forward() {
        let c = controller();
        c.reset("j1");
        c.push_analysis_chunk("You sell ");
        c.push_analysis_chunk(" boats.");
        let session = c.session();
        assert_eq!(session.analysis_narrative, "You sell  boats.");
        assert_eq!(session.moment, NarrationMoment::Analysis);
    }

    #[test]
    fn test_moment_never_regresses() {
        let c = controller();
        c.reset("j1");
        c.complete_analysis();
        c.push_analysis_chunk("late");
        assert_eq!(c.session().moment, NarrationMoment::Audiences);
    }

    #[test]
    fn test_same_id_reset_is_noop() {
        let c = controller();
        c.reset("j1");
        c.push_scraping_word("kept");
        c.reset("j1");
        assert_eq!(c.session().scraping_narrative, "kept");

        c.reset("j2");
        assert_eq!(c.session(), NarrationSession::new(Some("j2".to_string())));
    }

    #[test]
    fn test_unavailable_skips_to_audiences() {
        let c = controller();
        c.reset("j1");
        c.mark_unavailable();
        let session = c.session();
        assert!(!session.narrative_available);
        assert_eq!(session.moment, NarrationMoment::Audiences);
    }

    #[test]
    fn test_abort_freezes_session() {
        let c = controller();
        c.reset("j1");
        c.abort();
        c.abort();
        c.push_scraping_word("ignored");
        c.reset("j2");
        assert_eq!(c.session().job_id.as_deref(), Some("j1"));
        assert_eq!(c.session().scraping_narrative, "");
    }

    #[tokio::test]
    async fn test_transition_advances_after_delay() {
        let c = controller();
        c.reset("j1");
        let mut rx = c.subscribe();
        c.complete_scraping();
        assert_eq!(c.session().moment, NarrationMoment::Transition);

        let session = rx
            .wait_for(|s| s.moment == NarrationMoment::Analysis)
            .await
            .unwrap()
            .clone();
        assert_eq!(session.job_id.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn test_stale_timer_leaves_new_session_alone() {
        let c = controller();
        c.reset("j1");
        c.complete_scraping();
        c.reset("j2");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(c.session().moment, NarrationMoment::Scraping);
    }
}
