//! Game session state machine.
//!
//! Sequences one turn at a time: capture → post-process → score → commit.
//! The first player after a reset is the leader and scores 1.0 by definition;
//! every challenger is compared against the first leader in the roster.
//! Collaborator failures never escape: they are recorded in `last_error`
//! and the session stays usable. Only contract violations (overlapping
//! captures, committing mid-capture) are returned as [`SessionError`].

use crate::bridge::{BridgeError, CaptureCompletionBridge};
use crate::ports::{
    CameraCollaborator, EmotionScoringCollaborator, FilesystemCollaborator, FsError, ScoringError,
};
use crate::postprocess::{ImagePostProcessor, PostProcessError, ProcessedImage};
use crate::scorer::{EmotionScorer, MeanAbsoluteScorer};
use crate::types::{CaptureOutcome, EmotionVector, Player};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Contract violations. These are caller bugs, not recoverable turn failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a capture is already in progress")]
    CaptureInFlight,
    #[error("current player has no photo to score")]
    NoPhoto,
    #[error("current player is already scored")]
    AlreadyScored,
}

impl From<BridgeError> for SessionError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::CaptureInFlight => SessionError::CaptureInFlight,
        }
    }
}

/// Recoverable per-turn failures. The display text is what lands in `last_error`.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("{0}")]
    CaptureFailed(String),
    #[error("photo post-processing failed: {0}")]
    PostProcess(#[from] PostProcessError),
    #[error("photo storage failed: {0}")]
    Filesystem(#[from] FsError),
    #[error("post-processing worker failed: {0}")]
    Worker(String),
    #[error("{0}")]
    Scoring(#[from] ScoringError),
    #[error("no leader in the roster to compare against")]
    NoLeader,
    #[error("the leader has no emotion scores to compare against")]
    LeaderUnscored,
}

/// What a single capture or scoring attempt ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnReport {
    Cancelled,
    /// Capture, post-processing or storage failed; the turn can be retried.
    CaptureFailed(String),
    /// The service found no face. Emotion and score stay unset.
    NoFaceDetected,
    Scored { emotion: EmotionVector, score: f64 },
    /// Photo kept but no score: the scoring call or leader lookup failed.
    Unscored(String),
    /// The game was reset while this attempt was running; its result was dropped.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GamePhase {
    AwaitingLeaderCapture,
    AwaitingChallengerCapture,
}

/// Change notification emitted after each state mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    CaptureStarted,
    CurrentUpdated,
    ErrorChanged(Option<String>),
    TurnAdvanced { roster_len: usize },
    GameReset,
}

/// Hook for UI layers that want to re-render on change.
pub trait SessionObserver: Send + Sync {
    fn changed(&self, change: &SessionChange);
}

/// Serializable copy of the session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: GamePhase,
    pub current: Player,
    pub roster: Vec<Player>,
    pub last_error: Option<String>,
    pub capture_in_flight: bool,
}

struct SessionState {
    current: Player,
    roster: Vec<Player>,
    last_error: Option<String>,
    /// Bumped on every advance/reset so late pipeline results can be recognised.
    epoch: u64,
    busy: bool,
    players_created: usize,
}

impl SessionState {
    fn fresh() -> Self {
        Self {
            current: Player::leader(player_name(1)),
            roster: Vec::new(),
            last_error: None,
            epoch: 0,
            busy: false,
            players_created: 1,
        }
    }
}

fn player_name(n: usize) -> String {
    format!("Player {n}")
}

/// Clears the in-flight flag however the pipeline future ends.
struct BusyGuard<'a> {
    state: &'a Mutex<SessionState>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().busy = false;
    }
}

pub struct GameSession {
    camera: Arc<dyn CameraCollaborator>,
    filesystem: Arc<dyn FilesystemCollaborator>,
    scoring: Arc<dyn EmotionScoringCollaborator>,
    scorer: Box<dyn EmotionScorer>,
    processor: ImagePostProcessor,
    bridge: CaptureCompletionBridge,
    observer: Option<Arc<dyn SessionObserver>>,
    state: Mutex<SessionState>,
}

impl GameSession {
    pub fn new(
        camera: Arc<dyn CameraCollaborator>,
        filesystem: Arc<dyn FilesystemCollaborator>,
        scoring: Arc<dyn EmotionScoringCollaborator>,
    ) -> Self {
        Self {
            camera,
            filesystem,
            scoring,
            scorer: Box::new(MeanAbsoluteScorer),
            processor: ImagePostProcessor::default(),
            bridge: CaptureCompletionBridge::new(),
            observer: None,
            state: Mutex::new(SessionState::fresh()),
        }
    }

    pub fn with_post_processor(mut self, processor: ImagePostProcessor) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_scorer(mut self, scorer: impl EmotionScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// External completion entry point for platform capture callbacks that
    /// were not handed a [`crate::CaptureCompleter`].
    pub fn deliver_capture(&self, outcome: CaptureOutcome) -> bool {
        self.bridge.deliver(outcome)
    }

    /// Run one capture-to-score attempt for the current player.
    pub async fn start_capture(&self) -> Result<TurnReport, SessionError> {
        // The slot is opened under the state lock so a concurrent reset
        // always finds it pending and can cancel it.
        let (epoch, cleared, pending) = {
            let mut st = self.state.lock();
            if st.busy {
                return Err(SessionError::CaptureInFlight);
            }
            let pending = self.bridge.request_capture()?;
            st.busy = true;
            (st.epoch, st.last_error.take().is_some(), pending)
        };
        let _busy = BusyGuard { state: &self.state };

        if cleared {
            self.notify(SessionChange::ErrorChanged(None));
        }
        self.notify(SessionChange::CaptureStarted);

        let completer = pending.completer();
        if self.is_stale(epoch) {
            tracing::info!(request = completer.request_id(), "game reset before capture started");
        } else {
            tracing::info!(request = completer.request_id(), "capture requested");
            if let Err(err) = self.camera.take_picture(completer.clone()) {
                tracing::warn!(error = %err, "camera refused capture request");
                completer.deliver(CaptureOutcome::failed(err.to_string()));
            }
        }

        let (path, image) = match pending.outcome().await {
            CaptureOutcome::Cancelled => {
                if self.is_stale(epoch) {
                    return Ok(TurnReport::Discarded);
                }
                tracing::info!("capture cancelled");
                self.set_error(epoch, None);
                return Ok(TurnReport::Cancelled);
            }
            CaptureOutcome::Failed(message) => {
                tracing::warn!(error = %message, "capture failed");
                return Ok(self.capture_failed(epoch, message));
            }
            CaptureOutcome::Success { path, image } => (path, image),
        };
        tracing::debug!(path = %path.display(), image = %image.0, "photo captured");

        let processed = match self.post_process(&path).await {
            Ok(processed) => processed,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "post-processing failed");
                return Ok(self.capture_failed(epoch, err.to_string()));
            }
        };
        tracing::info!(
            path = %path.display(),
            width = processed.width,
            height = processed.height,
            bytes = processed.bytes.len(),
            "photo post-processed"
        );

        {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                return Ok(TurnReport::Discarded);
            }
            st.current.clear_capture();
            st.current.photo_path = Some(path.clone());
            st.current.captured_at = Some(chrono::Utc::now());
        }
        self.notify(SessionChange::CurrentUpdated);

        Ok(self.score_photo(epoch, &path).await)
    }

    /// Re-run the scoring step for a photo whose previous scoring call failed.
    pub async fn retry_scoring(&self) -> Result<TurnReport, SessionError> {
        let (epoch, path, cleared) = {
            let mut st = self.state.lock();
            if st.busy {
                return Err(SessionError::CaptureInFlight);
            }
            let path = st.current.photo_path.clone().ok_or(SessionError::NoPhoto)?;
            if st.current.emotion.is_some() {
                return Err(SessionError::AlreadyScored);
            }
            st.busy = true;
            (st.epoch, path, st.last_error.take().is_some())
        };
        let _busy = BusyGuard { state: &self.state };
        if cleared {
            self.notify(SessionChange::ErrorChanged(None));
        }

        tracing::info!(path = %path.display(), "retrying scoring");
        Ok(self.score_photo(epoch, &path).await)
    }

    /// Commit the current player to the roster and start a challenger turn.
    pub fn advance_turn(&self) -> Result<(), SessionError> {
        let (roster_len, committed) = {
            let mut st = self.state.lock();
            if st.busy {
                return Err(SessionError::CaptureInFlight);
            }
            st.players_created += 1;
            let next = Player::challenger(player_name(st.players_created));
            let committed = std::mem::replace(&mut st.current, next);
            let name = committed.name.clone();
            st.roster.push(committed);
            st.last_error = None;
            st.epoch += 1;
            (st.roster.len(), name)
        };

        tracing::info!(player = %committed, roster_len, "turn advanced");
        self.notify(SessionChange::TurnAdvanced { roster_len });
        Ok(())
    }

    /// Clear the roster and start over with a fresh leader.
    ///
    /// A capture still waiting on the camera is cancelled; any attempt still
    /// running finishes without touching the new game.
    pub fn reset_game(&self) {
        {
            let mut st = self.state.lock();
            let busy = st.busy;
            let epoch = st.epoch + 1;
            *st = SessionState {
                busy,
                epoch,
                ..SessionState::fresh()
            };
        }
        if self.bridge.deliver(CaptureOutcome::Cancelled) {
            tracing::info!("pending capture cancelled by reset");
        }
        tracing::info!("game reset");
        self.notify(SessionChange::GameReset);
    }

    pub fn rename_current(&self, name: impl Into<String>) {
        self.state.lock().current.name = name.into();
        self.notify(SessionChange::CurrentUpdated);
    }

    pub fn phase(&self) -> GamePhase {
        phase_of(&self.state.lock().current)
    }

    pub fn current(&self) -> Player {
        self.state.lock().current.clone()
    }

    pub fn roster(&self) -> Vec<Player> {
        self.state.lock().roster.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn is_capture_in_flight(&self) -> bool {
        self.state.lock().busy
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock();
        SessionSnapshot {
            phase: phase_of(&st.current),
            current: st.current.clone(),
            roster: st.roster.clone(),
            last_error: st.last_error.clone(),
            capture_in_flight: st.busy,
        }
    }

    /// Scored challengers in the roster, best match first.
    pub fn standings(&self) -> Vec<Player> {
        let mut ranked: Vec<Player> = self
            .state
            .lock()
            .roster
            .iter()
            .filter(|p| !p.is_leader && p.score.is_some())
            .cloned()
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Read, transform off the executor, and overwrite the photo in place.
    async fn post_process(&self, path: &Path) -> Result<ProcessedImage, TurnError> {
        let raw = self.filesystem.read_all(path).await?;
        let processor = self.processor.clone();
        let processed = tokio::task::spawn_blocking(move || processor.process(&raw))
            .await
            .map_err(|e| TurnError::Worker(e.to_string()))??;
        self.filesystem.write_all(&processed.bytes, path).await?;
        Ok(processed)
    }

    async fn score_photo(&self, epoch: u64, path: &Path) -> TurnReport {
        let candidates = match self.request_scores(path).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "scoring failed");
                let message = err.to_string();
                if !self.set_error(epoch, Some(message.clone())) {
                    return TurnReport::Discarded;
                }
                return TurnReport::Unscored(message);
            }
        };

        let Some(best) = candidates.into_iter().next() else {
            tracing::info!(path = %path.display(), "no face detected");
            return if self.is_stale(epoch) {
                TurnReport::Discarded
            } else {
                TurnReport::NoFaceDetected
            };
        };

        let (report, error) = {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                return TurnReport::Discarded;
            }
            st.current.emotion = Some(best.scores);
            st.current.face = best.face;

            let score = if st.current.is_leader {
                Ok(1.0)
            } else {
                leader_emotion(&st.roster).map(|leader| self.scorer.similarity(&leader, &best.scores))
            };

            match score {
                Ok(score) => {
                    st.current.score = Some(score);
                    (
                        TurnReport::Scored {
                            emotion: best.scores,
                            score,
                        },
                        None,
                    )
                }
                Err(err) => {
                    let message = err.to_string();
                    st.last_error = Some(message.clone());
                    (TurnReport::Unscored(message.clone()), Some(message))
                }
            }
        };

        match &report {
            TurnReport::Scored { emotion, score } => tracing::info!(
                score,
                dominant = %emotion.dominant(),
                "player scored"
            ),
            _ => tracing::warn!(error = ?error, "player could not be scored"),
        }
        self.notify(SessionChange::CurrentUpdated);
        if error.is_some() {
            self.notify(SessionChange::ErrorChanged(error));
        }
        report
    }

    async fn request_scores(
        &self,
        path: &Path,
    ) -> Result<Vec<crate::types::EmotionCandidate>, TurnError> {
        if !self.filesystem.exists(path).await {
            return Err(FsError::NotFound(path.to_path_buf()).into());
        }
        let bytes = self.filesystem.read_all(path).await?;
        Ok(self.scoring.score_image(bytes).await?)
    }

    fn capture_failed(&self, epoch: u64, message: String) -> TurnReport {
        if self.set_error(epoch, Some(message.clone())) {
            TurnReport::CaptureFailed(message)
        } else {
            TurnReport::Discarded
        }
    }

    /// Update `last_error` unless the attempt is stale. Returns false when stale.
    fn set_error(&self, epoch: u64, error: Option<String>) -> bool {
        let changed = {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                return false;
            }
            let changed = st.last_error != error;
            st.last_error = error.clone();
            changed
        };
        if changed {
            self.notify(SessionChange::ErrorChanged(error));
        }
        true
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.state.lock().epoch != epoch
    }

    fn notify(&self, change: SessionChange) {
        if let Some(observer) = &self.observer {
            observer.changed(&change);
        }
    }
}

fn phase_of(current: &Player) -> GamePhase {
    if current.is_leader {
        GamePhase::AwaitingLeaderCapture
    } else {
        GamePhase::AwaitingChallengerCapture
    }
}

/// Emotion of the first leader found scanning the roster from the start.
fn leader_emotion(roster: &[Player]) -> Result<EmotionVector, TurnError> {
    let leader = roster
        .iter()
        .find(|p| p.is_leader)
        .ok_or(TurnError::NoLeader)?;
    leader.emotion.ok_or(TurnError::LeaderUnscored)
}
