//! mimic-core: capture-to-score pipeline for the Mimic party game.
//!
//! Bridges out-of-band camera callbacks into awaitable outcomes, normalizes
//! photos for upload, scores emotion similarity against the leader and
//! sequences leader/challenger turns.

pub mod bridge;
pub mod ports;
pub mod postprocess;
pub mod scorer;
pub mod session;
pub mod types;

pub use bridge::{BridgeError, BridgeState, CaptureCompleter, CaptureCompletionBridge, PendingCapture};
pub use ports::{
    CameraCollaborator, CameraError, EmotionScoringCollaborator, FilesystemCollaborator, FsError,
    ScoringError,
};
pub use postprocess::{ImagePostProcessor, PostProcessError, PostProcessPolicy, ProcessedImage};
pub use scorer::{EmotionScorer, MeanAbsoluteScorer};
pub use session::{
    GamePhase, GameSession, SessionChange, SessionError, SessionObserver, SessionSnapshot,
    TurnError, TurnReport,
};
pub use types::{
    capture_file_name, CaptureOutcome, EmotionCandidate, EmotionLabel, EmotionScoreError,
    EmotionVector, FaceRectangle, ImageHandle, Player,
};
