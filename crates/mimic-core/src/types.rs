use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The eight facial-expression categories scored by the emotion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Anger,
    Contempt,
    Disgust,
    Fear,
    Happiness,
    Neutral,
    Sadness,
    Surprise,
}

impl EmotionLabel {
    /// All labels, in the fixed order used for iteration and scoring.
    pub const ALL: [EmotionLabel; 8] = [
        EmotionLabel::Anger,
        EmotionLabel::Contempt,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happiness,
        EmotionLabel::Neutral,
        EmotionLabel::Sadness,
        EmotionLabel::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Anger => "anger",
            EmotionLabel::Contempt => "contempt",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happiness => "happiness",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Sadness => "sadness",
            EmotionLabel::Surprise => "surprise",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-label probabilities for one face, produced atomically by the scoring service.
///
/// Every field is in [0, 1]. The eight values need not sum to exactly 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionVector {
    pub anger: f64,
    pub contempt: f64,
    pub disgust: f64,
    pub fear: f64,
    pub happiness: f64,
    pub neutral: f64,
    pub sadness: f64,
    pub surprise: f64,
}

impl EmotionVector {
    /// Build a vector from one complete scoring result.
    ///
    /// Every label must be present; a partial result is rejected rather than
    /// zero-filled. Non-finite values are rejected; finite values are clamped
    /// into [0, 1] to absorb service-side rounding.
    pub fn from_scores<I>(scores: I) -> Result<Self, EmotionScoreError>
    where
        I: IntoIterator<Item = (EmotionLabel, f64)>,
    {
        let mut vector = EmotionVector::default();
        let mut seen = [false; EmotionLabel::ALL.len()];
        for (label, value) in scores {
            if !value.is_finite() {
                return Err(EmotionScoreError::NonFinite { label, value });
            }
            *vector.get_mut(label) = value.clamp(0.0, 1.0);
            seen[label as usize] = true;
        }
        if let Some(label) = EmotionLabel::ALL
            .into_iter()
            .find(|&label| !seen[label as usize])
        {
            return Err(EmotionScoreError::Missing(label));
        }
        Ok(vector)
    }

    /// Vector with `label` at `value` and every other label at zero.
    pub fn single(label: EmotionLabel, value: f64) -> Self {
        let mut vector = EmotionVector::default();
        *vector.get_mut(label) = value.clamp(0.0, 1.0);
        vector
    }

    pub fn get(&self, label: EmotionLabel) -> f64 {
        match label {
            EmotionLabel::Anger => self.anger,
            EmotionLabel::Contempt => self.contempt,
            EmotionLabel::Disgust => self.disgust,
            EmotionLabel::Fear => self.fear,
            EmotionLabel::Happiness => self.happiness,
            EmotionLabel::Neutral => self.neutral,
            EmotionLabel::Sadness => self.sadness,
            EmotionLabel::Surprise => self.surprise,
        }
    }

    fn get_mut(&mut self, label: EmotionLabel) -> &mut f64 {
        match label {
            EmotionLabel::Anger => &mut self.anger,
            EmotionLabel::Contempt => &mut self.contempt,
            EmotionLabel::Disgust => &mut self.disgust,
            EmotionLabel::Fear => &mut self.fear,
            EmotionLabel::Happiness => &mut self.happiness,
            EmotionLabel::Neutral => &mut self.neutral,
            EmotionLabel::Sadness => &mut self.sadness,
            EmotionLabel::Surprise => &mut self.surprise,
        }
    }

    /// Iterate `(label, score)` pairs in [`EmotionLabel::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f64)> + '_ {
        EmotionLabel::ALL.iter().map(move |&label| (label, self.get(label)))
    }

    /// The label with the highest score (first one wins on ties).
    pub fn dominant(&self) -> EmotionLabel {
        let mut best = EmotionLabel::Anger;
        let mut best_score = f64::NEG_INFINITY;
        for (label, score) in self.iter() {
            if score > best_score {
                best = label;
                best_score = score;
            }
        }
        best
    }

    /// Sum of absolute per-label differences divided by the label count.
    pub fn mean_abs_difference(&self, other: &EmotionVector) -> f64 {
        let total: f64 = EmotionLabel::ALL
            .iter()
            .map(|&label| (self.get(label) - other.get(label)).abs())
            .sum();
        total / EmotionLabel::ALL.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmotionScoreError {
    #[error("missing score for {0}")]
    Missing(EmotionLabel),
    #[error("invalid score for {label}: {value}")]
    NonFinite { label: EmotionLabel, value: f64 },
}

/// Face bounding rectangle in source-image pixels, as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRectangle {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// One face found by the scoring service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionCandidate {
    pub face: Option<FaceRectangle>,
    pub scores: EmotionVector,
}

/// Opaque display token for a captured photo, handed through to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle(pub String);

impl ImageHandle {
    pub fn from_path(path: &std::path::Path) -> Self {
        Self(format!("file://{}", path.display()))
    }
}

/// Result of a single photo-capture attempt. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Success { path: PathBuf, image: ImageHandle },
    Cancelled,
    Failed(String),
}

impl CaptureOutcome {
    /// Success outcome whose handle points at `path`.
    pub fn saved(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let image = ImageHandle::from_path(&path);
        CaptureOutcome::Success { path, image }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        CaptureOutcome::Failed(message.into())
    }
}

/// Where a camera writes the capture identified by `id`.
pub fn capture_file_name(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("photo_{id}.jpg"))
}

/// A participant in the game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub photo_path: Option<PathBuf>,
    pub emotion: Option<EmotionVector>,
    pub face: Option<FaceRectangle>,
    /// Similarity to the leader in [0, 1]. Only set once `emotion` is set.
    pub score: Option<f64>,
    pub is_leader: bool,
    pub captured_at: Option<DateTime<Utc>>,
}

impl Player {
    pub fn new(name: impl Into<String>, is_leader: bool) -> Self {
        Self {
            name: name.into(),
            photo_path: None,
            emotion: None,
            face: None,
            score: None,
            is_leader,
            captured_at: None,
        }
    }

    pub fn leader(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    pub fn challenger(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    /// Drop any previous photo and scoring result.
    pub(crate) fn clear_capture(&mut self) {
        self.photo_path = None;
        self.emotion = None;
        self.face = None;
        self.score = None;
        self.captured_at = None;
    }
}
