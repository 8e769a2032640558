use anyhow::{Context, Result};
use mimic_core::PostProcessPolicy;
use mimic_emotion::{EmotionApiConfig, DEFAULT_ENDPOINT};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: optional TOML file, then `MIMIC_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory captured photos are written to.
    pub capture_dir: PathBuf,
    /// Emotion recognition endpoint URL.
    pub emotion_endpoint: String,
    /// Subscription key for the emotion service. Empty disables scoring.
    pub emotion_key: String,
    pub request_timeout_secs: u64,
    /// Longest side of the uploaded photo, in pixels.
    pub max_width: u32,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
    /// Number of warmup frames to discard after opening the webcam.
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        let policy = PostProcessPolicy::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_dir: default_data_dir().join("captures"),
            emotion_endpoint: DEFAULT_ENDPOINT.to_string(),
            emotion_key: String::new(),
            request_timeout_secs: 30,
            max_width: policy.max_dimension,
            jpeg_quality: policy.jpeg_quality,
            max_upload_bytes: policy.max_bytes,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load `path` (or the default location if it exists) and apply the
    /// process environment on top. An explicit `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Apply `MIMIC_*` overrides from `var`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("MIMIC_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("MIMIC_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(v);
        }
        if let Some(v) = var("MIMIC_EMOTION_ENDPOINT") {
            self.emotion_endpoint = v;
        }
        if let Some(v) = var("MIMIC_EMOTION_KEY") {
            self.emotion_key = v;
        }
        self.request_timeout_secs =
            parse_or(var("MIMIC_REQUEST_TIMEOUT_SECS"), self.request_timeout_secs);
        self.max_width = parse_or(var("MIMIC_MAX_WIDTH"), self.max_width);
        self.jpeg_quality = parse_or(var("MIMIC_JPEG_QUALITY"), self.jpeg_quality);
        self.max_upload_bytes = parse_or(var("MIMIC_MAX_UPLOAD_BYTES"), self.max_upload_bytes);
        self.warmup_frames = parse_or(var("MIMIC_WARMUP_FRAMES"), self.warmup_frames);
    }

    pub fn post_process_policy(&self) -> PostProcessPolicy {
        let defaults = PostProcessPolicy::default();
        PostProcessPolicy {
            max_dimension: self.max_width,
            jpeg_quality: self.jpeg_quality,
            max_bytes: self.max_upload_bytes,
            min_quality: defaults.min_quality.min(self.jpeg_quality),
        }
    }

    pub fn emotion_api(&self) -> EmotionApiConfig {
        EmotionApiConfig {
            endpoint: self.emotion_endpoint.clone(),
            api_key: self.emotion_key.clone(),
            timeout_secs: self.request_timeout_secs,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("mimic")
}

/// `$XDG_CONFIG_HOME/mimic/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("mimic")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_post_process_policy() {
        let config = Config::default();
        assert_eq!(config.max_width, 2000);
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.max_upload_bytes, 4 * 1024 * 1024);
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.post_process_policy(), PostProcessPolicy::default());
    }

    #[test]
    fn test_file_values_then_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "camera_device = \"/dev/video4\"\nemotion_key = \"from-file\"\nmax_width = 1024\n",
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.max_width, 1024);
        assert_eq!(config.jpeg_quality, 90);

        config.apply_overrides(vars(&[
            ("MIMIC_EMOTION_KEY", "from-env"),
            ("MIMIC_JPEG_QUALITY", "75"),
            ("MIMIC_CAPTURE_DIR", "/srv/mimic"),
        ]));
        assert_eq!(config.emotion_key, "from-env");
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.capture_dir, PathBuf::from("/srv/mimic"));
        assert_eq!(config.camera_device, "/dev/video4");
    }

    #[test]
    fn test_unparseable_override_keeps_value() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("MIMIC_MAX_WIDTH", "wide"),
            ("MIMIC_WARMUP_FRAMES", " 8 "),
        ]));
        assert_eq!(config.max_width, 2000);
        assert_eq!(config.warmup_frames, 8);
    }

    #[test]
    fn test_low_quality_lowers_min_quality() {
        let config = Config {
            jpeg_quality: 30,
            ..Config::default()
        };
        let policy = config.post_process_policy();
        assert_eq!(policy.min_quality, 30);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_width = \"big\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
