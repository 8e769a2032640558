use async_trait::async_trait;
use mimic_core::{
    EmotionCandidate, EmotionLabel, EmotionScoringCollaborator, EmotionVector, FaceRectangle,
    ScoringError,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Public recognize endpoint of the hosted emotion service.
pub const DEFAULT_ENDPOINT: &str =
    "https://westus.api.cognitive.microsoft.com/emotion/v1.0/recognize";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Connection settings for [`EmotionApiClient`].
#[derive(Debug, Clone)]
pub struct EmotionApiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for EmotionApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Posts JPEG bytes to the recognize endpoint and maps each detected face to
/// an [`EmotionCandidate`].
#[derive(Debug)]
pub struct EmotionApiClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl EmotionApiClient {
    pub fn new(config: &EmotionApiConfig) -> Result<Self, ScoringError> {
        if config.api_key.trim().is_empty() {
            return Err(ScoringError::Config(
                "emotion API key not set (MIMIC_EMOTION_KEY)".into(),
            ));
        }
        if config.endpoint.trim().is_empty() {
            return Err(ScoringError::Config("emotion API endpoint is empty".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScoringError::Http(format!("failed to build HTTP client: {e}")))?;

        debug!(
            endpoint = %config.endpoint,
            timeout = config.timeout_secs,
            "emotion client initialised"
        );

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaceResult {
    face_rectangle: Option<FaceRectangle>,
    scores: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

fn label_from_key(key: &str) -> Option<EmotionLabel> {
    EmotionLabel::ALL
        .into_iter()
        .find(|label| label.as_str().eq_ignore_ascii_case(key))
}

/// Parse the service response body.
///
/// Each face must carry all eight scores; unknown score keys are ignored.
pub fn parse_response(body: &str) -> Result<Vec<EmotionCandidate>, ScoringError> {
    let faces: Vec<FaceResult> = serde_json::from_str(body)
        .map_err(|e| ScoringError::Parse(format!("invalid response JSON: {e}")))?;

    faces
        .into_iter()
        .map(|face| {
            let scores = EmotionVector::from_scores(
                face.scores
                    .iter()
                    .filter_map(|(key, &value)| label_from_key(key).map(|label| (label, value))),
            )
            .map_err(|e| ScoringError::Parse(e.to_string()))?;
            Ok(EmotionCandidate {
                face: face.face_rectangle,
                scores,
            })
        })
        .collect()
}

/// Human-readable message for a non-2xx response.
fn service_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error.code {
            Some(code) => format!("{code}: {}", envelope.error.message),
            None => envelope.error.message,
        },
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl EmotionScoringCollaborator for EmotionApiClient {
    async fn score_image(&self, image: Vec<u8>) -> Result<Vec<EmotionCandidate>, ScoringError> {
        let bytes = image.len();
        let response = self
            .http_client
            .post(&self.endpoint)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|e| ScoringError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScoringError::Http(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let message = service_message(&body);
            warn!(status = status.as_u16(), message = %message, "emotion service error");
            return Err(ScoringError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let candidates = parse_response(&body)?;
        debug!(bytes, faces = candidates.len(), "emotion scores received");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FACES: &str = r#"[
        {
            "faceRectangle": {"left": 68, "top": 97, "width": 64, "height": 97},
            "scores": {
                "anger": 0.00300731952, "contempt": 5.14648448e-8, "disgust": 9.180124e-6,
                "fear": 0.0001912825, "happiness": 0.9875571, "neutral": 0.0009861537,
                "sadness": 1.889955e-5, "surprise": 0.008229999
            }
        },
        {
            "faceRectangle": {"left": 10, "top": 10, "width": 20, "height": 20},
            "scores": {
                "anger": 0.0, "contempt": 0.0, "disgust": 0.0, "fear": 0.0,
                "happiness": 0.0, "neutral": 0.0, "sadness": 1.0, "surprise": 0.0
            }
        }
    ]"#;

    fn client_for(server: &mockito::ServerGuard) -> EmotionApiClient {
        EmotionApiClient::new(&EmotionApiConfig {
            endpoint: format!("{}/emotion/v1.0/recognize", server.url()),
            api_key: "test-key".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = EmotionApiClient::new(&EmotionApiConfig::default()).unwrap_err();
        assert!(matches!(err, ScoringError::Config(_)));
    }

    #[test]
    fn test_parse_keeps_service_order_and_rectangle() {
        let candidates = parse_response(TWO_FACES).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].face,
            Some(FaceRectangle {
                left: 68,
                top: 97,
                width: 64,
                height: 97
            })
        );
        assert_eq!(candidates[0].scores.dominant(), EmotionLabel::Happiness);
        assert_eq!(candidates[1].scores.sadness, 1.0);
    }

    #[test]
    fn test_parse_empty_array_means_no_face() {
        assert!(parse_response("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_partial_scores() {
        let err = parse_response(r#"[{"scores": {"happiness": 0.9}}]"#).unwrap_err();
        match err {
            ScoringError::Parse(message) => assert_eq!(message, "missing score for anger"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignores_unknown_labels_and_missing_rectangle() {
        let body = r#"[{"scores": {
            "anger": 0.1, "contempt": 0.0, "disgust": 0.0, "fear": 0.0,
            "Happiness": 0.5, "neutral": 0.4, "sadness": 0.0, "surprise": 0.0,
            "smugness": 0.9
        }}]"#;
        let candidates = parse_response(body).unwrap();
        assert_eq!(candidates[0].face, None);
        assert_eq!(candidates[0].scores.happiness, 0.5);
        assert_eq!(candidates[0].scores.anger, 0.1);
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = parse_response(r#"{"faces": []}"#).unwrap_err();
        assert!(matches!(err, ScoringError::Parse(_)));
    }

    #[test]
    fn test_service_message_prefers_error_envelope() {
        let body = r#"{"error": {"code": "Unspecified", "message": "Access denied due to invalid subscription key."}}"#;
        assert_eq!(
            service_message(body),
            "Unspecified: Access denied due to invalid subscription key."
        );
        assert_eq!(service_message("  Bad Gateway "), "Bad Gateway");
        assert_eq!(service_message(""), "empty response body");
    }

    #[tokio::test]
    async fn test_score_image_posts_bytes_with_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emotion/v1.0/recognize")
            .match_header("ocp-apim-subscription-key", "test-key")
            .match_header("content-type", "application/octet-stream")
            .match_body(vec![0xff, 0xd8, 0xff])
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TWO_FACES)
            .create_async()
            .await;

        let client = client_for(&server);
        let candidates = client.score_image(vec![0xff, 0xd8, 0xff]).await.unwrap();
        assert_eq!(candidates.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_score_image_no_face() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emotion/v1.0/recognize")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let candidates = client_for(&server).score_image(vec![1]).await.unwrap();
        assert!(candidates.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_score_image_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emotion/v1.0/recognize")
            .with_status(401)
            .with_body(r#"{"error": {"code": "Unspecified", "message": "Access denied"}}"#)
            .create_async()
            .await;

        let err = client_for(&server).score_image(vec![1]).await.unwrap_err();
        match err {
            ScoringError::Service { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unspecified: Access denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_score_image_rate_limited_plain_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emotion/v1.0/recognize")
            .with_status(429)
            .with_body("Too Many Requests")
            .create_async()
            .await;

        let err = client_for(&server).score_image(vec![1]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "scoring service returned 429: Too Many Requests"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_score_image_garbage_body_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/emotion/v1.0/recognize")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = client_for(&server).score_image(vec![1]).await.unwrap_err();
        assert!(matches!(err, ScoringError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let client = EmotionApiClient::new(&EmotionApiConfig {
            endpoint: "http://127.0.0.1:1/recognize".into(),
            api_key: "k".into(),
            timeout_secs: 2,
        })
        .unwrap();
        let err = client.score_image(vec![1]).await.unwrap_err();
        assert!(matches!(err, ScoringError::Http(_)));
    }
}
