//! HTTP client for the cloud emotion-recognition service.
//!
//! Sends the post-processed JPEG as a raw octet-stream body authenticated by
//! a subscription key and returns one candidate per detected face.

pub mod client;

pub use client::{parse_response, EmotionApiClient, EmotionApiConfig, DEFAULT_ENDPOINT};
