use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::encode::{self, EncodedImage};
use crate::error::Result;
use crate::types::{CapturedImage, Verdict, VerificationResult};

/// Seam between the orchestrator and the analysis provider.
///
/// Implementations must not fail for provider-side reasons; every such
/// failure terminates in the fixed fallback result. The `Result` exists only
/// so the orchestrator can defend against implementations that break that
/// contract.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(
        &self,
        claimed_name: &str,
        id_image: &CapturedImage,
        selfie_image: &CapturedImage,
    ) -> Result<VerificationResult>;
}

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MODEL: &str = "gemini-2.5-flash";

/// Verification requester backed by the Gemini `generateContent` API.
/// One request per verification: instruction text, then the ID image, then
/// the selfie, with a strict JSON response schema. No retries, no streaming.
pub struct GeminiVerifier {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiVerifier {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn request_verdict(
        &self,
        claimed_name: &str,
        id_image: &CapturedImage,
        selfie_image: &CapturedImage,
    ) -> anyhow::Result<VerificationResult> {
        let id_encoded = encode::encode(id_image).await?;
        let selfie_encoded = encode::encode(selfie_image).await?;

        let payload = build_request_body(claimed_name, &id_encoded, &selfie_encoded);

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, MODEL
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("provider request failed: {}", response.status()));
        }

        let response_json: Value = response.json().await?;

        let text = response_json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow!("no text in provider response"))?;

        parse_result(text)
    }
}

#[async_trait]
impl IdentityVerifier for GeminiVerifier {
    async fn verify(
        &self,
        claimed_name: &str,
        id_image: &CapturedImage,
        selfie_image: &CapturedImage,
    ) -> Result<VerificationResult> {
        match self
            .request_verdict(claimed_name, id_image, selfie_image)
            .await
        {
            Ok(result) => {
                info!(
                    verdict = ?result.verdict,
                    confidence = result.confidence_score,
                    "Provider verification completed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "Provider verification failed, returning fallback result");
                Ok(fallback_result())
            }
        }
    }
}

/// The fixed result substituted whenever real analysis cannot complete.
/// A literal constant, never recomputed from partial provider data.
pub fn fallback_result() -> VerificationResult {
    VerificationResult {
        is_id_valid: false,
        is_name_match: false,
        is_face_match: false,
        confidence_score: 0,
        extracted_name: "Unknown".to_string(),
        reasoning: "System error during verification process. Please try again.".to_string(),
        verdict: Verdict::ManualReview,
    }
}

/// Parse the provider's structured reply. Any shape violation is an error;
/// the caller maps all of them to the fallback result.
fn parse_result(text: &str) -> anyhow::Result<VerificationResult> {
    serde_json::from_str(text.trim()).map_err(|e| anyhow!("malformed provider response: {}", e))
}

fn build_prompt(claimed_name: &str) -> String {
    format!(
        r#"You are an expert identity verification AI. Your task is to verify a user's identity.

Input Data:
1. The user claims their name is: "{name}"
2. Image 1 is the user's uploaded ID document.
3. Image 2 is a live verification selfie.

Task:
1. Analyze Image 1: Is it a valid-looking ID? Can you read the name? Does it match the claimed name "{name}" (allow for minor spelling/formatting differences)?
2. Analyze Image 2: Is it a real human face?
3. Compare Image 1 (ID Photo) vs Image 2 (Selfie): Do these look like the same person? Look at facial structure, nose shape, eyes, etc.

Provide a strict JSON output."#,
        name = claimed_name
    )
}

/// Response schema the provider must satisfy: all seven result fields, with
/// the verdict constrained to the three-way enumeration.
fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isIdValid": {
                "type": "BOOLEAN",
                "description": "Whether the first image appears to be a valid government-issued ID card."
            },
            "isNameMatch": {
                "type": "BOOLEAN",
                "description": "Whether the name on the ID card matches the user provided name."
            },
            "extractedName": {
                "type": "STRING",
                "description": "The full name extracted from the ID card."
            },
            "isFaceMatch": {
                "type": "BOOLEAN",
                "description": "Whether the face in the ID card photo matches the face in the selfie photo."
            },
            "confidenceScore": {
                "type": "NUMBER",
                "description": "A confidence score from 0 to 100 regarding the match."
            },
            "reasoning": {
                "type": "STRING",
                "description": "A brief explanation of the findings, pointing out specific visual evidence."
            },
            "verdict": {
                "type": "STRING",
                "enum": ["APPROVED", "REJECTED", "MANUAL_REVIEW"],
                "description": "The final recommendation."
            }
        },
        "required": [
            "isIdValid", "isNameMatch", "isFaceMatch", "confidenceScore",
            "reasoning", "verdict", "extractedName"
        ]
    })
}

fn build_request_body(
    claimed_name: &str,
    id_image: &EncodedImage,
    selfie_image: &EncodedImage,
) -> Value {
    // Part order matters: the prompt refers to "Image 1" (ID) and "Image 2"
    // (selfie).
    json!({
        "contents": [{
            "parts": [
                { "text": build_prompt(claimed_name) },
                { "inline_data": { "mime_type": id_image.mime_type, "data": id_image.data } },
                { "inline_data": { "mime_type": selfie_image.mime_type, "data": selfie_image.data } }
            ]
        }],
        "generationConfig": {
            "response_mime_type": "application/json",
            "response_schema": response_schema()
        }
    })
}
