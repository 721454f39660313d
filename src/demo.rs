use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, VerifyError};
use crate::types::CapturedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileKind {
    Valid,
    Fraud,
}

/// A preset identity used to exercise the flow without the real provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoProfile {
    pub name: String,
    pub kind: ProfileKind,
    pub id_url: String,
    pub selfie_url: String,
}

/// A demo profile with both remote images materialized for upload.
#[derive(Debug, Clone)]
pub struct LoadedProfile {
    pub name: String,
    pub id_image: CapturedImage,
    pub selfie_image: CapturedImage,
}

/// Fixed catalog of demo identities. Exactly two entries: one that should
/// approve and one that should reject. The fraud entry reuses the valid
/// entry's ID image with an unrelated face, so the face-mismatch path is the
/// one that fires.
pub struct DemoCatalog {
    profiles: Vec<DemoProfile>,
    http: reqwest::Client,
}

const DEMO_MIME_TYPE: &str = "image/jpeg";

impl DemoCatalog {
    pub fn new() -> Self {
        let shared_id_url =
            "https://images.unsplash.com/photo-1633265486064-086b219458ec?auto=format&fit=crop&q=80&w=1000";
        Self::with_profiles(vec![
            DemoProfile {
                name: "Sarah Connor".to_string(),
                kind: ProfileKind::Valid,
                id_url: shared_id_url.to_string(),
                selfie_url:
                    "https://images.unsplash.com/photo-1438761681033-6461ffad8d80?auto=format&fit=crop&q=80&w=1000"
                        .to_string(),
            },
            DemoProfile {
                name: "John Wick".to_string(),
                kind: ProfileKind::Fraud,
                id_url: shared_id_url.to_string(),
                selfie_url:
                    "https://images.unsplash.com/photo-1500648767791-00dcc994a43e?auto=format&fit=crop&q=80&w=1000"
                        .to_string(),
            },
        ])
    }

    pub fn with_profiles(profiles: Vec<DemoProfile>) -> Self {
        Self {
            profiles,
            http: reqwest::Client::new(),
        }
    }

    /// Exact match against the claimed name.
    pub fn find_by_name(&self, name: &str) -> Option<&DemoProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// First profile of the given kind.
    pub fn find_by_kind(&self, kind: ProfileKind) -> Option<&DemoProfile> {
        self.profiles.iter().find(|p| p.kind == kind)
    }

    pub fn profiles(&self) -> &[DemoProfile] {
        &self.profiles
    }

    /// Fetch both of a profile's remote images and materialize them as
    /// uploadable images. Either fetch failing propagates as `DemoFetch`;
    /// nothing is partially returned.
    pub async fn load_profile(&self, profile: &DemoProfile) -> Result<LoadedProfile> {
        info!(profile = %profile.name, "Loading demo profile images");

        let id_bytes = self.fetch_image(&profile.id_url).await?;
        let selfie_bytes = self.fetch_image(&profile.selfie_url).await?;

        Ok(LoadedProfile {
            name: profile.name.clone(),
            id_image: CapturedImage::from_bytes(id_bytes, DEMO_MIME_TYPE, "demo_id.jpg"),
            selfie_image: CapturedImage::from_bytes(
                selfie_bytes,
                DEMO_MIME_TYPE,
                "demo_selfie.jpg",
            ),
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| VerifyError::DemoFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifyError::DemoFetch(format!(
                "image fetch returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VerifyError::DemoFetch(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

impl Default for DemoCatalog {
    fn default() -> Self {
        Self::new()
    }
}
