use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::demo::{DemoCatalog, DemoProfile, ProfileKind};
use crate::error::{Result, VerifyError};
use crate::gemini::IdentityVerifier;
use crate::store::SessionSink;
use crate::types::{
    CapturedImage, SessionStatus, Step, Verdict, VerificationResult, VerificationSession,
};

/// Simulated provider latency for demo-profile analysis.
pub const DEMO_ANALYSIS_DELAY: Duration = Duration::from_millis(2500);

/// Minimum non-whitespace length of the claimed name.
const MIN_NAME_LEN: usize = 3;

/// One in-progress verification attempt: the step sequence, the draft data,
/// and the analysis dispatch.
///
/// The flow owns its draft exclusively until a session is finalized; the
/// finalized session is handed to the injected [`SessionSink`] and owned by
/// the store from then on. Guard violations never error, they just leave the
/// step where it is.
pub struct VerificationFlow {
    step: Step,
    name: String,
    id_image: Option<CapturedImage>,
    selfie_image: Option<CapturedImage>,
    result: Option<VerificationResult>,
    analysis_in_flight: bool,
    catalog: Arc<DemoCatalog>,
    verifier: Arc<dyn IdentityVerifier>,
    sink: Arc<dyn SessionSink>,
}

impl VerificationFlow {
    pub fn new(
        catalog: Arc<DemoCatalog>,
        verifier: Arc<dyn IdentityVerifier>,
        sink: Arc<dyn SessionSink>,
    ) -> Self {
        Self {
            step: Step::Details,
            name: String::new(),
            id_image: None,
            selfie_image: None,
            result: None,
            analysis_in_flight: false,
            catalog,
            verifier,
            sink,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result(&self) -> Option<&VerificationResult> {
        self.result.as_ref()
    }

    pub fn has_id_image(&self) -> bool {
        self.id_image.is_some()
    }

    pub fn has_selfie_image(&self) -> bool {
        self.selfie_image.is_some()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        if self.step == Step::Details {
            self.name = name.into();
        }
    }

    pub fn set_id_image(&mut self, image: CapturedImage) {
        if self.step == Step::UploadId {
            self.id_image = Some(image);
        }
    }

    pub fn set_selfie_image(&mut self, image: CapturedImage) {
        if self.step == Step::UploadSelfie {
            self.selfie_image = Some(image);
        }
    }

    /// Whether the current step's forward guard is satisfied. The UI uses
    /// this to enable or disable its continue affordance.
    pub fn can_advance(&self) -> bool {
        match self.step {
            Step::Details => self.name.trim().chars().count() >= MIN_NAME_LEN,
            Step::UploadId => self.id_image.is_some(),
            Step::UploadSelfie => self.selfie_image.is_some() && !self.analysis_in_flight,
            Step::Analysis | Step::Results => false,
        }
    }

    /// Attempt the forward transition from the current step. An unmet guard
    /// leaves the step unchanged and is not an error. Leaving `UploadSelfie`
    /// runs the analysis to completion and lands on `Results`.
    pub async fn advance(&mut self) -> Result<Step> {
        if !self.can_advance() {
            return Ok(self.step);
        }

        match self.step {
            Step::Details => {
                self.step = Step::UploadId;
            }
            Step::UploadId => {
                self.step = Step::UploadSelfie;
            }
            Step::UploadSelfie => {
                self.analysis_in_flight = true;
                self.step = Step::Analysis;

                match self.run_analysis().await {
                    Ok(result) => {
                        self.finalize(result).await;
                        self.analysis_in_flight = false;
                        self.step = Step::Results;
                    }
                    Err(e) => {
                        // The verifier contract says this cannot happen; if it
                        // does, no session is recorded and the draft returns
                        // to the details step.
                        warn!(error = %e, "Analysis failed unexpectedly, reverting to details");
                        self.analysis_in_flight = false;
                        self.step = Step::Details;
                        return Err(e);
                    }
                }
            }
            Step::Analysis | Step::Results => {}
        }

        Ok(self.step)
    }

    /// Populate the draft from a demo profile and jump straight to the
    /// selfie step. Only available from `Details`; a failed image fetch
    /// propagates and leaves the draft untouched.
    pub async fn autofill(&mut self, kind: ProfileKind) -> Result<Step> {
        if self.step != Step::Details {
            return Ok(self.step);
        }

        let profile = self
            .catalog
            .find_by_kind(kind)
            .ok_or_else(|| VerifyError::Unexpected(format!("no demo profile of kind {kind:?}")))?
            .clone();

        let loaded = self.catalog.load_profile(&profile).await?;

        self.name = loaded.name;
        self.id_image = Some(loaded.id_image);
        self.selfie_image = Some(loaded.selfie_image);
        self.step = Step::UploadSelfie;

        info!(profile = %profile.name, "Demo profile auto-filled");
        Ok(self.step)
    }

    /// Explicit cancel: back to a fresh details draft. Also the escape hatch
    /// for an analysis whose future was dropped mid-flight.
    pub fn restart(&mut self) {
        self.step = Step::Details;
        self.name.clear();
        self.id_image = None;
        self.selfie_image = None;
        self.result = None;
        self.analysis_in_flight = false;
    }

    async fn run_analysis(&self) -> Result<VerificationResult> {
        // Demo short-circuit: exact-match lookup decided once, up front.
        if let Some(profile) = self.catalog.find_by_name(&self.name) {
            info!(profile = %profile.name, "Demo profile matched, skipping provider call");
            tokio::time::sleep(DEMO_ANALYSIS_DELAY).await;
            return Ok(canned_result(profile));
        }

        let id_image = self
            .id_image
            .as_ref()
            .ok_or_else(|| VerifyError::Unexpected("id image missing at analysis".to_string()))?;
        let selfie_image = self.selfie_image.as_ref().ok_or_else(|| {
            VerifyError::Unexpected("selfie image missing at analysis".to_string())
        })?;

        self.verifier
            .verify(&self.name, id_image, selfie_image)
            .await
    }

    async fn finalize(&mut self, result: VerificationResult) {
        let session = VerificationSession {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: SessionStatus::Completed,
            user_provided_name: self.name.clone(),
            result: Some(result.clone()),
        };

        info!(
            session_id = %session.id,
            verdict = ?result.verdict,
            "Verification session recorded"
        );

        self.sink.append(session).await;
        self.result = Some(result);
    }
}

/// Deterministic result for a demo profile, keyed on its kind.
fn canned_result(profile: &DemoProfile) -> VerificationResult {
    match profile.kind {
        ProfileKind::Valid => VerificationResult {
            is_id_valid: true,
            is_name_match: true,
            is_face_match: true,
            confidence_score: 98,
            extracted_name: profile.name.clone(),
            reasoning: "DEMO MODE: High-resolution ID detected. OCR confirmed name match. \
                        Biometric analysis indicates 99.8% facial vector similarity."
                .to_string(),
            verdict: Verdict::Approved,
        },
        ProfileKind::Fraud => VerificationResult {
            is_id_valid: true,
            is_name_match: true,
            is_face_match: false,
            confidence_score: 12,
            extracted_name: profile.name.clone(),
            reasoning: "DEMO MODE: Face mismatch detected. The subject in the selfie does not \
                        match the photo on the ID card. Potential identity fraud."
                .to_string(),
            verdict: Verdict::Rejected,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoProfile;
    use crate::gemini::fallback_result;
    use crate::store::{InMemorySessionStore, SessionStore};
    use async_trait::async_trait;

    /// Verifier stub: either a fixed result or a forced error.
    struct StubVerifier {
        outcome: std::result::Result<VerificationResult, String>,
    }

    impl StubVerifier {
        fn ok(result: VerificationResult) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(result),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(message.to_string()),
            })
        }
    }

    #[async_trait]
    impl IdentityVerifier for StubVerifier {
        async fn verify(
            &self,
            _claimed_name: &str,
            _id_image: &CapturedImage,
            _selfie_image: &CapturedImage,
        ) -> Result<VerificationResult> {
            self.outcome
                .clone()
                .map_err(VerifyError::Provider)
        }
    }

    fn test_image(name: &str) -> CapturedImage {
        CapturedImage::from_bytes(vec![0xFF, 0xD8, 0xFF], "image/jpeg", name)
    }

    fn flow_with(
        verifier: Arc<dyn IdentityVerifier>,
    ) -> (VerificationFlow, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let flow = VerificationFlow::new(
            Arc::new(DemoCatalog::new()),
            verifier,
            store.clone(),
        );
        (flow, store)
    }

    #[tokio::test]
    async fn short_name_blocks_the_details_step() {
        let (mut flow, _) = flow_with(StubVerifier::ok(fallback_result()));

        flow.set_name("  ab  ");
        assert!(!flow.can_advance());
        assert_eq!(flow.advance().await.unwrap(), Step::Details);

        flow.set_name("abc");
        assert_eq!(flow.advance().await.unwrap(), Step::UploadId);
    }

    #[tokio::test]
    async fn missing_images_block_the_upload_steps() {
        let (mut flow, _) = flow_with(StubVerifier::ok(fallback_result()));
        flow.set_name("Random User");
        flow.advance().await.unwrap();

        assert_eq!(flow.advance().await.unwrap(), Step::UploadId);

        flow.set_id_image(test_image("id.jpg"));
        assert_eq!(flow.advance().await.unwrap(), Step::UploadSelfie);

        assert_eq!(flow.advance().await.unwrap(), Step::UploadSelfie);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_demo_profile_yields_the_canned_approval() {
        // A failing verifier proves the demo branch never touches the
        // provider seam.
        let (mut flow, store) = flow_with(StubVerifier::failing("must not be called"));

        flow.set_name("Sarah Connor");
        flow.advance().await.unwrap();
        flow.set_id_image(test_image("id.jpg"));
        flow.advance().await.unwrap();
        flow.set_selfie_image(test_image("selfie.jpg"));

        let started = tokio::time::Instant::now();
        assert_eq!(flow.advance().await.unwrap(), Step::Results);
        assert!(started.elapsed() >= DEMO_ANALYSIS_DELAY);

        let result = flow.result().unwrap();
        assert_eq!(result.verdict, Verdict::Approved);
        assert_eq!(result.confidence_score, 98);
        assert!(result.is_id_valid && result.is_name_match && result.is_face_match);
        assert_eq!(result.extracted_name, "Sarah Connor");

        let sessions = store.list().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Completed);
        assert_eq!(sessions[0].user_provided_name, "Sarah Connor");
    }

    #[tokio::test(start_paused = true)]
    async fn fraud_demo_profile_yields_the_canned_rejection() {
        let (mut flow, _) = flow_with(StubVerifier::failing("must not be called"));

        flow.set_name("John Wick");
        flow.advance().await.unwrap();
        flow.set_id_image(test_image("id.jpg"));
        flow.advance().await.unwrap();
        flow.set_selfie_image(test_image("selfie.jpg"));
        flow.advance().await.unwrap();

        let result = flow.result().unwrap();
        assert_eq!(result.verdict, Verdict::Rejected);
        assert_eq!(result.confidence_score, 12);
        assert!(result.is_id_valid);
        assert!(result.is_name_match);
        assert!(!result.is_face_match);
    }

    #[tokio::test]
    async fn non_demo_name_goes_through_the_verifier() {
        let (mut flow, store) = flow_with(StubVerifier::ok(fallback_result()));

        flow.set_name("Random User");
        flow.advance().await.unwrap();
        flow.set_id_image(test_image("id.jpg"));
        flow.advance().await.unwrap();
        flow.set_selfie_image(test_image("selfie.jpg"));
        flow.advance().await.unwrap();

        assert_eq!(flow.step(), Step::Results);
        let result = flow.result().unwrap();
        assert_eq!(result.verdict, Verdict::ManualReview);
        assert_eq!(result.confidence_score, 0);

        let sessions = store.list().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(
            sessions[0].result.as_ref().unwrap().verdict,
            Verdict::ManualReview
        );
    }

    #[tokio::test]
    async fn verifier_error_reverts_to_details_without_a_session() {
        let (mut flow, store) = flow_with(StubVerifier::failing("boom"));

        flow.set_name("Random User");
        flow.advance().await.unwrap();
        flow.set_id_image(test_image("id.jpg"));
        flow.advance().await.unwrap();
        flow.set_selfie_image(test_image("selfie.jpg"));

        let err = flow.advance().await.unwrap_err();
        assert!(matches!(err, VerifyError::Provider(_)));
        assert_eq!(flow.step(), Step::Details);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn successful_autofill_jumps_to_the_selfie_step() {
        use axum::{Router, routing::get};

        let app = Router::new()
            .route("/id.jpg", get(|| async { vec![0xFF, 0xD8, 0xFF, 0x01] }))
            .route("/selfie.jpg", get(|| async { vec![0xFF, 0xD8, 0xFF, 0x02] }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let catalog = DemoCatalog::with_profiles(vec![DemoProfile {
            name: "Sarah Connor".to_string(),
            kind: ProfileKind::Valid,
            id_url: format!("http://{addr}/id.jpg"),
            selfie_url: format!("http://{addr}/selfie.jpg"),
        }]);
        let store = Arc::new(InMemorySessionStore::new());
        let mut flow = VerificationFlow::new(
            Arc::new(catalog),
            StubVerifier::ok(fallback_result()),
            store.clone(),
        );

        let step = flow.autofill(ProfileKind::Valid).await.unwrap();
        assert_eq!(step, Step::UploadSelfie);
        assert_eq!(flow.name(), "Sarah Connor");
        assert!(flow.has_id_image());
        assert!(flow.has_selfie_image());
        assert!(flow.can_advance());

        // Auto-fill populates the draft only; nothing is recorded yet.
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn failed_autofill_leaves_the_draft_untouched() {
        let catalog = DemoCatalog::with_profiles(vec![DemoProfile {
            name: "Offline".to_string(),
            kind: ProfileKind::Valid,
            id_url: "http://127.0.0.1:1/id.jpg".to_string(),
            selfie_url: "http://127.0.0.1:1/selfie.jpg".to_string(),
        }]);
        let store = Arc::new(InMemorySessionStore::new());
        let mut flow = VerificationFlow::new(
            Arc::new(catalog),
            StubVerifier::ok(fallback_result()),
            store,
        );

        let err = flow.autofill(ProfileKind::Valid).await.unwrap_err();
        assert!(matches!(err, VerifyError::DemoFetch(_)));
        assert_eq!(flow.step(), Step::Details);
        assert!(flow.name().is_empty());
        assert!(!flow.has_id_image());
        assert!(!flow.has_selfie_image());
    }

    #[tokio::test]
    async fn advance_at_results_is_a_no_op() {
        let (mut flow, store) = flow_with(StubVerifier::ok(fallback_result()));

        flow.set_name("Random User");
        flow.advance().await.unwrap();
        flow.set_id_image(test_image("id.jpg"));
        flow.advance().await.unwrap();
        flow.set_selfie_image(test_image("selfie.jpg"));
        flow.advance().await.unwrap();

        assert_eq!(flow.advance().await.unwrap(), Step::Results);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn restart_returns_to_a_fresh_draft() {
        let (mut flow, _) = flow_with(StubVerifier::ok(fallback_result()));

        flow.set_name("Random User");
        flow.advance().await.unwrap();
        flow.set_id_image(test_image("id.jpg"));

        flow.restart();
        assert_eq!(flow.step(), Step::Details);
        assert!(flow.name().is_empty());
        assert!(!flow.has_id_image());
    }
}
