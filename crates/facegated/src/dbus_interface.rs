use std::sync::Arc;
use std::time::Duration;

use facegate_core::{
    Account, AccountStore, AuthError, AuthOutcome, Authenticator, CommandExtractor, Enroller,
    EnrollmentError, ErrorKind, IdentityId, Registration, Threshold,
};
use facegate_store::SqliteStore;
use serde::Serialize;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.facegate.FaceGate1";
pub const OBJECT_PATH: &str = "/org/facegate/FaceGate1";

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.FaceGate1
/// Object path: /org/facegate/FaceGate1
pub struct FaceGateService {
    store: Arc<SqliteStore>,
    extractor: Arc<CommandExtractor>,
    enroller: Enroller<SqliteStore, CommandExtractor>,
    authenticator: Authenticator<SqliteStore, CommandExtractor>,
}

impl FaceGateService {
    pub fn new(
        store: Arc<SqliteStore>,
        extractor: Arc<CommandExtractor>,
        threshold: Threshold,
        extract_timeout: Duration,
    ) -> Self {
        Self {
            enroller: Enroller::new(Arc::clone(&store), Arc::clone(&extractor))
                .with_extract_timeout(extract_timeout),
            authenticator: Authenticator::new(Arc::clone(&store), Arc::clone(&extractor))
                .with_threshold(threshold)
                .with_extract_timeout(extract_timeout),
            store,
            extractor,
        }
    }
}

/// Wire form of an [`AuthOutcome`].
#[derive(Debug, Serialize)]
struct OutcomeReply<'a> {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<facegate_core::RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<&'a Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<IdentityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
}

fn outcome_json(outcome: &AuthOutcome) -> String {
    let decision = outcome.decision();
    let (account, reason) = match outcome {
        AuthOutcome::Authenticated { account, .. } => (Some(account), None),
        AuthOutcome::Rejected { reason, .. } => (None, Some(*reason)),
    };
    let reply = OutcomeReply {
        authenticated: outcome.is_authenticated(),
        reason,
        account,
        identity: decision.and_then(|d| d.identity),
        distance: decision.map(|d| d.distance),
        confidence: decision.map(|d| d.confidence()),
    };
    to_json(&reply)
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize reply");
        "null".to_string()
    })
}

fn to_fdo(kind: ErrorKind, message: String) -> fdo::Error {
    match kind {
        ErrorKind::Input => fdo::Error::InvalidArgs(message),
        ErrorKind::Precondition => fdo::Error::Failed(message),
        ErrorKind::Storage | ErrorKind::Unavailable => fdo::Error::IOError(message),
        ErrorKind::Internal => fdo::Error::Failed(message),
    }
}

impl From<EnrollmentError> for Reply {
    fn from(err: EnrollmentError) -> Self {
        Reply(to_fdo(err.kind(), err.to_string()))
    }
}

impl From<AuthError> for Reply {
    fn from(err: AuthError) -> Self {
        Reply(to_fdo(err.kind(), err.to_string()))
    }
}

impl From<facegate_core::StoreError> for Reply {
    fn from(err: facegate_core::StoreError) -> Self {
        Reply(fdo::Error::IOError(err.to_string()))
    }
}

/// A workflow error already translated to its D-Bus form.
struct Reply(fdo::Error);

fn fail<E: Into<Reply> + std::fmt::Display>(method: &'static str) -> impl FnOnce(E) -> fdo::Error {
    move |err| {
        tracing::warn!(method, error = %err, "request failed");
        err.into().0
    }
}

/// A negative threshold selects the configured default.
fn threshold_arg(value: f64) -> fdo::Result<Option<Threshold>> {
    if value < 0.0 {
        return Ok(None);
    }
    Threshold::new(value)
        .map(Some)
        .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "org.facegate.FaceGate1")]
impl FaceGateService {
    /// Create an account from credentials plus exactly one face.
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        image: Vec<u8>,
    ) -> fdo::Result<String> {
        tracing::info!(username, bytes = image.len(), "register requested");
        let registration = Registration {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let account = self
            .enroller
            .register(registration, &image)
            .await
            .map_err(fail("register"))?;
        Ok(to_json(&account))
    }

    /// Add a signature for an existing identity.
    async fn enroll(&self, identity: i64, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(identity, bytes = image.len(), "enroll requested");
        let id = self
            .enroller
            .enroll(IdentityId(identity), &image)
            .await
            .map_err(fail("enroll"))?;
        Ok(serde_json::json!({ "signature_id": id }).to_string())
    }

    async fn verify(&self, identity: i64, image: Vec<u8>, threshold: f64) -> fdo::Result<String> {
        tracing::info!(identity, "verify requested");
        let threshold = threshold_arg(threshold)?;
        let outcome = self
            .authenticator
            .verify(IdentityId(identity), &image, threshold)
            .await
            .map_err(fail("verify"))?;
        Ok(outcome_json(&outcome))
    }

    async fn identify(&self, image: Vec<u8>, threshold: f64) -> fdo::Result<String> {
        tracing::info!("identify requested");
        let threshold = threshold_arg(threshold)?;
        let outcome = self
            .authenticator
            .identify(&image, threshold)
            .await
            .map_err(fail("identify"))?;
        Ok(outcome_json(&outcome))
    }

    /// Password login fallback.
    async fn login(&self, username: &str, password: &str) -> fdo::Result<String> {
        tracing::info!(username, "login requested");
        let outcome = self
            .authenticator
            .login_with_password(username, password)
            .await
            .map_err(fail("login"))?;
        Ok(outcome_json(&outcome))
    }

    async fn list_accounts(&self) -> fdo::Result<String> {
        let accounts = self.store.list_accounts().await.map_err(fail("list_accounts"))?;
        Ok(to_json(&accounts))
    }

    async fn set_enabled(&self, identity: i64, enabled: bool) -> fdo::Result<bool> {
        self.store
            .set_enabled(IdentityId(identity), enabled)
            .await
            .map_err(fail("set_enabled"))
    }

    /// Delete an identity together with all of its signatures.
    async fn remove_identity(&self, identity: i64) -> fdo::Result<bool> {
        self.store
            .delete_identity(IdentityId(identity))
            .await
            .map_err(fail("remove_identity"))
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let (identities, signatures) = self.store.counts().await.map_err(fail("status"))?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.store.path().display().to_string(),
            "encrypted": self.store.is_encrypted(),
            "dimension": self.store.dimension(),
            "threshold": self.authenticator.default_threshold().value(),
            "extractor": self.extractor.program().display().to_string(),
            "identities": identities,
            "signatures": signatures,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{MatchDecision, RejectReason};
    use facegate_store::StoreConfig;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    /// An extractor that ignores its input and reports a fixed set of faces.
    fn scripted(faces: &str) -> CommandExtractor {
        CommandExtractor::new(
            "sh",
            vec![
                "-c".into(),
                format!("cat > /dev/null; echo '{{\"faces\": {faces}}}'"),
            ],
        )
    }

    async fn service(dir: &TempDir, faces: &str) -> FaceGateService {
        let store = SqliteStore::open(StoreConfig {
            dimension: 2,
            ..StoreConfig::new(dir.path().join("faces.db"))
        })
        .await
        .unwrap();
        FaceGateService::new(
            Arc::new(store),
            Arc::new(scripted(faces)),
            Threshold::default(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_error_kinds_map_to_dbus_errors() {
        assert!(matches!(to_fdo(ErrorKind::Input, "x".into()), fdo::Error::InvalidArgs(_)));
        assert!(matches!(to_fdo(ErrorKind::Precondition, "x".into()), fdo::Error::Failed(_)));
        assert!(matches!(to_fdo(ErrorKind::Storage, "x".into()), fdo::Error::IOError(_)));
        assert!(matches!(to_fdo(ErrorKind::Unavailable, "x".into()), fdo::Error::IOError(_)));
    }

    #[test]
    fn test_threshold_argument() {
        assert_eq!(threshold_arg(-1.0).unwrap(), None);
        assert_eq!(threshold_arg(0.4).unwrap().map(Threshold::value), Some(0.4));
        assert!(matches!(threshold_arg(f64::NAN), Err(fdo::Error::InvalidArgs(_))));
        assert!(matches!(threshold_arg(f64::INFINITY), Err(fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_rejected_outcome_json() {
        let outcome = AuthOutcome::Rejected {
            reason: RejectReason::FaceNotRecognized,
            decision: Some(MatchDecision { matched: false, identity: None, distance: 0.75 }),
        };
        let json: serde_json::Value = serde_json::from_str(&outcome_json(&outcome)).unwrap();
        assert_eq!(json["authenticated"], false);
        assert_eq!(json["reason"], "face_not_recognized");
        assert!(json.get("identity").is_none());
        assert!(json.get("account").is_none());
        assert!((json["confidence"].as_f64().unwrap() - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_register_then_identify() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, "[[0.1, 0.2]]").await;

        let account: serde_json::Value = serde_json::from_str(
            &service
                .register("ana", "ana@example.com", "secret1", PNG.to_vec())
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(account["username"], "ana");

        let reply: serde_json::Value =
            serde_json::from_str(&service.identify(PNG.to_vec(), -1.0).await.unwrap()).unwrap();
        assert_eq!(reply["authenticated"], true);
        assert_eq!(reply["account"]["username"], "ana");
        assert_eq!(reply["distance"], 0.0);

        let status: serde_json::Value =
            serde_json::from_str(&service.status().await.unwrap()).unwrap();
        assert_eq!(status["identities"], 1);
        assert_eq!(status["signatures"], 1);
    }

    #[tokio::test]
    async fn test_failures_carry_their_kind() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, "[[0.1, 0.2], [0.3, 0.4]]").await;

        let err = service
            .register("ana", "ana@example.com", "secret1", PNG.to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));

        let err = service.identify(PNG.to_vec(), -1.0).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));

        let err = service.enroll(99, b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, fdo::Error::InvalidArgs(_)));

        assert!(!service.remove_identity(99).await.unwrap());
        assert!(!service.set_enabled(99, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_broken_extractor_is_not_blamed_on_the_caller() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(StoreConfig {
            dimension: 2,
            ..StoreConfig::new(dir.path().join("faces.db"))
        })
        .await
        .unwrap();
        let crashing = CommandExtractor::new("sh", vec!["-c".into(), "cat > /dev/null; exit 3".into()]);
        let service = FaceGateService::new(
            Arc::new(store),
            Arc::new(crashing),
            Threshold::default(),
            Duration::from_secs(5),
        );

        let err = service
            .register("ana", "ana@example.com", "secret1", PNG.to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, fdo::Error::IOError(_)));

        let status: serde_json::Value =
            serde_json::from_str(&service.status().await.unwrap()).unwrap();
        assert_eq!(status["identities"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_names_the_field() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, "[[0.1, 0.2]]").await;
        service
            .register("ana", "ana@example.com", "secret1", PNG.to_vec())
            .await
            .unwrap();

        let err = service
            .register("ana2", "ana@example.com", "secret1", PNG.to_vec())
            .await
            .unwrap_err();
        match err {
            fdo::Error::Failed(message) => assert_eq!(message, "email is already registered"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_gallery_is_a_precondition_failure() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, "[[0.1, 0.2]]").await;

        let err = service.identify(PNG.to_vec(), 0.5).await.unwrap_err();
        assert!(matches!(err, fdo::Error::Failed(_)));

        let err = service.verify(7, PNG.to_vec(), -1.0).await.unwrap_err();
        assert!(matches!(err, fdo::Error::Failed(_)));
    }

    #[tokio::test]
    async fn test_password_login_reply() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, "[[0.1, 0.2]]").await;
        service
            .register("ana", "ana@example.com", "secret1", PNG.to_vec())
            .await
            .unwrap();

        let ok: serde_json::Value =
            serde_json::from_str(&service.login("ana", "secret1").await.unwrap()).unwrap();
        assert_eq!(ok["authenticated"], true);
        assert!(ok.get("distance").is_none());

        let bad: serde_json::Value =
            serde_json::from_str(&service.login("ana", "wrong!").await.unwrap()).unwrap();
        assert_eq!(bad["reason"], "invalid_credentials");

        let listed: serde_json::Value =
            serde_json::from_str(&service.list_accounts().await.unwrap()).unwrap();
        assert!(listed[0]["last_authenticated_at"].is_string());
    }
}
