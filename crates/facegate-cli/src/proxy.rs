//! Client side of `org.facegate.FaceGate1`. Every string reply is JSON.

#[zbus::proxy(
    interface = "org.facegate.FaceGate1",
    default_service = "org.facegate.FaceGate1",
    default_path = "/org/facegate/FaceGate1"
)]
pub trait FaceGate {
    fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        image: &[u8],
    ) -> zbus::Result<String>;

    fn enroll(&self, identity: i64, image: &[u8]) -> zbus::Result<String>;

    /// A negative threshold asks for the daemon's default.
    fn verify(&self, identity: i64, image: &[u8], threshold: f64) -> zbus::Result<String>;

    fn identify(&self, image: &[u8], threshold: f64) -> zbus::Result<String>;

    fn login(&self, username: &str, password: &str) -> zbus::Result<String>;

    fn list_accounts(&self) -> zbus::Result<String>;

    fn set_enabled(&self, identity: i64, enabled: bool) -> zbus::Result<bool>;

    fn remove_identity(&self, identity: i64) -> zbus::Result<bool>;

    fn status(&self) -> zbus::Result<String>;
}
