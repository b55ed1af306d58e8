pub const LIVENESS_MESSAGE: &str = "commitsync API server is running!";

#[tracing::instrument(name = "http::health")]
pub async fn health() -> &'static str {
    LIVENESS_MESSAGE
}
