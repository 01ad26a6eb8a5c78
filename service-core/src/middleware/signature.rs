use crate::error::AppError;
use crate::utils::signature::verify_webhook;
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;

pub const WEBHOOK_ID_HEADER: &str = "svix-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "svix-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "svix-signature";

/// Accepted clock skew between the sender and us.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

#[derive(Clone, Debug)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_seconds: i64) -> Self {
        self.tolerance_seconds = tolerance_seconds;
        self
    }

    /// Check a delivery against the configured secret at unix time `now`.
    pub fn verify(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: i64,
    ) -> Result<(), AppError> {
        let msg_id = get_header(headers, WEBHOOK_ID_HEADER);
        let timestamp = get_header(headers, WEBHOOK_TIMESTAMP_HEADER);
        let signature = get_header(headers, WEBHOOK_SIGNATURE_HEADER);

        let (Some(msg_id), Some(timestamp), Some(signature)) = (msg_id, timestamp, signature)
        else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Error: Missing svix headers"
            )));
        };

        let secret = self.secret.as_deref().ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("Error: Missing webhook secret"))
        })?;

        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid svix-timestamp")))?;

        if (now - timestamp).abs() > self.tolerance_seconds {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Webhook timestamp outside tolerance"
            )));
        }

        let is_valid = verify_webhook(secret, msg_id, timestamp, body, signature)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Webhook secret unusable: {}", e)))?;

        if !is_valid {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid webhook signature"
            )));
        }

        Ok(())
    }
}

/// Buffer the body, verify the Svix signature and hand the request on with
/// the same bytes.
pub async fn webhook_signature_middleware(
    State(verifier): State<WebhookVerifier>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Failed to read body: {}", e)))?
        .to_bytes();

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = verifier.verify(&parts.headers, &bytes, now) {
        tracing::warn!(error = %e, "Rejected webhook delivery");
        return Err(e);
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

fn get_header<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
