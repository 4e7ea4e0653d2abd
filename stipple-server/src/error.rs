use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error returned by the HTTP handlers.
///
/// Every failure of the generation path collapses into one 500 response
/// carrying a human-readable detail string.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Error generating image: {0}")]
    Generation(String),
}

impl ApiError {
    /// Reports the innermost cause of `err`, without the context layers
    /// added on the way up.
    pub fn generation(err: &anyhow::Error) -> Self {
        Self::Generation(err.root_cause().to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn generation_error_uses_root_cause() {
        let err = Err::<(), _>(anyhow::anyhow!("out of memory"))
            .context("model run failed")
            .unwrap_err();
        assert_eq!(
            ApiError::generation(&err).to_string(),
            "Error generating image: out of memory"
        );
    }
}
