use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use metrics::counter;
use thiserror::Error;

use crate::types::ErrorResponse;

#[derive(Debug, Error, PartialEq)]
pub enum EmotionError {
    #[error("No text provided")]
    NoText,

    /// Anything that went wrong after validation. The message is returned to
    /// the caller as is.
    #[error("{0}")]
    Failure(String),
}

impl EmotionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoText => StatusCode::BAD_REQUEST,
            Self::Failure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NoText => "validation",
            Self::Failure(_) => "failure",
        }
    }
}

impl From<anyhow::Error> for EmotionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failure(err.to_string())
    }
}

impl IntoResponse for EmotionError {
    fn into_response(self) -> Response {
        counter!("emotion_failures_total", "kind" => self.kind()).increment(1);
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
