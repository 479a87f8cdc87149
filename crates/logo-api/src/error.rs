use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use logo_proto::ErrorBody;
use logo_vision::weights::WeightsError;
use thiserror::Error;

/// Every way a detection request can fail.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unsupported file type {got:?}; allowed: {allowed}")]
    UnsupportedMediaType { got: String, allowed: String },
    #[error("empty file")]
    EmptyInput,
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("invalid image file: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    WeightsMissing(String),
    #[error("request processing timed out")]
    Timeout,
    #[error("{0}")]
    InternalError(String),
}

impl DetectError {
    pub fn status(&self) -> StatusCode {
        match self {
            DetectError::UnsupportedMediaType { .. } | DetectError::EmptyInput | DetectError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            DetectError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DetectError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            DetectError::WeightsMissing(_) | DetectError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for the `error` field and for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::UnsupportedMediaType { .. } => "Unsupported media type",
            DetectError::EmptyInput => "Empty file",
            DetectError::PayloadTooLarge(_) => "Payload too large",
            DetectError::InvalidInput(_) => "Invalid image",
            DetectError::WeightsMissing(_) => "Weights not found",
            DetectError::Timeout => "Timeout",
            DetectError::InternalError(_) => "Internal error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody { error: self.kind().to_string(), detail: self.to_string() }
    }
}

impl From<WeightsError> for DetectError {
    fn from(e: WeightsError) -> Self {
        if matches!(e, WeightsError::Missing(_)) {
            DetectError::WeightsMissing(e.to_string())
        } else {
            DetectError::InternalError(e.to_string())
        }
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (DetectError::UnsupportedMediaType { got: "text/plain".into(), allowed: "image/png".into() }, 400),
            (DetectError::EmptyInput, 400),
            (DetectError::PayloadTooLarge("x".into()), 413),
            (DetectError::InvalidInput("x".into()), 400),
            (DetectError::WeightsMissing("x".into()), 500),
            (DetectError::Timeout, 504),
            (DetectError::InternalError("x".into()), 500),
        ];
        for (e, code) in cases {
            assert_eq!(e.status().as_u16(), code, "{:?}", e);
        }
    }

    #[test]
    fn missing_weights_is_500() {
        let e: DetectError = WeightsError::Missing("weights/best.tflite".into()).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.body().error, "Weights not found");
        assert!(e.body().detail.contains("weights/best.tflite"));
    }

    #[test]
    fn body_names_allowed_types() {
        let e = DetectError::UnsupportedMediaType { got: "text/plain".into(), allowed: "image/jpeg, image/png".into() };
        let b = e.body();
        assert_eq!(b.error, "Unsupported media type");
        assert!(b.detail.contains("image/jpeg, image/png"));
    }
}
