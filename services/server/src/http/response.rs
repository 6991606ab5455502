use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quiz_protocol::HttpErrorEnvelope;
use std::fmt::Display;

pub type HttpResponse = Response;

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        err.to_string(),
    )
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn precondition_failed(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::CONFLICT, "PRECONDITION_FAILED", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error_response(
        response: Response,
        expected_status: StatusCode,
        expected_code: &str,
        expected_message: &str,
    ) {
        assert_eq!(response.status(), expected_status);

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        let parsed: HttpErrorEnvelope =
            serde_json::from_slice(&body).expect("response body should be valid error json");

        assert_eq!(parsed.code, expected_code);
        assert_eq!(parsed.message, expected_message);
        assert_eq!(parsed.details, None);
    }

    #[tokio::test]
    async fn bad_request_sets_the_validation_contract() {
        assert_error_response(
            bad_request("start time is in the past"),
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "start time is in the past",
        )
        .await;
    }

    #[tokio::test]
    async fn precondition_failed_maps_to_conflict() {
        assert_error_response(
            precondition_failed("quiz already started"),
            StatusCode::CONFLICT,
            "PRECONDITION_FAILED",
            "quiz already started",
        )
        .await;
    }

    #[tokio::test]
    async fn internal_error_sets_the_internal_contract() {
        assert_error_response(
            internal_error("database unavailable"),
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "database unavailable",
        )
        .await;
    }

    #[tokio::test]
    async fn not_found_sets_the_not_found_contract() {
        assert_error_response(
            not_found("no active quiz"),
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "no active quiz",
        )
        .await;
    }
}
