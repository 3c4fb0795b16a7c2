use axum::http::StatusCode;

pub async fn health_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}
