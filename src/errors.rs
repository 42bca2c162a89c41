use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::{models::api_response::ApiResponse, services::UpstreamError};

/// Errors scoped to a single countdown request.
#[derive(Error, Debug)]
pub enum CountdownError {
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Upstream error for {network}: {source}")]
    Upstream {
        network: String,
        #[source]
        source: UpstreamError,
    },
}

// Error body of the JSON envelope
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

impl ResponseError for CountdownError {
    fn status_code(&self) -> StatusCode {
        match self {
            CountdownError::NetworkNotFound(_) => StatusCode::NOT_FOUND,
            CountdownError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let response = ApiResponse::failure(ApiError {
            code: status.as_u16(),
            message: self.to_string(),
        });
        HttpResponse::build(status).json(response)
    }
}
