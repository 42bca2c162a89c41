use actix_web::HttpResponse;
use serde::Serialize;

use crate::errors::ApiError;

// Envelope shared by the JSON endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub code: u16,
    pub result: Option<T>,
    pub error: Option<ApiError>,
}

impl ApiResponse<()> {
    pub fn failure(error: ApiError) -> Self {
        ApiResponse {
            status: "FAILURE".to_string(),
            code: error.code,
            result: None,
            error: Some(error),
        }
    }
}

// Success response helper
pub fn success_response<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        status: "SUCCESS".to_string(),
        code: 200,
        result: Some(data),
        error: None,
    })
}
