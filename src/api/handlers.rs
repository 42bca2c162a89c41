use actix_web::{get, http::header::ContentType, web, HttpResponse};

use super::page::render_countdown_page;
use crate::{
    errors::CountdownError,
    models::{api_response::success_response, HeightStatus},
    services::CountdownResolver,
};

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[get("/")]
async fn default_countdown(
    resolver: web::Data<CountdownResolver>,
) -> Result<HttpResponse, CountdownError> {
    let countdown = resolver.resolve(resolver.default_network()).await?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(render_countdown_page(&countdown)))
}

#[get("/{network}")]
async fn countdown_page(
    network: web::Path<String>,
    resolver: web::Data<CountdownResolver>,
) -> Result<HttpResponse, CountdownError> {
    let countdown = resolver.resolve(&network).await?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(render_countdown_page(&countdown)))
}

#[get("/{network}/status")]
async fn height_status(
    network: web::Path<String>,
    resolver: web::Data<CountdownResolver>,
) -> Result<HttpResponse, CountdownError> {
    let current_height = resolver.current_height(&network).await?;
    Ok(HttpResponse::Ok().json(HeightStatus { current_height }))
}

#[get("/{network}/countdown")]
async fn countdown_json(
    network: web::Path<String>,
    resolver: web::Data<CountdownResolver>,
) -> Result<HttpResponse, CountdownError> {
    let countdown = resolver.resolve(&network).await?;
    Ok(success_response(countdown))
}
