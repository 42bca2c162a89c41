use actix_web::web;
mod handlers;
pub mod page;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::health)
        .service(handlers::default_countdown)
        .service(handlers::height_status)
        .service(handlers::countdown_json)
        .service(handlers::countdown_page);
}
