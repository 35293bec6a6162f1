//! Task/user REST backend that keeps task assignments and users' pending
//! task lists consistent through transactional writes.

pub mod app_state;
pub mod config;
pub mod error;
pub mod integrity;
pub mod models;
pub mod query;
pub mod response;
pub mod store;
pub mod tasks;
pub mod users;
pub mod validation;

use actix_web::web;

/// Registers the `/tasks` and `/users` routes together with the JSON and
/// query extractor settings they rely on.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(response::json_error_handler))
        .app_data(web::QueryConfig::default().error_handler(response::query_error_handler))
        .service(
            web::scope("/tasks")
                .route("", web::get().to(tasks::list_tasks))
                .route("", web::post().to(tasks::create_task))
                .route("/{id}", web::get().to(tasks::get_task))
                .route("/{id}", web::put().to(tasks::update_task))
                .route("/{id}", web::delete().to(tasks::delete_task)),
        )
        .service(
            web::scope("/users")
                .route("", web::get().to(users::list_users))
                .route("", web::post().to(users::create_user))
                .route("/{id}", web::get().to(users::get_user))
                .route("/{id}", web::put().to(users::update_user))
                .route("/{id}", web::delete().to(users::delete_user)),
        );
}
