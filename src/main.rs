use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use taskboard::app_state::AppState;
use taskboard::config::{Config, StoreBackend};
use taskboard::store::{MemoryStore, MongoStore, Store};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let store: Arc<dyn Store> = match &config.store {
        StoreBackend::Mongo { uri } => {
            let mongo = MongoStore::connect(uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            mongo
                .ensure_indexes()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            info!("Connected to MongoDB database {}", config.database_name);
            Arc::new(mongo)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, config.clone());
    let frontend_origin = config.frontend_origin.clone();

    info!("Server running at http://{}", config.bind_address);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(taskboard::configure)
    })
    .bind(config.bind_address.as_str())?
    .run()
    .await
}
