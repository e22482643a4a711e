// GTD backend: users, projects and tasks behind a JWT-protected JSON API.
mod auth_utils;
mod config;
mod db;
mod error_handler;
mod handlers;
mod models;
mod routes;
pub mod schema;

use actix_cors::Cors;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use config::AppConfig;
use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Le .env doit être chargé avant le logger pour que RUST_LOG y soit pris en compte.
    let dotenv_result = if cfg!(debug_assertions) {
        Some(dotenvy::dotenv())
    } else {
        None
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match dotenv_result {
        Some(Ok(path)) => log::info!(".env file loaded from path: {}", path.display()),
        Some(Err(e)) => log::warn!(
            "Could not load .env file: {}, using environment variables.",
            e
        ),
        None => {}
    }

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let pool = db::create_pool(&config.database_url, config.db_pool_max_size)
        .await
        .map_err(|e| {
            log::error!("Failed to create database connection pool: {}", e);
            io::Error::new(io::ErrorKind::Other, e.to_string())
        })?;

    log::info!("🚀 GTD Backend Service starting...");

    let bind_address = config.bind_address();
    log::info!("Server will start at http://{}", bind_address);

    let config_data = web::Data::new(config);
    let pool_data = web::Data::new(pool);
    let shared_pool = pool_data.clone();

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config_data.frontend_url_prod)
            .allowed_origin(&config_data.frontend_url_dev)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(config_data.clone())
            .app_data(pool_data.clone())
            .configure(routes::configure)
            .default_service(web::route().to(routes::not_found))
    })
    .bind(&bind_address)?
    .run()
    .await?;

    let state = shared_pool.state();
    log::info!(
        "Server stopped, releasing database pool ({} connection(s) open)",
        state.connections
    );
    drop(shared_pool);

    Ok(())
}
