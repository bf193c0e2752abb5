mod analysis;
mod config;
mod error;
mod imaging;
mod inference;
mod report;
mod routes;
mod storage;
#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use analysis::AppContext;
use config::AppConfig;
use inference::ModelRunner;
use routes::configure_routes;
use std::env;
use storage::ReportStore;

fn startup_failure(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::load().map_err(|e| startup_failure("Invalid configuration", e))?;

    let runner =
        ModelRunner::load(&config.models).map_err(|e| startup_failure("Model loading failed", e))?;
    for status in runner.status() {
        log::info!(
            "{} model ready: input {}, labels {:?}",
            status.kind.title(),
            status.input_shape,
            status.labels
        );
    }

    let store = ReportStore::new(&config.storage.reports_dir)
        .map_err(|e| startup_failure("Report storage unavailable", e))?;
    let context = web::Data::new(AppContext::from_config(&config, runner));
    let store = web::Data::new(store);

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(context.clone())
            .app_data(store.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
