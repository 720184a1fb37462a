mod actions;
mod config;
mod database;
mod error;
mod model;
mod pages;
mod pocketbase;
mod quota;
mod session;

use actix_identity::IdentityService;
use actix_web::{middleware::Logger, web, App, HttpServer};
use config::{Config, StoreSettings};
use database::RecordStore;
use log::info;
use pocketbase::PocketBase;
use std::io;
use std::sync::Arc;

fn startup_error<E: std::fmt::Display>(err: E, message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", message, err))
}

#[actix_rt::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("festival=debug,actix_web=info"),
    )
    .init();

    let config = Config::load().map_err(|err| startup_error(err, "Configuration error"))?;
    let tera = tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
        .map_err(|err| startup_error(err, "Template error"))?;

    let store: Arc<dyn RecordStore> = match &config.store {
        StoreSettings::Sled { path } => {
            info!("Using sled store at {}", path);
            Arc::new(sled::open(path).map_err(|err| startup_error(err, "Database error"))?)
        }
        StoreSettings::PocketBase(settings) => {
            info!(
                "Using PocketBase collection {} at {}",
                settings.collection, settings.url
            );
            Arc::new(PocketBase::new(settings))
        }
    };

    let bind = config.bind.clone();
    let store = web::Data::from(store);
    let tera = web::Data::new(tera);
    let config = web::Data::new(config);

    info!("Listening on {}", bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(session::cookie_policy(
                &config.session_key,
                config.session_lifetime,
                config.secure_cookie,
            )))
            .app_data(tera.clone())
            .app_data(store.clone())
            .app_data(config.clone())
            .configure(pages::configure)
    })
    .bind(bind)?
    .run()
    .await
}
