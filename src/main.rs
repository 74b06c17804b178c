// src/main.rs
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use sqlx::PgPool;
use std::io;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use site_entitlements::config::Config;
use site_entitlements::db::PgEntitlementStore;
use site_entitlements::store::{EntitlementStore, MemoryEntitlementStore};
use site_entitlements::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

async fn connect(url: &str, migrate: bool) -> io::Result<PgEntitlementStore> {
    let pool = PgPool::connect(url).await.map_err(io::Error::other)?;
    if migrate {
        sqlx::migrate!().run(&pool).await.map_err(io::Error::other)?;
    }
    Ok(PgEntitlementStore::new(pool))
}

async fn build_stores(
    config: &Config,
) -> io::Result<(Arc<dyn EntitlementStore>, Arc<dyn EntitlementStore>)> {
    let Some(database_url) = config.database_url.as_deref() else {
        log::warn!("DATABASE_URL not set; entitlements are kept in memory");
        let store: Arc<dyn EntitlementStore> = Arc::new(MemoryEntitlementStore::new());
        return Ok((store.clone(), store));
    };

    let store: Arc<dyn EntitlementStore> = Arc::new(connect(database_url, true).await?);
    let self_store: Arc<dyn EntitlementStore> = match config.client_database_url.as_deref() {
        Some(url) => Arc::new(connect(url, false).await?),
        None => store.clone(),
    };

    match store.can_write().await {
        Ok(true) => log::info!("entitlement store writable with server credentials"),
        Ok(false) => log::warn!(
            "server credentials cannot write entitlements; manual updates will return admin_permissions_missing"
        ),
        Err(e) => log::warn!("could not probe entitlement write privilege: {e}"),
    }

    Ok((store, self_store))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(io::Error::other)?;
    let (store, self_store) = build_stores(&config).await?;

    log::info!(
        "starting site-entitlements bind={}:{} admins={} gateway_validation={}",
        config.bind_addr,
        config.port,
        config.admins.len(),
        config.payfast.validate_url.is_some()
    );

    let state = web::Data::new(AppState::new(&config, store, self_store));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .configure(api::configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
