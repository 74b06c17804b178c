// src/api/catalog.rs

use actix_web::{get, HttpResponse, Responder};

use crate::tiers::CATALOG;

#[utoipa::path(
    get,
    path = "/tiers",
    tag = "payments",
    responses(
        (status = 200, description = "Tier catalog in rank order", body = [crate::tiers::TierPlan])
    )
)]
#[get("/tiers")]
pub async fn list_tiers() -> impl Responder {
    HttpResponse::Ok().json(&CATALOG[..])
}
