pub mod auth;
pub mod catalog;
pub mod payments;
pub mod subscriptions;
pub mod webhooks_payfast;

use actix_web::web;

/// Registers every route. Public routes come first so the `/api` scope does not
/// shadow the webhook alias.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(catalog::list_tiers)
        .service(subscriptions::read_entitlement)
        .service(webhooks_payfast::payfast_notify)
        .service(webhooks_payfast::payfast_notify_alias)
        .service(
            web::scope("/api")
                .wrap(auth::JwtMiddleware)
                .service(payments::create_payment)
                .service(subscriptions::manual_update)
                .service(subscriptions::self_update)
                .service(subscriptions::feature_access)
                .service(subscriptions::cancel_subscription)
                .service(subscriptions::list_transactions)
                .service(subscriptions::admin_set_entitlement),
        );
}
