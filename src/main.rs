//! checkout-sim
//!
//! Walks one customer through a purchase against the in-memory storefront:
//! session and ticket selection, customer details, payment and confirmation.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use ticket_checkout::{
    config::Config,
    confirm::{confirm, download_tickets, ConfirmationState},
    models::ContactDetails,
    payment::{PaymentOutcome, PaymentStatus},
    services::{memory::Catalog, InMemoryStorefront, ScriptedPaymentWidget, TicketDownloader},
    storage::MemoryStore,
    telemetry,
    timer::SystemClock,
    CheckoutContext, CheckoutFlow, Collaborators, SubmitOutcome,
};

fn load_catalog(path: Option<&str>) -> Result<Catalog> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog {path}"))?;
            Catalog::from_json(&json).with_context(|| format!("invalid catalog {path}"))
        }
        None => Ok(Catalog::demo()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    telemetry::init(&config.app);

    info!(environment = %config.app.environment, "Starting checkout simulation");

    let catalog = load_catalog(config.app.catalog_path.as_deref())?;
    let storefront = InMemoryStorefront::new(catalog)
        .with_hold(chrono::Duration::minutes(config.cart.hold_minutes));
    let widget = Arc::new(ScriptedPaymentWidget::new());

    let mut flow = CheckoutFlow::new(
        CheckoutContext::from_config(&config),
        Collaborators {
            inventory: Arc::new(storefront.clone()),
            carts: Arc::new(storefront.clone()),
            payment: widget.clone(),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
        },
    );
    flow.restore().await?;

    // Session selection
    let sessions = flow.sessions().await?;
    let Some(session) = sessions.into_iter().next() else {
        bail!("the catalog has no sessions on sale");
    };
    info!(session_id = %session.id, start = %session.start, venue = %session.venue.name, "choosing session");
    flow.choose_session(session).await?;

    // Ticket selection
    let options = flow.ticket_options()?;
    for option in &options {
        info!(
            ticket_type = %option.ticket_type.ticket_type.name,
            price = %option.ticket_type.price,
            max = option.max,
            "ticket option"
        );
    }
    let Some(option) = options.iter().find(|option| option.max > 0) else {
        bail!("the session is sold out");
    };
    flow.set_quantity(&option.ticket_type.key(), option.max.min(2)).await?;
    info!(total = %flow.cart().total, expires = %flow.cart().expires, "cart updated");
    if let Some(status) = flow.tick(chrono::Utc::now()) {
        info!("{}", status);
    }

    // Customer details
    flow.checkout().await?;
    flow.set_contact(ContactDetails {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        phone: "0400 000 000".to_string(),
        accepts_marketing: false,
    });
    if let SubmitOutcome::Declined(message) = flow.submit().await? {
        bail!("payment declined: {message}");
    }

    // The gateway takes the payment and sends the customer back
    let secret = flow
        .cart()
        .payment_intent_client_secret
        .clone()
        .context("cart has no payment intent")?;
    let intent_id = secret.trim_end_matches("_secret").to_string();
    storefront.complete_payment(&intent_id)?;
    widget.set_intent_status(&secret, PaymentStatus::Succeeded);

    match flow.handle_payment_return(&secret).await {
        PaymentOutcome::Redirect { message, location } => info!(%location, "{}", message),
        outcome => bail!("payment not completed: {}", outcome.message()),
    }

    // Confirmation
    match confirm(Some(intent_id.as_str()), &storefront, &config.account).await? {
        ConfirmationState::Pending => info!("order is still being processed"),
        ConfirmationState::Ready(confirmation) => {
            info!(order = %confirmation.public_id, email = %confirmation.contact.email, "You're going!");
            for ticket in &confirmation.tickets {
                info!(
                    ticket = %ticket.number,
                    ticket_type = %ticket.session_ticket_type.ticket_type_name,
                    price = %ticket.price,
                    "ticket"
                );
            }
            for fee in &confirmation.fees {
                info!("{}: {}", fee.label, fee.amount);
            }

            if config.download.storefront_domain.is_some() {
                let downloader =
                    TicketDownloader::from_config(&config.download, &config.circuit_breaker)?;
                match download_tickets(&downloader, &confirmation).await {
                    Ok(download) => {
                        std::fs::write(download.file_name, &download.bytes)
                            .with_context(|| format!("failed to write {}", download.file_name))?;
                        info!(file = download.file_name, bytes = download.bytes.len(), "tickets saved");
                    }
                    Err(e) => warn!("{}", e),
                }
            }
        }
    }

    Ok(())
}
