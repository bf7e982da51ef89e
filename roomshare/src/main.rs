//! Roomshare walkthrough.
//!
//! Seeds one shareable room and a handful of accounts on the configured
//! backend, then drives the marketplace core through party formation,
//! winner selection and free-view exhaustion, logging every outcome.

use roomshare::{Backend, Config, PartyVisibility, RoomDetail, Services};
use roomshare_core::environment::SystemClock;
use roomshare_core::types::{Account, Decision, Room, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        backend = %config.storage.backend,
        free_view_limit = config.entitlement.free_view_limit,
        max_members_cap = config.party.max_members_cap,
        "Configuration loaded"
    );

    let backend = Backend::connect(&config).await?;
    let services = Services::build(&config, &backend, Arc::new(SystemClock));

    let mut notifications = services.notifier.subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => info!(
                    kind = notification.kind.as_str(),
                    party_id = %notification.party_id,
                    recipients = notification.recipients.len(),
                    "Notification"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ========== Seed ==========
    let owner = UserId::new();
    let leader = UserId::new();
    let applicant = UserId::new();
    let rival = UserId::new();
    let browser = UserId::new();

    backend.add_account(Account::new(owner).room_owner()).await?;
    for user in [leader, applicant, rival, browser] {
        backend.add_account(Account::new(user)).await?;
    }
    let room = Room::new(owner).shareable().with_phone("010-1234-5678");
    let room_id = room.id;
    backend.add_room(room).await?;
    backend.add_favorite(browser, room_id).await?;
    info!(room_id = %room_id, "Seeded room and accounts");

    // ========== Parties ==========
    let parties = &services.parties;
    let party = parties.create_party(room_id, leader, 2).await?;
    let rival_party = parties
        .create_party(room_id, rival, config.party.default_max_members)
        .await?;

    parties.apply(party, applicant).await?;
    if let Err(error) = parties.apply(rival_party, applicant).await {
        warn!(kind = ?error.kind(), %error, "Second application refused");
    }

    parties
        .decide(party, leader, applicant, Decision::Accept)
        .await?;
    let formed = parties.party(party).await?;
    info!(party_id = %party, status = %formed.status, members = formed.member_count(), "Party formed");

    if let Err(error) = parties.select_winner(party, leader).await {
        warn!(kind = ?error.kind(), %error, "Winner selection refused");
    }
    parties.select_winner(party, owner).await?;
    for entry in parties.parties_for_room(room_id).await? {
        info!(party_id = %entry.id, status = %entry.status, "Final party state");
    }

    // ========== Viewing ==========
    log_view("anonymous", &services.viewer.view_room(None, room_id).await?);
    log_view("owner", &services.viewer.view_room(Some(owner), room_id).await?);
    for attempt in 1..=config.entitlement.free_view_limit + 1 {
        let detail = services.viewer.view_room(Some(browser), room_id).await?;
        info!(attempt, "Free view");
        log_view("free", &detail);
    }

    services.subscriptions.activate(browser, None).await?;
    log_view(
        "subscribed",
        &services.viewer.view_room(Some(browser), room_id).await?,
    );

    // Closing every sender ends the listener once spawned deliveries finish.
    drop(services);
    if tokio::time::timeout(Duration::from_secs(1), listener)
        .await
        .is_err()
    {
        warn!("Notification listener did not drain");
    }

    info!("Walkthrough complete");
    Ok(())
}

fn log_view(label: &str, detail: &RoomDetail) {
    let view = &detail.view;
    let parties = match &view.parties {
        PartyVisibility::Hidden => "hidden".to_string(),
        PartyVisibility::Summary { active } => format!("{active} active"),
        PartyVisibility::Detail(parties) => format!("{} listed", parties.len()),
    };
    info!(
        viewer = label,
        tier = ?view.tier,
        shareable = view.shareable,
        parties,
        phone = view.contact_phone.is_some(),
        favorite = view.favorite.active,
        can_contact = view.can_contact,
        quota_exceeded = detail.quota_exceeded,
        views = view.view_count,
        "Room view"
    );
}
