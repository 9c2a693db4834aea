//! Minimal embedding example for announce-core
//!
//! Runs the service over the in-memory store with a typed attachment,
//! publishes a few announcements, hides them, and prints what a client
//! would see along the way.

use announce_core::{AnnouncementConfig, AnnouncementEvent, AnnouncementService, MemoryKvStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

/// In-game reward attached to an announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reward {
    item: String,
    count: u32,
}

async fn print_client_view(service: &AnnouncementService<Reward>) -> anyhow::Result<()> {
    let snapshot = service.get_announcement().await?;
    println!(
        "version={} expiry={}",
        snapshot.version.as_deref().unwrap_or("none"),
        snapshot.expiry
    );
    for (index, announcement) in snapshot.announcements.iter().enumerate() {
        println!(
            "  [{}] {}{} reward={:?}",
            index,
            announcement.title,
            if announcement.is_hidden() { " (hidden)" } else { "" },
            announcement.attach
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let config = AnnouncementConfig::new().with_capacity(5).with_expire_seconds(3600);
    let (service, events) =
        AnnouncementService::<Reward>::new(Arc::new(MemoryKvStore::new()), config)?;

    let watcher = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        while let Some(event) = events.next().await {
            info!("event: {:?}", event);
            if event == AnnouncementEvent::Stopped {
                break;
            }
        }
    });

    service.start().await?;

    service
        .add_announcement("Maintenance", "Servers restart at 04:00 UTC", None)
        .await?;
    service
        .add_announcement(
            "Sorry!",
            "Compensation for yesterday's outage",
            Some(Reward {
                item: "gold".into(),
                count: 500,
            }),
        )
        .await?;
    print_client_view(&service).await?;

    // Bad input from an admin form comes back as a typed error
    if let Err(e) = service.hide_announcement("first").await {
        println!("rejected: {} ({:?})", e, e.kind());
    }

    service.hide_announcement(0).await?;
    print_client_view(&service).await?;

    // Hiding the last visible announcement starts a fresh version
    service.hide_announcement(1).await?;
    print_client_view(&service).await?;

    service.stop().await;
    watcher.await?;
    Ok(())
}
