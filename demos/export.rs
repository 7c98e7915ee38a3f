//! Export one conversation to a ZIP archive
//!
//! Usage: OPENPHONE_TOKEN=... cargo run --example export -- <conversation url or CN id> [contact name]

use std::sync::Arc;
use openphone_archiver::{
    Archiver, Config, Credential, Event, ExportRequest, MemoryCredentialStore, export_with_shutdown,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let conversation = args
        .next()
        .ok_or("usage: export <conversation url or CN id> [contact name]")?;
    let contact_name = args.next();

    let credentials = Arc::new(MemoryCredentialStore::new());
    if let Ok(token) = std::env::var("OPENPHONE_TOKEN") {
        credentials.observe(Credential::new(token)).await;
    }

    let mut config = Config::default();
    if let Ok(dir) = std::env::var("ARCHIVE_DIR") {
        config.archive.output_dir = dir.into();
    }

    let archiver = Archiver::new(config, credentials)?;

    let mut events = archiver.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::StateChanged { state } => println!("state: {:?}", state),
                Event::PageFetched { page, total } => {
                    println!("page {}: {} activities so far", page, total)
                }
                Event::AssetFailed { url, error } => println!("skipped {}: {}", url, error),
                Event::Failed { error } => println!("Error: {}", error),
                _ => {}
            }
        }
    });

    let mut request = ExportRequest::new(conversation);
    if let Some(name) = contact_name {
        request = request.with_contact_name(name);
    }

    let outcome = export_with_shutdown(&archiver, request).await?;
    println!(
        "Saved {} ({} activities, {} media, {} failed)",
        outcome.path.display(),
        outcome.activities,
        outcome.assets.media_written,
        outcome.assets.media_failed
    );

    Ok(())
}
