//! # openphone-archiver
//!
//! Export a single OpenPhone conversation, with its media and call summaries,
//! into a self-contained ZIP archive.
//!
//! ## Design Philosophy
//!
//! openphone-archiver is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to progress events, no polling required
//! - **Resilient** - A failed media download is logged and skipped, never fatal
//! - **Deterministic** - Equal inputs produce the same archive layout and names
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use openphone_archiver::{Archiver, Config, Credential, ExportRequest, MemoryCredentialStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Arc::new(MemoryCredentialStore::new());
//!     credentials.observe(Credential::new("captured-authorization-header")).await;
//!
//!     let archiver = Archiver::new(Config::default(), credentials)?;
//!
//!     // Subscribe to events
//!     let mut events = archiver.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = archiver
//!         .export(ExportRequest::new("https://my.openphone.com/inbox/PN1/c/CNabc123"))
//!         .await?;
//!     println!("saved {}", outcome.path.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// In-memory archive tree and ZIP encoding
pub mod archive;
/// Grouping activities by local date and planning asset files
pub mod classifier;
/// Configuration types
pub mod config;
/// Authorization credential capture and storage
pub mod credentials;
/// Error types
pub mod error;
/// Export orchestration (decomposed into focused submodules)
pub mod exporter;
/// Paginated activity retrieval
pub mod fetcher;
/// Concurrent media download and call summary rendering
pub mod materializer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveBuilder, Category};
pub use classifier::{Classification, Classifier, TimeBase};
pub use config::{
    ApiConfig, ArchiveConfig, AssetConfig, Config, DateFolderPolicy, FileCollisionAction,
};
pub use credentials::{Credential, CredentialSource, FileCredentialStore, MemoryCredentialStore};
pub use error::{AssetError, Error, Result};
pub use exporter::{Archiver, ExportOutcome, ExportRequest};
pub use fetcher::ActivityFetcher;
pub use materializer::{AssetMaterializer, MaterializeReport};
pub use types::{ActivityKind, ActivityRecord, ConversationId, Direction, Event, ExportState};

/// Run one export, cancelling it when `shutdown` resolves first.
///
/// After cancelling, this waits for the run to unwind, so the caller still
/// receives exactly one result (normally [`Error::Cancelled`]).
pub async fn export_until<F>(
    archiver: &Archiver,
    request: ExportRequest,
    shutdown: F,
) -> Result<ExportOutcome>
where
    F: Future<Output = ()>,
{
    let export = archiver.export(request);
    tokio::pin!(export);

    tokio::select! {
        biased;
        result = &mut export => return result,
        () = shutdown => {
            tracing::info!("shutdown requested, cancelling export");
            archiver.cancel();
        }
    }

    export.await
}

/// [`export_until`] a termination signal arrives
///
/// Listens for Ctrl+C everywhere and SIGTERM on Unix. A signal that cannot be
/// registered is ignored and the run is left to finish.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use openphone_archiver::{Archiver, Config, ExportRequest, FileCredentialStore, export_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let credentials = Arc::new(FileCredentialStore::new("./token"));
///     let archiver = Archiver::new(Config::default(), credentials)?;
///
///     export_with_shutdown(&archiver, ExportRequest::new("CNabc123")).await?;
///
///     Ok(())
/// }
/// ```
pub async fn export_with_shutdown(
    archiver: &Archiver,
    request: ExportRequest,
) -> Result<ExportOutcome> {
    export_until(archiver, request, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C signal"),
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
