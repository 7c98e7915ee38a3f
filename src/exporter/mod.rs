//! Export orchestration split into focused submodules.
//!
//! The `Archiver` struct and its methods are organized by concern:
//! - [`pipeline`] - Fetch, classify, materialize and serialize one run
//!
//! A run moves through [`ExportState`]:
//! `Idle → FetchingCredential → FetchingPages → Classifying →
//! MaterializingAssets → Serializing → Done | Failed → Idle`.

mod pipeline;

pub use pipeline::{
    DAILY_TRANSCRIPT_NAME, FULL_LOG_NAME, FULL_TRANSCRIPT_NAME, archive_file_name,
};


use crate::config::Config;
use crate::credentials::CredentialSource;
use crate::error::{Error, Result};
use crate::materializer::MaterializeReport;
use crate::types::{Event, ExportState};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What to export
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Conversation identifier or the URL of the conversation page
    pub conversation: String,
    /// Display name used in the archive filename (defaults to the conversation id)
    pub contact_name: Option<String>,
}

impl ExportRequest {
    /// Export the conversation identified by `conversation`
    pub fn new(conversation: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            contact_name: None,
        }
    }

    /// Name the archive after a contact
    pub fn with_contact_name(mut self, name: impl Into<String>) -> Self {
        self.contact_name = Some(name.into());
        self
    }
}

/// Result of a successful export
#[derive(Clone, Debug)]
pub struct ExportOutcome {
    /// Archive filename
    pub file_name: String,
    /// Where the archive was saved
    pub path: PathBuf,
    /// Number of activities in the archive
    pub activities: usize,
    /// Asset counts
    pub assets: MaterializeReport,
}

/// Conversation exporter
///
/// Construct once and call [`export`](Archiver::export) for each user-initiated
/// run. Only one run may be active at a time; a second call while one is in
/// progress fails with [`Error::ExportInProgress`].
pub struct Archiver {
    pub(crate) config: Arc<Config>,
    pub(crate) credentials: Arc<dyn CredentialSource>,
    pub(crate) client: reqwest::Client,
    pub(crate) event_tx: broadcast::Sender<Event>,
    state_tx: watch::Sender<ExportState>,
    cancel_tx: watch::Sender<CancellationToken>,
    running: AtomicBool,
}

impl Archiver {
    /// Create an archiver
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: Config, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(config.api.user_agent.as_str())
            .build()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ExportState::Idle);
        let (cancel_tx, _) = watch::channel(CancellationToken::new());

        Ok(Self {
            config: Arc::new(config),
            credentials,
            client,
            event_tx,
            state_tx,
            cancel_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Subscribe to progress and terminal events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current state of the run
    pub fn state(&self) -> ExportState {
        *self.state_tx.borrow()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cancel the active run, if any
    ///
    /// Observed between activity pages and before each media fetch starts.
    pub fn cancel(&self) {
        self.cancel_tx.borrow().cancel();
    }

    /// Run one export and save the archive into the configured output directory
    ///
    /// Emits exactly one terminal event, [`Event::Completed`] or
    /// [`Event::Failed`], and leaves the archiver `Idle` afterwards.
    pub async fn export(&self, request: ExportRequest) -> Result<ExportOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ExportInProgress);
        }
        let _guard = RunGuard(&self.running);

        let cancel = CancellationToken::new();
        self.cancel_tx.send_replace(cancel.clone());

        let result = self.run_pipeline(&request, &cancel).await;
        match &result {
            Ok(outcome) => {
                self.set_state(ExportState::Done);
                info!(
                    file = %outcome.file_name,
                    activities = outcome.activities,
                    media_written = outcome.assets.media_written,
                    media_failed = outcome.assets.media_failed,
                    "export complete"
                );
                self.emit(Event::Completed {
                    file_name: outcome.file_name.clone(),
                    path: outcome.path.clone(),
                    activities: outcome.activities,
                    media_written: outcome.assets.media_written,
                    media_failed: outcome.assets.media_failed,
                });
            }
            Err(e) => {
                self.set_state(ExportState::Failed);
                error!(conversation = %request.conversation, error = %e, "export failed");
                self.emit(Event::Failed {
                    error: e.user_message(),
                });
            }
        }

        self.set_state(ExportState::Idle);
        result
    }

    pub(crate) fn set_state(&self, state: ExportState) {
        self.state_tx.send_replace(state);
        self.emit(Event::StateChanged { state });
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
