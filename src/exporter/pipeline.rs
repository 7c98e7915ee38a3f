//! One export run: fetch, classify, write, materialize, serialize, save.

use crate::archive::ArchiveBuilder;
use crate::classifier::{Classification, Classifier, TimeBase};
use crate::config::DateFolderPolicy;
use crate::error::{Error, Result};
use crate::fetcher::ActivityFetcher;
use crate::materializer::AssetMaterializer;
use crate::types::{ActivityRecord, ConversationId, Event, ExportState};
use crate::utils::sanitize_contact_name;
use chrono::{NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Archiver, ExportOutcome, ExportRequest};

/// Raw activity array, pretty-printed
pub const FULL_LOG_NAME: &str = "full_conversation_log.json";
/// Unified chronological transcript
pub const FULL_TRANSCRIPT_NAME: &str = "full_conversation.txt";
/// Per-date transcript written under [`DateFolderPolicy::WithDailyTranscript`]
pub const DAILY_TRANSCRIPT_NAME: &str = "conversation.txt";

impl Archiver {
    pub(super) async fn run_pipeline(
        &self,
        request: &ExportRequest,
        cancel: &CancellationToken,
    ) -> Result<ExportOutcome> {
        let conversation = ConversationId::resolve(&request.conversation)?;

        self.set_state(ExportState::FetchingCredential);
        let credential = self
            .credentials
            .current()
            .await
            .ok_or(Error::CredentialUnavailable)?;

        self.set_state(ExportState::FetchingPages);
        let fetcher = ActivityFetcher::new(
            self.client.clone(),
            &self.config.api.base_url,
            self.config.page_size(),
            self.config.api.request_timeout,
        )?
        .with_events(self.event_tx.clone());
        let records = fetcher
            .fetch_all(&conversation, &credential, self.credentials.as_ref(), cancel)
            .await?;
        self.emit(Event::FetchComplete {
            total: records.len(),
        });

        self.set_state(ExportState::Classifying);
        let classifier = Classifier::new(
            TimeBase::from_config(&self.config.archive),
            self.config.archive.file_collision,
        );
        let classification = classifier.classify(&records);

        let archive = ArchiveBuilder::new();
        self.write_text_entries(&archive, &records, &classification)
            .await?;

        self.set_state(ExportState::MaterializingAssets);
        let assets = AssetMaterializer::new(self.client.clone(), &self.config.assets)
            .with_cancellation(cancel.clone())
            .with_events(self.event_tx.clone())
            .materialize(&classification, &archive)
            .await?;
        if cancel.is_cancelled() {
            info!(conversation_id = %conversation, "export cancelled during asset download");
            return Err(Error::Cancelled);
        }

        self.set_state(ExportState::Serializing);
        let bytes = archive.finish().await?;
        let file_name = archive_file_name(
            request.contact_name.as_deref(),
            &conversation,
            Utc::now().date_naive(),
        );

        let output_dir = &self.config.archive.output_dir;
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(&file_name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(path = ?path, "replacing existing archive");
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = ?path, bytes = bytes.len(), "saved archive");

        Ok(ExportOutcome {
            file_name,
            path,
            activities: records.len(),
            assets,
        })
    }

    async fn write_text_entries(
        &self,
        archive: &ArchiveBuilder,
        records: &[ActivityRecord],
        classification: &Classification,
    ) -> Result<()> {
        archive
            .write_file(FULL_LOG_NAME, serde_json::to_vec_pretty(records)?)
            .await?;
        archive
            .write_file(FULL_TRANSCRIPT_NAME, classification.transcript.as_str())
            .await?;

        if self.config.archive.date_folders == DateFolderPolicy::WithDailyTranscript {
            for bucket in classification.buckets.values() {
                if bucket.lines.is_empty() {
                    continue;
                }
                let mut text = bucket.lines.join("\n");
                text.push('\n');
                archive
                    .write_file(&format!("{}/{}", bucket.date, DAILY_TRANSCRIPT_NAME), text)
                    .await?;
            }
        }
        Ok(())
    }
}

/// `<YYYY-MM-DD>_<contact>_Archive.zip`
///
/// The contact falls back to the conversation id when absent or empty after
/// sanitization.
pub fn archive_file_name(
    contact_name: Option<&str>,
    conversation: &ConversationId,
    date: NaiveDate,
) -> String {
    let contact = contact_name
        .map(sanitize_contact_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| conversation.to_string());
    format!("{}_{}_Archive.zip", date.format("%Y-%m-%d"), contact)
}
