//! Concurrent media download and call summary rendering
//!
//! Every media and call task across all dates goes through one buffered
//! stream. A failed media fetch is logged, reported as
//! [`Event::AssetFailed`] and its file omitted; it never fails the run.

use crate::archive::{ArchiveBuilder, Category};
use crate::classifier::{CallTask, Classification, MediaTask};
use crate::config::AssetConfig;
use crate::error::{AssetError, Result};
use crate::types::Event;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts from one materialization pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Media files written into the archive
    pub media_written: usize,
    /// Media fetches that failed and were omitted
    pub media_failed: usize,
    /// Media tasks not started because the run was cancelled
    pub media_skipped: usize,
    /// Call summary files written
    pub calls_written: usize,
}

enum Job<'a> {
    Media { date: &'a str, task: &'a MediaTask },
    Call { date: &'a str, task: &'a CallTask },
}

enum Outcome {
    MediaWritten,
    MediaFailed,
    MediaSkipped,
    CallWritten,
}

/// Resolves media and call tasks into archive files
pub struct AssetMaterializer {
    client: reqwest::Client,
    max_concurrent: usize,
    timeout: Duration,
    cancel: CancellationToken,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl AssetMaterializer {
    /// Create a materializer using `client` for media requests
    pub fn new(client: reqwest::Client, config: &AssetConfig) -> Self {
        Self {
            client,
            max_concurrent: config.max_concurrent.max(1),
            timeout: config.timeout,
            cancel: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// Skip tasks that have not started once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish [`Event::AssetFailed`] for every failed fetch
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Resolve every task in `classification` into `archive`
    ///
    /// Completes once every task has settled. Only archive write errors are
    /// returned; media fetch failures are counted in the report.
    pub async fn materialize(
        &self,
        classification: &Classification,
        archive: &ArchiveBuilder,
    ) -> Result<MaterializeReport> {
        let jobs: Vec<Job<'_>> = classification
            .buckets
            .values()
            .flat_map(|bucket| {
                let date = bucket.date.as_str();
                bucket
                    .calls
                    .iter()
                    .map(move |task| Job::Call { date, task })
                    .chain(bucket.media.iter().map(move |task| Job::Media { date, task }))
            })
            .collect();

        debug!(
            jobs = jobs.len(),
            concurrency = self.max_concurrent,
            "materializing assets"
        );

        let outcomes: Vec<Result<Outcome>> = stream::iter(jobs)
            .map(|job| self.run_job(job, archive))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = MaterializeReport::default();
        for outcome in outcomes {
            match outcome? {
                Outcome::MediaWritten => report.media_written += 1,
                Outcome::MediaFailed => report.media_failed += 1,
                Outcome::MediaSkipped => report.media_skipped += 1,
                Outcome::CallWritten => report.calls_written += 1,
            }
        }

        info!(
            media_written = report.media_written,
            media_failed = report.media_failed,
            media_skipped = report.media_skipped,
            calls_written = report.calls_written,
            "assets materialized"
        );
        Ok(report)
    }

    async fn run_job(&self, job: Job<'_>, archive: &ArchiveBuilder) -> Result<Outcome> {
        match job {
            Job::Call { date, task } => {
                let folder = archive.folder(date, Category::CallSummaries).await?;
                archive
                    .write_in(&folder, &task.file_name, render_call_summary(task))
                    .await?;
                Ok(Outcome::CallWritten)
            }
            Job::Media { date, task } => {
                let content = match self.fetch_media(task).await {
                    Ok(content) => content,
                    Err(AssetError::Cancelled) => {
                        debug!(url = %task.url, "media fetch skipped after cancellation");
                        return Ok(Outcome::MediaSkipped);
                    }
                    Err(e) => {
                        warn!(url = %task.url, date = %date, error = %e, "failed to download media");
                        self.report_failure(task, e.to_string());
                        return Ok(Outcome::MediaFailed);
                    }
                };

                // A media file that cannot be stored is omitted like a failed fetch
                let stored = match archive.folder(date, task.category).await {
                    Ok(folder) => archive.write_in(&folder, &task.file_name, content).await,
                    Err(e) => Err(e),
                };
                match stored {
                    Ok(_) => Ok(Outcome::MediaWritten),
                    Err(e) => {
                        warn!(url = %task.url, file = %task.file_name, error = %e, "failed to store media");
                        self.report_failure(task, e.to_string());
                        Ok(Outcome::MediaFailed)
                    }
                }
            }
        }
    }

    fn report_failure(&self, task: &MediaTask, error: String) {
        if let Some(tx) = &self.event_tx {
            tx.send(Event::AssetFailed {
                url: task.url.clone(),
                error,
            })
            .ok();
        }
    }

    async fn fetch_media(&self, task: &MediaTask) -> std::result::Result<Vec<u8>, AssetError> {
        if self.cancel.is_cancelled() {
            return Err(AssetError::Cancelled);
        }

        let response = self
            .client
            .get(&task.url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Text of a call summary file
///
/// Sections appear in a fixed order and only when they have content:
/// `--- CALL SUMMARY ---`, `--- NEXT STEPS ---`, `--- TRANSCRIPT ---`.
pub fn render_call_summary(task: &CallTask) -> String {
    let mut sections = Vec::new();

    if let Some(summary) = &task.summary {
        if !summary.summary.is_empty() {
            sections.push(format!(
                "--- CALL SUMMARY ---\n{}",
                summary.summary.join("\n")
            ));
        }
        if !summary.next_steps.is_empty() {
            sections.push(format!(
                "--- NEXT STEPS ---\n{}",
                summary.next_steps.join("\n")
            ));
        }
    }

    if let Some(transcript) = &task.transcript
        && !transcript.dialogue.is_empty()
    {
        let lines: Vec<String> = transcript
            .dialogue
            .iter()
            .map(|turn| format!("{}: {}", turn.speaker(), turn.content))
            .collect();
        sections.push(format!("--- TRANSCRIPT ---\n{}", lines.join("\n")));
    }

    let mut text = sections.join("\n\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, TimeBase};
    use crate::config::FileCollisionAction;
    use crate::types::{ActivityRecord, CallSummary, CallTranscript, DialogueTurn};
    use chrono::FixedOffset;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call_task(summary: Option<CallSummary>, transcript: Option<CallTranscript>) -> CallTask {
        CallTask {
            summary,
            transcript,
            file_name: "x.txt".to_string(),
        }
    }

    fn classify(values: Vec<serde_json::Value>) -> Classification {
        let records: Vec<_> = values
            .into_iter()
            .map(|v| ActivityRecord::from_value(v).unwrap())
            .collect();
        Classifier::new(
            TimeBase::Fixed(FixedOffset::east_opt(0).unwrap()),
            FileCollisionAction::Rename,
        )
        .classify(&records)
    }

    fn materializer() -> AssetMaterializer {
        AssetMaterializer::new(reqwest::Client::new(), &AssetConfig::default())
    }

    #[test]
    fn renders_all_sections_in_order() {
        let text = render_call_summary(&call_task(
            Some(CallSummary {
                summary: vec!["Line one".to_string(), "Line two".to_string()],
                next_steps: vec!["Call back".to_string()],
            }),
            Some(CallTranscript {
                dialogue: vec![
                    DialogueTurn {
                        identifier: Some("+1555".to_string()),
                        content: "Hi".to_string(),
                    },
                    DialogueTurn {
                        identifier: None,
                        content: "Hello".to_string(),
                    },
                ],
            }),
        ));

        assert_eq!(
            text,
            "--- CALL SUMMARY ---\nLine one\nLine two\n\n\
             --- NEXT STEPS ---\nCall back\n\n\
             --- TRANSCRIPT ---\n+1555: Hi\nUnknown: Hello\n"
        );
    }

    #[test]
    fn omits_missing_sections() {
        let text = render_call_summary(&call_task(
            Some(CallSummary {
                summary: vec![],
                next_steps: vec!["Follow up".to_string()],
            }),
            None,
        ));
        assert_eq!(text, "--- NEXT STEPS ---\nFollow up\n");

        let text = render_call_summary(&call_task(
            None,
            Some(CallTranscript {
                dialogue: vec![DialogueTurn {
                    identifier: Some("A".to_string()),
                    content: "x".to_string(),
                }],
            }),
        ));
        assert_eq!(text, "--- TRANSCRIPT ---\nA: x\n");
    }

    #[tokio::test]
    async fn failed_fetches_are_omitted_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.mp3"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let classification = classify(vec![
            json!({"id": "1", "createdAt": "2024-01-03T09:00:00Z", "type": "message", "from": "+1",
                   "media": [{"url": format!("{}/ok.png", server.uri()), "type": "image/png"}]}),
            json!({"id": "2", "createdAt": "2024-01-03T09:01:00Z", "type": "message", "from": "+1",
                   "media": [{"url": format!("{}/missing.png", server.uri()), "type": "image/png"}]}),
            json!({"id": "3", "createdAt": "2024-01-04T09:00:00Z", "type": "message", "from": "+1",
                   "media": [{"url": format!("{}/broken.mp3", server.uri()), "type": "audio/mpeg"}]}),
        ]);

        let archive = ArchiveBuilder::new();
        let (tx, mut rx) = broadcast::channel(16);
        let report = materializer()
            .with_events(tx)
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.media_written, 1);
        assert_eq!(report.media_failed, 2);
        assert_eq!(
            archive.paths().await,
            vec![
                "2024-01-03/",
                "2024-01-03/images/",
                "2024-01-03/images/09-00-00_from_1.png"
            ]
        );

        let mut failed_urls = Vec::new();
        while let Ok(Event::AssetFailed { url, .. }) = rx.try_recv() {
            failed_urls.push(url);
        }
        assert_eq!(failed_urls.len(), 2);
    }

    #[tokio::test]
    async fn unusual_mime_types_stay_inside_their_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let classification = classify(vec![json!({
            "id": "1", "createdAt": "2024-01-03T09:00:00Z", "type": "message", "from": "+1",
            "media": [
                {"url": format!("{}/a", server.uri()), "type": "image/svg+xml"},
                {"url": format!("{}/b", server.uri()), "type": "image/x/y"},
                {"url": format!("{}/c", server.uri()), "type": "image/a/../b"}
            ]
        })]);

        let archive = ArchiveBuilder::new();
        let report = materializer()
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.media_written, 3);
        assert_eq!(report.media_failed, 0);
        assert_eq!(
            archive.paths().await,
            vec![
                "2024-01-03/",
                "2024-01-03/images/",
                "2024-01-03/images/09-00-00_from_1.ab",
                "2024-01-03/images/09-00-00_from_1.svgxml",
                "2024-01-03/images/09-00-00_from_1.xy",
            ]
        );
    }

    #[tokio::test]
    async fn store_errors_count_as_failed_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let mut classification = classify(vec![json!({
            "id": "1", "createdAt": "2024-01-03T09:00:00Z", "type": "message", "from": "+1",
            "media": [
                {"url": format!("{}/ok", server.uri()), "type": "image/png"},
                {"url": format!("{}/bad", server.uri()), "type": "image/png"}
            ]
        })]);
        // A name the archive refuses must not abort the other tasks
        classification
            .buckets
            .get_mut("2024-01-03")
            .unwrap()
            .media[1]
            .file_name = "../escape.png".to_string();

        let archive = ArchiveBuilder::new();
        let (tx, mut rx) = broadcast::channel(16);
        let report = materializer()
            .with_events(tx)
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.media_written, 1);
        assert_eq!(report.media_failed, 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::AssetFailed { url, .. }) if url.ends_with("/bad")
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_tolerated() {
        let classification = classify(vec![json!({
            "id": "1", "createdAt": "2024-01-03T09:00:00Z", "type": "message",
            "media": [{"url": "http://127.0.0.1:9/gone.png", "type": "image/png"}]
        })]);

        let archive = ArchiveBuilder::new();
        let report = materializer()
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.media_failed, 1);
        assert!(archive.paths().await.is_empty());
    }

    #[tokio::test]
    async fn call_summaries_are_written_without_network() {
        let classification = classify(vec![json!({
            "id": "c", "createdAt": "2024-01-05T16:30:00Z", "type": "call", "from": "+1555",
            "callSummary": {"summary": ["Booked a visit"], "nextSteps": []}
        })]);

        let archive = ArchiveBuilder::new();
        let report = materializer()
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.calls_written, 1);
        assert!(
            archive
                .paths()
                .await
                .contains(&"2024-01-05/call_summaries/16-30-00_call_summary_from_1555.txt".to_string())
        );
    }

    #[tokio::test]
    async fn cancelled_run_skips_media() {
        let server = MockServer::start().await;
        let classification = classify(vec![json!({
            "id": "1", "createdAt": "2024-01-03T09:00:00Z", "type": "message",
            "media": [{"url": format!("{}/a.png", server.uri()), "type": "image/png"}]
        })]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let archive = ArchiveBuilder::new();
        let report = materializer()
            .with_cancellation(cancel)
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.media_skipped, 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrency_bound_of_one_still_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let media: Vec<_> = (0..5)
            .map(|i| json!({"url": format!("{}/{i}.png", server.uri()), "type": "image/png"}))
            .collect();
        let classification = classify(vec![json!({
            "id": "1", "createdAt": "2024-01-03T09:00:00Z", "type": "message", "media": media
        })]);

        let config = AssetConfig {
            max_concurrent: 1,
            ..Default::default()
        };
        let archive = ArchiveBuilder::new();
        let report = AssetMaterializer::new(reqwest::Client::new(), &config)
            .materialize(&classification, &archive)
            .await
            .unwrap();

        assert_eq!(report.media_written, 5);
        assert_eq!(archive.file_count().await, 5);
    }
}
