//! Date bucketing of activities and the unified transcript
//!
//! Activities are sorted by `created_at` (stable), then each one is assigned
//! to the calendar day it happened on in the configured time base. Media and
//! call summaries become tasks with their final archive filename already
//! decided, so concurrent materialization never races over names.

use crate::archive::Category;
use crate::config::{ArchiveConfig, FileCollisionAction};
use crate::types::{ActivityKind, ActivityRecord, CallSummary, CallTranscript};
use crate::utils::{extension_for_mime, sanitize_identifier, unique_name};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Time zone used to derive calendar dates and clock times
#[derive(Clone, Copy, Debug)]
pub enum TimeBase {
    /// The system's local time zone
    Local,
    /// A fixed UTC offset
    Fixed(FixedOffset),
}

impl TimeBase {
    /// Time base selected by the archive settings
    pub fn from_config(config: &ArchiveConfig) -> Self {
        match config
            .utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
        {
            Some(offset) => TimeBase::Fixed(offset),
            None => TimeBase::Local,
        }
    }

    /// Wall-clock time of `instant` in this time base
    pub fn localize(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            TimeBase::Local => instant.with_timezone(&Local).naive_local(),
            TimeBase::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }
}

/// A media attachment waiting to be downloaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaTask {
    /// Source URL
    pub url: String,
    /// MIME type from the activity
    pub mime_type: String,
    /// Destination folder inside the date folder
    pub category: Category,
    /// Final filename, unique within `(date, category)`
    pub file_name: String,
}

/// A call whose summary/transcript becomes a text file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallTask {
    /// Summary sections, if any
    pub summary: Option<CallSummary>,
    /// Transcript, if any
    pub transcript: Option<CallTranscript>,
    /// Final filename inside `call_summaries`
    pub file_name: String,
}

/// Everything that happened on one calendar day
#[derive(Clone, Debug, Default)]
pub struct DateBucket {
    /// `YYYY-MM-DD`
    pub date: String,
    /// Identifiers of every activity assigned to this day, chronologically
    pub activity_ids: Vec<String>,
    /// Formatted message lines
    pub lines: Vec<String>,
    /// Pending media downloads
    pub media: Vec<MediaTask>,
    /// Pending call summary files
    pub calls: Vec<CallTask>,
    names: HashMap<Category, HashSet<String>>,
}

impl DateBucket {
    fn new(date: String) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }

    /// Whether anything in this bucket needs a folder of its own
    pub fn has_assets(&self) -> bool {
        !self.media.is_empty() || !self.calls.is_empty()
    }

    /// Reserve a filename in `category` according to the collision policy
    ///
    /// Returns `None` when the entry should be dropped.
    fn claim_name(
        &mut self,
        category: Category,
        name: String,
        policy: FileCollisionAction,
    ) -> Option<String> {
        let taken = self.names.entry(category).or_default();
        if !taken.contains(&name) {
            taken.insert(name.clone());
            return Some(name);
        }

        match policy {
            FileCollisionAction::Rename => {
                let renamed = unique_name(&name, taken)?;
                debug!(date = %self.date, from = %name, to = %renamed, "renamed colliding entry");
                taken.insert(renamed.clone());
                Some(renamed)
            }
            FileCollisionAction::Overwrite => {
                match category {
                    Category::CallSummaries => self.calls.retain(|c| c.file_name != name),
                    _ => self
                        .media
                        .retain(|m| m.category != category || m.file_name != name),
                }
                Some(name)
            }
            FileCollisionAction::Skip => {
                warn!(date = %self.date, name = %name, "skipping entry with duplicate filename");
                None
            }
        }
    }
}

/// Output of [`Classifier::classify`]
#[derive(Clone, Debug, Default)]
pub struct Classification {
    /// Chronological transcript of all messages and call transcripts
    pub transcript: String,
    /// Buckets keyed by `YYYY-MM-DD`, in date order
    pub buckets: BTreeMap<String, DateBucket>,
}

impl Classification {
    /// Total media tasks across all dates
    pub fn media_count(&self) -> usize {
        self.buckets.values().map(|b| b.media.len()).sum()
    }

    /// Total call summary tasks across all dates
    pub fn call_count(&self) -> usize {
        self.buckets.values().map(|b| b.calls.len()).sum()
    }
}

/// Partitions activities into date buckets and renders the transcript
#[derive(Clone, Debug)]
pub struct Classifier {
    time_base: TimeBase,
    collisions: FileCollisionAction,
}

impl Classifier {
    /// Create a classifier
    pub fn new(time_base: TimeBase, collisions: FileCollisionAction) -> Self {
        Self {
            time_base,
            collisions,
        }
    }

    /// Classify `records`; input order only matters for equal timestamps
    pub fn classify(&self, records: &[ActivityRecord]) -> Classification {
        let mut ordered: Vec<&ActivityRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.created_at);

        let mut transcript: Vec<String> = Vec::new();
        let mut buckets: BTreeMap<String, DateBucket> = BTreeMap::new();

        for record in ordered {
            let local = self.time_base.localize(record.created_at);
            let date = local.format("%Y-%m-%d").to_string();
            let log_time = local.format("%H:%M").to_string();
            let file_time = local.format("%H-%M-%S").to_string();

            let bucket = buckets
                .entry(date.clone())
                .or_insert_with(|| DateBucket::new(date.clone()));
            bucket.activity_ids.push(record.id.clone());

            let sender = record.sender();
            let file_sender = match sanitize_identifier(sender) {
                s if s.is_empty() => "unknown".to_string(),
                s => s,
            };

            match &record.kind {
                ActivityKind::Message {
                    direction,
                    body: Some(body),
                } if !body.is_empty() => {
                    let line = format!(
                        "[{} {}] {} {}: {}",
                        date,
                        log_time,
                        direction.arrow(),
                        sender,
                        body
                    );
                    transcript.push(line.clone());
                    bucket.lines.push(line);
                }
                ActivityKind::Call {
                    summary,
                    transcript: call_transcript,
                } => {
                    let dialogue = call_transcript
                        .as_ref()
                        .map(|t| t.dialogue.as_slice())
                        .unwrap_or_default();

                    if !dialogue.is_empty() {
                        let mut block = vec![format!(
                            "[{} {}] --- CALL TRANSCRIPT ({}) ---",
                            date, log_time, sender
                        )];
                        block.extend(
                            dialogue
                                .iter()
                                .map(|turn| format!("{}: {}", turn.speaker(), turn.content)),
                        );
                        block.push("--- END CALL TRANSCRIPT ---".to_string());
                        transcript.push(block.join("\n"));
                    }

                    let has_summary = summary
                        .as_ref()
                        .is_some_and(|s| !s.summary.is_empty() || !s.next_steps.is_empty());
                    if has_summary || !dialogue.is_empty() {
                        let name = format!("{}_call_summary_from_{}.txt", file_time, file_sender);
                        if let Some(file_name) =
                            bucket.claim_name(Category::CallSummaries, name, self.collisions)
                        {
                            bucket.calls.push(CallTask {
                                summary: summary.clone(),
                                transcript: call_transcript.clone(),
                                file_name,
                            });
                        }
                    }
                }
                _ => {}
            }

            for media in &record.media {
                let category = Category::for_mime(&media.mime_type);
                let name = format!(
                    "{}_from_{}.{}",
                    file_time,
                    file_sender,
                    extension_for_mime(&media.mime_type)
                );
                if let Some(file_name) = bucket.claim_name(category, name, self.collisions) {
                    bucket.media.push(MediaTask {
                        url: media.url.clone(),
                        mime_type: media.mime_type.clone(),
                        category,
                        file_name,
                    });
                }
            }
        }

        let mut transcript = transcript.join("\n");
        if !transcript.is_empty() {
            transcript.push('\n');
        }

        let classification = Classification {
            transcript,
            buckets,
        };
        debug!(
            dates = classification.buckets.len(),
            media = classification.media_count(),
            calls = classification.call_count(),
            "classified activities"
        );
        classification
    }
}
