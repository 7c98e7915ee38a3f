//! Cursor-based pagination over the activity endpoint

use crate::credentials::{Credential, CredentialSource};
use crate::error::{Error, Result};
use crate::types::{ActivityPage, ActivityRecord, ConversationId, Event};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Path of the activity endpoint relative to the API base URL
const ACTIVITY_PATH: &str = "v2/activity";

/// Fetches the complete activity history of a conversation
///
/// Pages are requested newest-first with `last=<page_size>`; each further
/// request passes the previous page's `startId` as the `before` cursor.
/// Records are returned in the order the server delivered them.
pub struct ActivityFetcher {
    client: reqwest::Client,
    endpoint: Url,
    page_size: usize,
    request_timeout: Duration,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ActivityFetcher {
    /// Create a fetcher for the API rooted at `base_url`
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        page_size: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = activity_endpoint(base_url)?;
        Ok(Self {
            client,
            endpoint,
            page_size: page_size.max(1),
            request_timeout,
            event_tx: None,
        })
    }

    /// Publish [`Event::PageFetched`] after every page
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Fetch every activity of `conversation`
    ///
    /// # Errors
    ///
    /// - [`Error::CredentialExpired`] on a 401; `credentials` is invalidated first
    /// - [`Error::Transport`] on any other non-success status
    /// - [`Error::Cancelled`] if `cancel` fires between pages
    /// - [`Error::InvalidActivity`] if a record cannot be interpreted
    pub async fn fetch_all(
        &self,
        conversation: &ConversationId,
        credential: &Credential,
        credentials: &dyn CredentialSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<ActivityRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_number: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                info!(conversation_id = %conversation, page = page_number, "fetch cancelled");
                return Err(Error::Cancelled);
            }

            let page = self
                .fetch_page(conversation, cursor.as_deref(), credential, credentials)
                .await?;

            let received = page.result.len();
            for raw in page.result {
                records.push(ActivityRecord::from_value(raw)?);
            }

            debug!(
                conversation_id = %conversation,
                page = page_number,
                received,
                total = records.len(),
                "fetched activity page"
            );
            if let Some(tx) = &self.event_tx {
                tx.send(Event::PageFetched {
                    page: page_number,
                    total: records.len(),
                })
                .ok();
            }

            if received == 0 {
                break;
            }

            let next_cursor = match page.page_info {
                Some(info) if info.has_previous_page => info.start_id,
                _ => break,
            };

            match next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "server repeated pagination cursor, stopping");
                    break;
                }
                None => {
                    warn!(
                        page = page_number,
                        "server reported more pages without a cursor, stopping"
                    );
                    break;
                }
            }

            page_number += 1;
        }

        info!(
            conversation_id = %conversation,
            pages = page_number,
            total = records.len(),
            "finished fetching activities"
        );
        Ok(records)
    }

    async fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<&str>,
        credential: &Credential,
        credentials: &dyn CredentialSource,
    ) -> Result<ActivityPage> {
        let url = self.page_url(conversation, before);

        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, credential.expose())
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(conversation_id = %conversation, "activity endpoint rejected credential");
            credentials.invalidate().await;
            return Err(Error::CredentialExpired);
        }
        if !status.is_success() {
            return Err(Error::Transport {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.json::<ActivityPage>().await?)
    }

    fn page_url(&self, conversation: &ConversationId, before: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("id", conversation.as_str());
            query.append_pair("last", &self.page_size.to_string());
            if let Some(before) = before {
                query.append_pair("before", before);
            }
        }
        url
    }
}

fn activity_endpoint(base_url: &str) -> Result<Url> {
    let invalid = |e: url::ParseError| Error::Config {
        message: format!("invalid base URL '{}': {}", base_url, e),
        key: Some("api.base_url".to_string()),
    };

    // Without a trailing slash `join` would replace the last path segment
    let mut base = Url::parse(base_url).map_err(invalid)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(ACTIVITY_PATH).map_err(invalid)
}
