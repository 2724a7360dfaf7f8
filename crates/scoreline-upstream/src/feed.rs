//! The fetch-service seam: live fields for one event, changed ids since a cursor.

use std::sync::Arc;

use futures::future::BoxFuture;
use scoreline_core::{now_secs, Error, Result};
use scoreline_governor::Governor;
use tracing::debug;

use crate::client::UpstreamClient;
use crate::normalize::{collect_ids, find_event, normalize_live, LiveFields};

/// Source of normalized live state for events.
///
/// Object-safe so the runtime and recovery crates can hold an
/// `Arc<dyn LiveFeed>` and tests can substitute scripted fakes.
pub trait LiveFeed: Send + Sync {
    /// Fresh live fields for `id`. `Ok(None)` means the provider had no
    /// usable data for it.
    fn fetch_live<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<LiveFields>>>;

    /// Ids the provider reports as changed since `since` (epoch seconds).
    fn fetch_changed_ids(&self, since: i64) -> BoxFuture<'_, Result<Vec<String>>>;

    /// False while calls would be refused without reaching the provider.
    fn is_available(&self) -> bool {
        true
    }
}

/// `LiveFeed` over the provider's HTTP API, every call governed.
pub struct HttpLiveFeed {
    client: UpstreamClient,
    governor: Arc<Governor>,
}

impl HttpLiveFeed {
    pub fn new(client: UpstreamClient, governor: Arc<Governor>) -> Self {
        Self { client, governor }
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    async fn live(&self, id: &str) -> Result<Option<LiveFields>> {
        let path = format!("events/{}/live", id);
        let context = format!("fetch_live:{}", id);
        let payload = match self
            .governor
            .execute(&context, || self.client.get_json(&path))
            .await
        {
            Ok(payload) => payload,
            Err(Error::ProviderRejected { status: 404, .. }) => {
                debug!("Provider has no live data for {}", id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(event) = find_event(&payload, id) else {
            debug!("Live payload for {} does not contain the event", id);
            return Ok(None);
        };
        let fields = normalize_live(event, now_secs());
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(fields))
    }

    async fn changed(&self, since: i64) -> Result<Vec<String>> {
        let path = format!("events/changes?since={}", since);
        let payload = self
            .governor
            .execute("change_feed", || self.client.get_json(&path))
            .await?;
        Ok(collect_ids(&payload))
    }
}

impl LiveFeed for HttpLiveFeed {
    fn fetch_live<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<LiveFields>>> {
        Box::pin(self.live(id))
    }

    fn fetch_changed_ids(&self, since: i64) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(self.changed(since))
    }

    fn is_available(&self) -> bool {
        !self.governor.is_circuit_open()
    }
}
