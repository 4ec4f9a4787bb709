//! Notification dispatch.
//!
//! Sending is a bounded-retry operation: build the endpoint and params,
//! create a sender through the delivery boundary, then attempt up to
//! `max_tries` sends with a fixed inter-attempt delay. Deleting the owning
//! service cancels the dispatch silently; terminal outcomes land in the
//! service's fail ledger and metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::metrics::SenderKey;
use crate::status::SendState;
use crate::{Error, Result};

use super::{NotifyTarget, Slice};

/// Fixed wait between retry attempts of one dispatch.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed stagger between dispatch starts during fan-out, to avoid a
/// thundering herd against shared infrastructure.
pub const DISPATCH_STAGGER: Duration = Duration::from_millis(200);

/// A ready-to-use sender for one endpoint.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Perform one delivery attempt.
    async fn send(
        &self,
        title: &str,
        message: &str,
        params: &HashMap<String, String>,
    ) -> Result<()>;
}

/// The delivery boundary: turns endpoint strings into senders.
///
/// The per-type URL encoding library behind this trait is a black box;
/// `locate` is its pure parse (no network), `create` its sender
/// construction.
pub trait SenderFactory: Send + Sync {
    /// Pure parse of `endpoint`; used at validation time.
    fn locate(&self, endpoint: &str) -> Result<()>;

    /// Build a sender for `endpoint`.
    fn create(&self, endpoint: &str) -> Result<Arc<dyn Sender>>;
}

/// Default HTTP delivery: POSTs the notification as JSON to the endpoint,
/// with non-HTTP schemes mapped onto HTTPS.
pub struct HttpSenderFactory {
    client: Client,
}

impl HttpSenderFactory {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn http_endpoint(endpoint: &str) -> Result<url::Url> {
        let parsed =
            url::Url::parse(endpoint).map_err(|e| Error::config(format!("{}: {}", endpoint, e)))?;
        if matches!(parsed.scheme(), "http" | "https") {
            return Ok(parsed);
        }
        let rest = &endpoint[parsed.scheme().len() + 3..];
        url::Url::parse(&format!("https://{}", rest))
            .map_err(|e| Error::config(format!("{}: {}", endpoint, e)))
    }
}

impl Default for HttpSenderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderFactory for HttpSenderFactory {
    fn locate(&self, endpoint: &str) -> Result<()> {
        url::Url::parse(endpoint)
            .map(|_| ())
            .map_err(|e| Error::config(format!("{}: {}", endpoint, e)))
    }

    fn create(&self, endpoint: &str) -> Result<Arc<dyn Sender>> {
        let endpoint = Self::http_endpoint(endpoint)?;
        Ok(Arc::new(HttpSender {
            client: self.client.clone(),
            endpoint,
        }))
    }
}

struct HttpSender {
    client: Client,
    endpoint: url::Url,
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(
        &self,
        title: &str,
        message: &str,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        let payload = json!({
            "title": title,
            "message": message,
            "params": params,
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::send(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::send(format!("{} - {}", status, body)))
    }
}

impl NotifyTarget {
    /// Dispatch one notification through this target.
    ///
    /// `title`/`message` override the resolved attributes when given.
    /// With `use_delay`, a non-zero resolved delay suspends this dispatch
    /// before anything else happens; other dispatches are unaffected.
    pub async fn send(
        &self,
        title: Option<&str>,
        message: Option<&str>,
        use_delay: bool,
        use_metrics: bool,
    ) -> Result<()> {
        if use_delay {
            let delay = self.delay_duration();
            if !delay.is_zero() && !self.wait(delay).await {
                return Ok(());
            }
        }

        let info = self.status.service_info();
        let endpoint = self.build_url();

        // Failing to even construct a sender is fatal for this dispatch;
        // nothing to retry.
        let sender = match self.factory.create(&endpoint) {
            Ok(sender) => sender,
            Err(e) => {
                warn!("{}: cannot build sender for {}: {}", self.id, endpoint, e);
                self.record_outcome(false, use_metrics);
                return Err(e);
            }
        };
        let (params, title, message) = match self.prepare_content(title, message, &info) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.record_outcome(false, use_metrics);
                return Err(e);
            }
        };

        let max_tries = self.max_tries();
        let mut failures: Vec<(String, u32)> = Vec::new();

        for attempt in 1..=max_tries {
            // Cancellation takes priority over retry.
            if self.status.is_deleting() {
                debug!("{}: service deleting, aborting dispatch", self.id);
                return Ok(());
            }

            match sender.send(&title, &message, &params).await {
                Ok(()) => {
                    self.record_outcome(true, use_metrics);
                    return Ok(());
                }
                Err(e) => {
                    let text = e.to_string();
                    warn!("{}: send attempt {}/{} failed: {}", self.id, attempt, max_tries, text);
                    match failures.iter_mut().find(|(seen, _)| *seen == text) {
                        Some((_, count)) => *count += 1,
                        None => failures.push((text, 1)),
                    }
                }
            }

            if attempt < max_tries && !self.wait(RETRY_INTERVAL).await {
                return Ok(());
            }
        }

        // max_tries of 0 never attempts anything; only a caller bug gets
        // here, so there is no outcome to record.
        if max_tries == 0 {
            return Ok(());
        }

        self.record_outcome(false, use_metrics);
        Err(Error::send(render_failures(&failures)))
    }

    fn prepare_content(
        &self,
        title: Option<&str>,
        message: Option<&str>,
        info: &crate::template::ServiceInfo,
    ) -> Result<(HashMap<String, String>, String, String)> {
        let params = self.build_params(info)?;
        let title = match title {
            Some(title) => crate::template::render(title, info)?,
            None => self.title(info)?,
        };
        let message = match message {
            Some(message) => crate::template::render(message, info)?,
            None => self.message(info)?,
        };
        Ok((params, title, message))
    }

    /// Suspend for `duration`; returns false if process shutdown fired
    /// first. Deletion of the owning service does not preempt a wait, it
    /// is only checked between attempts.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!("{}: shutdown during dispatch wait", self.id);
                false
            }
            _ = sleep(duration) => true,
        }
    }

    /// Remove this target's ledger slot and metric series; called when
    /// the target (or its owning service) is deleted.
    pub fn delete(&self) {
        self.status.fails.notify.remove(&self.id);
        if let Some(metrics) = self.status.metrics() {
            metrics.remove_notify_counters(&SenderKey {
                id: self.id.clone(),
                service_id: self.status.service_id().to_string(),
                kind: self.resolved_type(),
            });
        }
    }

    fn record_outcome(&self, success: bool, use_metrics: bool) {
        let state = if success {
            SendState::Pass
        } else {
            SendState::Fail
        };
        self.status.fails.notify.set(&self.id, state);

        if use_metrics && let Some(metrics) = self.status.metrics() {
            metrics.record_notify_result(
                &SenderKey {
                    id: self.id.clone(),
                    service_id: self.status.service_id().to_string(),
                    kind: self.resolved_type(),
                },
                success,
            );
        }
    }
}

fn render_failures(failures: &[(String, u32)]) -> String {
    failures
        .iter()
        .map(|(text, count)| {
            if *count > 1 {
                format!("{} x {}", text, count)
            } else {
                text.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Slice {
    /// Dispatch through every configured target concurrently, staggering
    /// start times. One target's failure never cancels the others; the
    /// combined error is `None`-equivalent only if every target
    /// succeeded.
    pub async fn send_all(
        &self,
        title: Option<&str>,
        message: Option<&str>,
        use_delay: bool,
    ) -> Result<()> {
        let dispatches = self.iter().enumerate().map(|(index, target)| async move {
            if index > 0 {
                sleep(DISPATCH_STAGGER * index as u32).await;
            }
            target
                .send(title, message, use_delay, true)
                .await
                .map_err(|e| format!("{}: {}", target.id, e))
        });

        let failures: Vec<String> = futures::future::join_all(dispatches)
            .await
            .into_iter()
            .filter_map(std::result::Result::err)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::send(failures.join("\n")))
        }
    }
}
