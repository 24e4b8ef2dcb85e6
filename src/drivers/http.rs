//! Remote HTTP driver for reverse proxies and CDNs.
//!
//! Tag-capable backends (Varnish + xkey, Fastly surrogate keys) take the
//! canonical tags in a configurable request header, either batched into one
//! call or fanned out one call per tag under a bounded concurrency limit.
//! URL-only invalidation sends one request per URL. Every call carries a
//! deadline; an expired or failed call is recorded against its tag or URL
//! and the rest of the batch proceeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Method};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::config::DriverSettings;
use crate::error::{DriverError, PurgeCallError};
use crate::tags::Tag;

use super::{PurgeDriver, PurgeOutcome};

pub struct HttpDriver {
    name: String,
    client: Client,
    endpoint: Url,
    method: Method,
    tag_header: String,
    auth: Option<(String, String)>,
    key_prefix: String,
    tag_capable: bool,
    batch: bool,
    deadline: Duration,
    permits: Arc<Semaphore>,
}

impl HttpDriver {
    pub fn from_settings(
        name: &str,
        settings: &DriverSettings,
        key_prefix: &str,
    ) -> Result<Self, DriverError> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or_else(|| DriverError::missing_field(name, "endpoint"))?;
        let endpoint = Url::parse(endpoint)
            .map_err(|err| DriverError::invalid(name, format!("endpoint: {err}")))?;

        let method = Method::from_bytes(settings.method.as_bytes())
            .map_err(|_| DriverError::invalid(name, format!("method `{}`", settings.method)))?;

        let auth = match (&settings.auth_header, &settings.auth_token) {
            (Some(header), Some(token)) => Some((header.clone(), token.clone())),
            (Some(_), None) => return Err(DriverError::missing_field(name, "auth_token")),
            (None, Some(_)) => return Err(DriverError::missing_field(name, "auth_header")),
            (None, None) => None,
        };

        let client = Client::builder()
            .build()
            .map_err(|err| DriverError::invalid(name, format!("http client: {err}")))?;

        Ok(Self {
            name: name.to_string(),
            client,
            endpoint,
            method,
            tag_header: settings.tag_header.clone(),
            auth,
            key_prefix: key_prefix.to_string(),
            tag_capable: settings.tag_capable,
            batch: settings.batch,
            deadline: Duration::from_millis(settings.timeout_ms),
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
        })
    }

    fn request(&self, target: Url) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(self.method.clone(), target);
        if let Some((header, token)) = &self.auth {
            builder = builder.header(header.as_str(), token.as_str());
        }
        builder
    }

    /// Send one purge call under the per-call deadline. The deadline is
    /// enforced here rather than on the client so an expiry is reported as a
    /// distinct failure kind.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<(), PurgeCallError> {
        let response = timeout(self.deadline, builder.send())
            .await
            .map_err(|_| PurgeCallError::DeadlineExceeded {
                timeout_ms: self.deadline.as_millis() as u64,
            })?
            .map_err(|err| PurgeCallError::transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PurgeCallError::BadStatus {
                status: status.as_u16(),
            })
        }
    }

    async fn send_bounded(&self, builder: reqwest::RequestBuilder) -> Result<(), PurgeCallError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PurgeCallError::transport("purge worker pool closed"))?;
        self.send(builder).await
    }

    fn url_target(&self, url: &str) -> Result<Url, PurgeCallError> {
        Url::parse(url)
            .or_else(|_| self.endpoint.join(url))
            .map_err(|err| PurgeCallError::transport(format!("invalid purge url `{url}`: {err}")))
    }
}

#[async_trait]
impl PurgeDriver for HttpDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_tag_purge(&self) -> bool {
        self.tag_capable
    }

    async fn purge_tags(&self, tags: &[Tag]) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        if tags.is_empty() {
            return outcome;
        }

        if !self.tag_capable {
            for tag in tags {
                outcome.record_tag(tag, Err(PurgeCallError::TagPurgeUnsupported));
            }
            return outcome;
        }

        if self.batch {
            let joined = tags
                .iter()
                .map(|tag| tag.namespaced(&self.key_prefix))
                .collect::<Vec<_>>()
                .join(" ");
            let builder = self
                .request(self.endpoint.clone())
                .header(self.tag_header.as_str(), joined);

            match self.send(builder).await {
                Ok(()) => outcome.purged = tags.len(),
                Err(error) => {
                    for tag in tags {
                        outcome.record_tag(tag, Err(error.clone()));
                    }
                }
            }
            return outcome;
        }

        let calls = tags.iter().map(|tag| async move {
            let builder = self
                .request(self.endpoint.clone())
                .header(self.tag_header.as_str(), tag.namespaced(&self.key_prefix));
            (tag, self.send_bounded(builder).await)
        });

        for (tag, result) in join_all(calls).await {
            outcome.record_tag(tag, result);
        }

        debug!(
            driver = %self.name,
            purged = outcome.purged,
            failed = outcome.failures.len(),
            "HTTP tag purge fan-out complete"
        );
        outcome
    }

    async fn purge_urls(&self, urls: &[String]) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        if urls.is_empty() {
            return outcome;
        }

        let calls = urls.iter().map(|url| async move {
            let result = match self.url_target(url) {
                Ok(target) => self.send_bounded(self.request(target)).await,
                Err(error) => Err(error),
            };
            (url, result)
        });

        for (url, result) in join_all(calls).await {
            outcome.record_url(url, result);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverKind;

    fn http_settings(endpoint: &str) -> DriverSettings {
        DriverSettings {
            kind: DriverKind::Http,
            endpoint: Some(endpoint.to_string()),
            ..DriverSettings::default()
        }
    }

    #[test]
    fn builds_from_complete_settings() {
        let driver = HttpDriver::from_settings("varnish", &http_settings("http://127.0.0.1:6081"), "")
            .unwrap();
        assert_eq!(driver.name(), "varnish");
        assert!(driver.supports_tag_purge());
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let err = HttpDriver::from_settings("varnish", &http_settings("not a url"), "")
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_half_configured_auth() {
        let mut settings = http_settings("http://127.0.0.1:6081");
        settings.auth_header = Some("Fastly-Key".to_string());
        let err = HttpDriver::from_settings("fastly", &settings, "").err().unwrap();
        assert!(matches!(
            err,
            DriverError::MissingField { field: "auth_token", .. }
        ));
    }

    #[test]
    fn url_target_resolves_relative_against_endpoint() {
        let driver =
            HttpDriver::from_settings("varnish", &http_settings("http://127.0.0.1:6081"), "")
                .unwrap();
        let target = driver.url_target("/blog/post-42").unwrap();
        assert_eq!(target.as_str(), "http://127.0.0.1:6081/blog/post-42");

        let absolute = driver.url_target("https://cdn.example.com/a").unwrap();
        assert_eq!(absolute.as_str(), "https://cdn.example.com/a");
    }

    #[tokio::test]
    async fn non_tag_capable_driver_reports_unsupported() {
        let mut settings = http_settings("http://127.0.0.1:6081");
        settings.tag_capable = false;
        let driver = HttpDriver::from_settings("keycdn", &settings, "").unwrap();

        let tags = [Tag::element("42").unwrap()];
        let outcome = driver.purge_tags(&tags).await;
        assert_eq!(outcome.purged, 0);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.failures[0].error,
            PurgeCallError::TagPurgeUnsupported
        );
    }
}
