use moka::future::Cache;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProxySettings, RetryPolicy};
use crate::errors::SourceError;
use crate::models::SourceKind;
use crate::proxy_pool::{ProxyHandle, ProxyPool};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const DIRECT_KEY: &str = "direct";

/// How an adapter wants to reach its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Through a pooled proxy, falling back to direct only when allowed.
    Proxied,
    Direct,
}

/// One checked-out outbound identity and the client bound to it.
pub struct Route {
    client: Client,
    proxy: Option<ProxyHandle>,
    pool: Option<Arc<ProxyPool>>,
}

impl Route {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn proxy(&self) -> Option<&ProxyHandle> {
        self.proxy.as_ref()
    }

    /// Sends a request and classifies every failure. A failure on a proxied
    /// route retires the proxy; the registry itself is never blamed.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SourceError> {
        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => Err(self.classify_status(response.status())),
            Err(e) => Err(self.classify_transport(&e)),
        }
    }

    fn classify_status(&self, status: StatusCode) -> SourceError {
        if let Some(proxy) = &self.proxy {
            self.retire(proxy);
            return SourceError::ProxyFailure {
                proxy: proxy.to_string(),
                reason: format!("status {}", status),
            };
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SourceError::Transient(format!("status {}", status))
        } else {
            SourceError::Rejected(status.as_u16())
        }
    }

    fn classify_transport(&self, error: &reqwest::Error) -> SourceError {
        let reason = if error.is_timeout() {
            "timeout".to_string()
        } else if error.is_connect() {
            "connection failed".to_string()
        } else {
            error.to_string()
        };

        match &self.proxy {
            Some(proxy) => {
                self.retire(proxy);
                SourceError::ProxyFailure {
                    proxy: proxy.to_string(),
                    reason,
                }
            }
            None => SourceError::Transient(reason),
        }
    }

    fn retire(&self, proxy: &ProxyHandle) {
        if let Some(pool) = &self.pool {
            pool.mark_bad(proxy);
        }
    }
}

/// Shared HTTP plumbing for all source adapters.
///
/// Clients are cached per proxy so connection pools survive across leads.
pub struct RegistryClient {
    pool: Option<Arc<ProxyPool>>,
    clients: Cache<String, Client>,
    proxy_timeout: Duration,
    direct_timeout: Duration,
    allow_direct: bool,
    retry: RetryPolicy,
}

impl RegistryClient {
    /// `pool` is `None` when proxying is disabled altogether.
    pub fn new(
        pool: Option<Arc<ProxyPool>>,
        proxy: &ProxySettings,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            clients: Cache::builder()
                .max_capacity(1_024)
                .time_to_idle(Duration::from_secs(3600))
                .build(),
            proxy_timeout: proxy.timeout,
            direct_timeout: request_timeout,
            allow_direct: proxy.allow_direct_fallback,
            retry,
        }
    }

    /// Direct-only client, no proxy pool.
    pub fn direct(request_timeout: Duration, retry: RetryPolicy) -> Self {
        Self::new(None, &ProxySettings::default(), request_timeout, retry)
    }

    /// Checks out a route. Never blocks waiting for a proxy.
    pub async fn route(&self, mode: RouteMode) -> Result<Route, SourceError> {
        if mode == RouteMode::Proxied {
            if let Some(pool) = &self.pool {
                while let Some(proxy) = pool.get() {
                    match self.client_for(Some(&proxy)).await {
                        Ok(client) => {
                            return Ok(Route {
                                client,
                                proxy: Some(proxy),
                                pool: Some(pool.clone()),
                            })
                        }
                        Err(reason) => {
                            tracing::warn!("Unusable proxy entry {}: {}", proxy, reason);
                            pool.mark_bad(&proxy);
                        }
                    }
                }
            }
            if !self.allow_direct {
                return Err(SourceError::ProxyFailure {
                    proxy: "none".to_string(),
                    reason: "pool exhausted and direct fallback disabled".to_string(),
                });
            }
            tracing::debug!("No proxy available, going direct");
        }

        let client = self
            .client_for(None)
            .await
            .map_err(SourceError::Transient)?;
        Ok(Route {
            client,
            proxy: None,
            pool: None,
        })
    }

    async fn client_for(&self, proxy: Option<&ProxyHandle>) -> Result<Client, String> {
        let key = proxy.map(ProxyHandle::url).unwrap_or_else(|| DIRECT_KEY.to_string());
        let timeout = if proxy.is_some() {
            self.proxy_timeout
        } else {
            self.direct_timeout
        };
        let proxy_url = proxy.map(ProxyHandle::url);

        self.clients
            .try_get_with(key, async move {
                let builder = Client::builder()
                    .timeout(timeout)
                    .default_headers(browser_headers());
                let builder = match proxy_url {
                    Some(url) => builder.proxy(reqwest::Proxy::all(url)?),
                    None => builder.no_proxy(),
                };
                builder.build()
            })
            .await
            .map_err(|e| e.to_string())
    }

    /// Runs `op` with a fresh route per attempt, retrying retryable failures
    /// up to the configured attempt count with a fixed delay.
    pub async fn with_retry<T, F, Fut>(
        &self,
        source: SourceKind,
        mode: RouteMode,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut(Route) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let route = self.route(mode).await?;
            match op(route).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        source,
                        attempt,
                        max_attempts,
                        e,
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Retries `op` on a route the caller already holds, for steps that must
    /// not restart the whole exchange. Only direct-route transient failures
    /// are retried; a proxy failure has already retired the proxy.
    pub async fn retry_pinned<T, F, Fut>(
        &self,
        source: SourceKind,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e @ SourceError::Transient(_)) if attempt < max_attempts => {
                    tracing::warn!(
                        "{} step attempt {}/{} failed: {}, retrying in {:?}",
                        source,
                        attempt,
                        max_attempts,
                        e,
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("ru-RU,ru;q=0.8,en-US;q=0.5,en;q=0.3"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_proxied_route_falls_back_to_direct() {
        let pool = Arc::new(ProxyPool::new(Duration::from_secs(60)));
        let client = RegistryClient::new(
            Some(pool),
            &ProxySettings::default(),
            Duration::from_secs(5),
            fast_retry(),
        );
        let route = client.route(RouteMode::Proxied).await.unwrap();
        assert!(route.proxy().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_pool_without_fallback_is_an_error() {
        let pool = Arc::new(ProxyPool::new(Duration::from_secs(60)));
        let settings = ProxySettings {
            allow_direct_fallback: false,
            ..ProxySettings::default()
        };
        let client = RegistryClient::new(Some(pool), &settings, Duration::from_secs(5), fast_retry());
        let err = client.route(RouteMode::Proxied).await.err().unwrap();
        assert!(matches!(err, SourceError::ProxyFailure { .. }));
        assert_eq!(err.status(), crate::models::SourceStatus::Error);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let client = RegistryClient::direct(Duration::from_secs(5), fast_retry());
        let mut calls = 0;
        let result: Result<(), SourceError> = client
            .with_retry(SourceKind::Tax, RouteMode::Direct, |_route| {
                calls += 1;
                async { Err(SourceError::Transient("timeout".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let client = RegistryClient::direct(Duration::from_secs(5), fast_retry());
        let mut calls = 0;
        let result: Result<(), SourceError> = client
            .with_retry(SourceKind::Debt, RouteMode::Direct, |_route| {
                calls += 1;
                async { Err(SourceError::CaptchaUnsolved) }
            })
            .await;
        assert_eq!(result, Err(SourceError::CaptchaUnsolved));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_pinned_retry_only_repeats_transient_failures() {
        let client = RegistryClient::direct(Duration::from_secs(5), fast_retry());

        let mut calls = 0;
        let result: Result<(), SourceError> = client
            .retry_pinned(SourceKind::Debt, || {
                calls += 1;
                async { Err(SourceError::Transient("status 503".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);

        let mut calls = 0;
        let result: Result<(), SourceError> = client
            .retry_pinned(SourceKind::Debt, || {
                calls += 1;
                async {
                    Err(SourceError::ProxyFailure {
                        proxy: "10.0.0.1:8080".into(),
                        reason: "timeout".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
