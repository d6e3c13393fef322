use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Base URLs of the five registries queried during enrichment.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEndpoints {
    /// Debt registry (FSSP) site root; the captcha-protected search lives under `/iss/ip/`.
    pub fssp_base_url: String,
    /// Bankruptcy registry (Fedresurs) API root.
    pub fedresurs_api_url: String,
    /// Optional Fedresurs API token.
    pub fedresurs_api_key: Option<String>,
    /// Property registry (Rosreestr) search endpoint.
    pub rosreestr_api_url: String,
    /// Court-order registry (SudRF) site root.
    pub court_base_url: String,
    /// Tax-status registry (FNS) lookup endpoint.
    pub fns_api_url: String,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            fssp_base_url: "https://fssp.gov.ru".to_string(),
            fedresurs_api_url: "https://api.fedresurs.ru/v1.0/bankruptcy".to_string(),
            fedresurs_api_key: None,
            rosreestr_api_url: "https://rosreestr.gov.ru/api/online/fir_objects".to_string(),
            court_base_url: "https://sudrf.ru".to_string(),
            fns_api_url: "https://service.nalog.ru/inn-proc.do".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    pub enabled: bool,
    pub file: String,
    /// Minimum time between two reloads of the proxy file.
    pub refresh_interval: Duration,
    /// Timeout applied to requests routed through a proxy.
    pub timeout: Duration,
    /// Go direct when the pool is empty instead of reporting the source unavailable.
    pub allow_direct_fallback: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "proxies.txt".to_string(),
            refresh_interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(10),
            allow_direct_fallback: true,
        }
    }
}

/// Captcha solve budget.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaSettings {
    pub api_key: Option<String>,
    pub api_url: String,
    pub poll_attempts: u32,
    pub poll_delay: Duration,
    /// Wall-clock ceiling for one whole solve, polling included.
    pub budget: Duration,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.anti-captcha.com".to_string(),
            poll_attempts: 10,
            poll_delay: Duration::from_secs(5),
            budget: Duration::from_secs(60),
        }
    }
}

/// Bounded retry with a fixed delay between attempts. No backoff growth.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSettings {
    /// Number of leads processed concurrently.
    pub worker_pool_size: usize,
    /// Per-adapter ceiling enforced by the orchestrator on top of adapter timeouts.
    pub source_timeout: Duration,
    /// A run aborts once the lead error count exceeds this value.
    pub max_errors_before_fail: usize,
    pub max_leads_per_run: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            source_timeout: Duration::from_secs(120),
            max_errors_before_fail: 100,
            max_leads_per_run: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub registries: RegistryEndpoints,
    pub proxy: ProxySettings,
    pub captcha: CaptchaSettings,
    /// Timeout for direct (unproxied) registry requests.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub run: RunSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            registries: RegistryEndpoints::default(),
            proxy: ProxySettings::default(),
            captcha: CaptchaSettings::default(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            run: RunSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: env_parse("PORT", defaults.port)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            registries: RegistryEndpoints {
                fssp_base_url: env_url("FSSP_BASE_URL", &defaults.registries.fssp_base_url)?,
                fedresurs_api_url: env_url(
                    "FEDRESURS_API_URL",
                    &defaults.registries.fedresurs_api_url,
                )?,
                fedresurs_api_key: env_optional("FEDRESURS_API_KEY"),
                rosreestr_api_url: env_url(
                    "ROSREESTR_API_URL",
                    &defaults.registries.rosreestr_api_url,
                )?,
                court_base_url: env_url("COURT_BASE_URL", &defaults.registries.court_base_url)?,
                fns_api_url: env_url("FNS_API_URL", &defaults.registries.fns_api_url)?,
            },
            proxy: ProxySettings {
                enabled: env_parse("PROXY_ENABLED", defaults.proxy.enabled)?,
                file: std::env::var("PROXY_FILE").unwrap_or(defaults.proxy.file),
                refresh_interval: env_secs("PROXY_REFRESH_SECS", defaults.proxy.refresh_interval)?,
                timeout: env_secs("PROXY_TIMEOUT_SECS", defaults.proxy.timeout)?,
                allow_direct_fallback: env_parse(
                    "ALLOW_DIRECT_FALLBACK",
                    defaults.proxy.allow_direct_fallback,
                )?,
            },
            captcha: CaptchaSettings {
                api_key: env_optional("CAPTCHA_API_KEY"),
                api_url: env_url("CAPTCHA_API_URL", &defaults.captcha.api_url)?,
                poll_attempts: env_parse("CAPTCHA_POLL_ATTEMPTS", defaults.captcha.poll_attempts)?,
                poll_delay: env_secs("CAPTCHA_POLL_DELAY_SECS", defaults.captcha.poll_delay)?,
                budget: env_secs("CAPTCHA_BUDGET_SECS", defaults.captcha.budget)?,
            },
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            retry: RetryPolicy {
                max_attempts: env_parse("MAX_RETRIES", defaults.retry.max_attempts)?,
                delay: env_secs("RETRY_DELAY_SECS", defaults.retry.delay)?,
            },
            run: RunSettings {
                worker_pool_size: env_parse("WORKER_POOL_SIZE", defaults.run.worker_pool_size)?,
                source_timeout: env_secs("SOURCE_TIMEOUT_SECS", defaults.run.source_timeout)?,
                max_errors_before_fail: env_parse(
                    "MAX_ERRORS_BEFORE_FAIL",
                    defaults.run.max_errors_before_fail,
                )?,
                max_leads_per_run: env_parse("MAX_LEADS_PER_RUN", defaults.run.max_leads_per_run)?,
            },
        };

        if config.run.worker_pool_size == 0 {
            anyhow::bail!("WORKER_POOL_SIZE must be at least 1");
        }
        if config.retry.max_attempts == 0 {
            anyhow::bail!("MAX_RETRIES must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("FSSP Base URL: {}", config.registries.fssp_base_url);
        tracing::debug!("Court Base URL: {}", config.registries.court_base_url);
        if config.captcha.api_key.is_none() {
            tracing::warn!("CAPTCHA_API_KEY not set, captcha-protected sources will be unavailable");
        }
        tracing::debug!(
            "Worker pool: {}, error ceiling: {}",
            config.run.worker_pool_size,
            config.run.max_errors_before_fail
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env_optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> anyhow::Result<Duration> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

fn env_url(key: &str, default: &str) -> anyhow::Result<String> {
    let url = env_optional(key).unwrap_or_else(|| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", key);
    }
    Ok(url.trim_end_matches('/').to_string())
}
