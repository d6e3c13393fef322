use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{into_fact, SourceAdapter};
use crate::errors::SourceError;
use crate::models::{BankruptcyFact, FactData, Lead, SourceFact, SourceKind};
use crate::registry_client::{RegistryClient, RouteMode};

/// Bankruptcy registry (Fedresurs) JSON API, keyed by INN.
pub struct BankruptcyRegistryAdapter {
    http: Arc<RegistryClient>,
    api_url: String,
    api_key: Option<String>,
}

impl BankruptcyRegistryAdapter {
    pub fn new(http: Arc<RegistryClient>, api_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn lookup(&self, lead: &Lead) -> Result<FactData, SourceError> {
        let inn = lead.inn().ok_or(SourceError::NoInput("inn"))?;
        let url = format!("{}/Search", self.api_url);

        // Token is kept out of the logs.
        tracing::debug!("Fedresurs: searching {}?inn={}&token=[REDACTED]", url, inn);

        let body: Value = self
            .http
            .with_retry(SourceKind::Bankruptcy, RouteMode::Direct, |route| {
                let url = url.clone();
                async move {
                    let mut request = route.client().get(&url).query(&[("inn", inn)]);
                    if let Some(key) = &self.api_key {
                        request = request.query(&[("token", key.as_str())]);
                    }
                    route
                        .send(request)
                        .await?
                        .json::<Value>()
                        .await
                        .map_err(|e| SourceError::ParseError(format!("Fedresurs response: {}", e)))
                }
            })
            .await?;

        Ok(FactData::Bankruptcy(parse_procedures(&body)?))
    }
}

#[async_trait]
impl SourceAdapter for BankruptcyRegistryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Bankruptcy
    }

    async fn fetch(&self, lead: &Lead) -> SourceFact {
        into_fact(SourceKind::Bankruptcy, lead, self.lookup(lead).await)
    }
}

/// A lead is bankrupt when at least one procedure is `ACTIVE`. Entries that
/// are not objects or lack a status are skipped.
pub fn parse_procedures(body: &Value) -> Result<BankruptcyFact, SourceError> {
    let object = body
        .as_object()
        .ok_or_else(|| SourceError::ParseError("Fedresurs response is not an object".into()))?;

    let active: Vec<&Value> = object
        .get("procedures")
        .and_then(Value::as_array)
        .map(|procedures| {
            procedures
                .iter()
                .filter(|p| {
                    p.get("status")
                        .and_then(Value::as_str)
                        .map(|s| s.eq_ignore_ascii_case("active"))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(BankruptcyFact {
        is_bankrupt: !active.is_empty(),
        procedure: active
            .first()
            .map(|p| {
                p.get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string()
            })
            .unwrap_or_else(|| "none".to_string()),
    })
}
