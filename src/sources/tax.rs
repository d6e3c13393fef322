use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{into_fact, SourceAdapter};
use crate::errors::SourceError;
use crate::models::{FactData, Lead, SourceFact, SourceKind, TaxFact};
use crate::registry_client::{RegistryClient, RouteMode};

/// Taxpayer-id status check (FNS).
pub struct TaxRegistryAdapter {
    http: Arc<RegistryClient>,
    api_url: String,
}

impl TaxRegistryAdapter {
    pub fn new(http: Arc<RegistryClient>, api_url: String) -> Self {
        Self { http, api_url }
    }

    async fn lookup(&self, lead: &Lead) -> Result<FactData, SourceError> {
        let inn = lead.inn().ok_or(SourceError::NoInput("inn"))?;
        let form = [("c", "find"), ("inn", inn), ("captcha", ""), ("captchaToken", "")];

        let body: Value = self
            .http
            .with_retry(SourceKind::Tax, RouteMode::Direct, |route| {
                let form = &form;
                async move {
                    route
                        .send(route.client().post(&self.api_url).form(form))
                        .await?
                        .json::<Value>()
                        .await
                        .map_err(|e| SourceError::ParseError(format!("FNS response: {}", e)))
                }
            })
            .await?;

        let fact = parse_status(&body)?;
        if !fact.active {
            tracing::info!("FNS: INN of lead {} is not active ({})", lead.lead_id, fact.status);
        }
        Ok(FactData::Tax(fact))
    }
}

#[async_trait]
impl SourceAdapter for TaxRegistryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Tax
    }

    async fn fetch(&self, lead: &Lead) -> SourceFact {
        into_fact(SourceKind::Tax, lead, self.lookup(lead).await)
    }
}

/// `code == 0` means the id is active; any other code carries the registry's
/// message as status.
pub fn parse_status(body: &Value) -> Result<TaxFact, SourceError> {
    let code = body
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| SourceError::ParseError("FNS response has no code".to_string()))?;

    if code == 0 {
        return Ok(TaxFact::default());
    }

    let status = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("inactive");

    Ok(TaxFact {
        active: false,
        status: status.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_code_zero_is_active() {
        let fact = parse_status(&json!({"code": 0})).unwrap();
        assert!(fact.active);
        assert_eq!(fact.status, "active");
    }

    #[test]
    fn test_nonzero_code_uses_message() {
        let fact = parse_status(&json!({"code": 1, "message": "ИНН не найден"})).unwrap();
        assert!(!fact.active);
        assert_eq!(fact.status, "ИНН не найден");

        let fact = parse_status(&json!({"code": 2})).unwrap();
        assert_eq!(fact.status, "inactive");
    }

    #[test]
    fn test_missing_code_is_parse_error() {
        assert!(matches!(
            parse_status(&json!({"message": "?"})),
            Err(SourceError::ParseError(_))
        ));
    }
}
