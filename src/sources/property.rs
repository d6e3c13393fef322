use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{into_fact, SourceAdapter};
use crate::errors::SourceError;
use crate::models::{FactData, Lead, PropertyFact, SourceFact, SourceKind};
use crate::registry_client::{RegistryClient, RouteMode};

/// Real-estate registry (Rosreestr) object search, keyed by INN.
pub struct PropertyRegistryAdapter {
    http: Arc<RegistryClient>,
    api_url: String,
}

impl PropertyRegistryAdapter {
    pub fn new(http: Arc<RegistryClient>, api_url: String) -> Self {
        Self { http, api_url }
    }

    async fn lookup(&self, lead: &Lead) -> Result<FactData, SourceError> {
        let inn = lead.inn().ok_or(SourceError::NoInput("inn"))?;
        let payload = json!({
            "filter": {
                "text": inn,
                "objectType": ["real_estate"]
            }
        });

        let body: Value = self
            .http
            .with_retry(SourceKind::Property, RouteMode::Direct, |route| {
                let payload = &payload;
                async move {
                    route
                        .send(route.client().post(&self.api_url).json(payload))
                        .await?
                        .json::<Value>()
                        .await
                        .map_err(|e| SourceError::ParseError(format!("Rosreestr response: {}", e)))
                }
            })
            .await?;

        let fact = parse_objects(&body)?;
        tracing::debug!(
            "Rosreestr: lead {} owns {} object(s)",
            lead.lead_id,
            fact.property_count
        );
        Ok(FactData::Property(fact))
    }
}

#[async_trait]
impl SourceAdapter for PropertyRegistryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Property
    }

    async fn fetch(&self, lead: &Lead) -> SourceFact {
        into_fact(SourceKind::Property, lead, self.lookup(lead).await)
    }
}

pub fn parse_objects(body: &Value) -> Result<PropertyFact, SourceError> {
    let object = body
        .as_object()
        .ok_or_else(|| SourceError::ParseError("Rosreestr response is not an object".into()))?;

    let count = object
        .get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().filter(|r| r.is_object()).count())
        .unwrap_or(0) as u32;

    Ok(PropertyFact {
        has_property: count > 0,
        property_count: count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_object_results_only() {
        let body = json!({"results": [{"cadastral": "77:01:1"}, null, {"cadastral": "77:01:2"}]});
        let fact = parse_objects(&body).unwrap();
        assert!(fact.has_property);
        assert_eq!(fact.property_count, 2);
    }

    #[test]
    fn test_missing_results_means_no_property() {
        let fact = parse_objects(&json!({"total": 0})).unwrap();
        assert!(!fact.has_property);
        assert_eq!(fact.property_count, 0);
    }
}
