//! Registry adapters.
//!
//! Each adapter turns a lead into exactly one [`SourceFact`]. Failures are
//! folded into the fact's status; `fetch` itself cannot fail.

pub mod bankruptcy;
pub mod court;
pub mod debt;
pub mod html;
pub mod property;
pub mod tax;

use async_trait::async_trait;
use std::sync::Arc;

use crate::captcha::CaptchaSolver;
use crate::config::RegistryEndpoints;
use crate::errors::SourceError;
use crate::models::{FactData, Lead, SourceFact, SourceKind};
use crate::registry_client::RegistryClient;

pub use bankruptcy::BankruptcyRegistryAdapter;
pub use court::CourtRegistryAdapter;
pub use debt::DebtRegistryAdapter;
pub use property::PropertyRegistryAdapter;
pub use tax::TaxRegistryAdapter;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(&self, lead: &Lead) -> SourceFact;
}

/// Folds an adapter outcome into a fact, logging non-ok outcomes.
pub(crate) fn into_fact(
    kind: SourceKind,
    lead: &Lead,
    outcome: Result<FactData, SourceError>,
) -> SourceFact {
    match outcome {
        Ok(data) => SourceFact::ok(data),
        Err(e @ SourceError::NoInput(_)) => {
            tracing::debug!("{}: skipping lead {} ({})", kind, lead.lead_id, e);
            SourceFact::from_error(kind, &e)
        }
        Err(e) => {
            tracing::warn!("{}: lookup failed for lead {}: {}", kind, lead.lead_id, e);
            SourceFact::from_error(kind, &e)
        }
    }
}

/// The five registry adapters wired to the shared HTTP client.
pub fn default_adapters(
    endpoints: &RegistryEndpoints,
    http: Arc<RegistryClient>,
    solver: Option<Arc<dyn CaptchaSolver>>,
) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(DebtRegistryAdapter::new(
            http.clone(),
            solver,
            endpoints.fssp_base_url.clone(),
        )),
        Arc::new(BankruptcyRegistryAdapter::new(
            http.clone(),
            endpoints.fedresurs_api_url.clone(),
            endpoints.fedresurs_api_key.clone(),
        )),
        Arc::new(PropertyRegistryAdapter::new(
            http.clone(),
            endpoints.rosreestr_api_url.clone(),
        )),
        Arc::new(CourtRegistryAdapter::new(
            http.clone(),
            endpoints.court_base_url.clone(),
        )),
        Arc::new(TaxRegistryAdapter::new(http, endpoints.fns_api_url.clone())),
    ]
}
