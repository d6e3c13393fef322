use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use super::html::{blocks_with_class, text_of_class};
use super::{into_fact, SourceAdapter};
use crate::errors::SourceError;
use crate::models::{CourtFact, FactData, Lead, SourceFact, SourceKind};
use crate::registry_client::{RegistryClient, RouteMode};

/// Court-order search on the courts portal (SudRF), keyed by FIO.
pub struct CourtRegistryAdapter {
    http: Arc<RegistryClient>,
    base_url: String,
}

impl CourtRegistryAdapter {
    pub fn new(http: Arc<RegistryClient>, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, lead: &Lead) -> Result<FactData, SourceError> {
        let fio = lead.fio().ok_or(SourceError::NoInput("fio"))?;
        let url = format!("{}/index.php", self.base_url);

        let page = self
            .http
            .with_retry(SourceKind::Court, RouteMode::Proxied, |route| {
                let url = url.as_str();
                async move {
                    let request = route.client().get(url).query(&[
                        ("id", "300"),
                        ("act", "ajax_search"),
                        ("searchform", "FIO"),
                        ("court_subj", "0"),
                        ("fio", fio),
                    ]);
                    route
                        .send(request)
                        .await?
                        .text()
                        .await
                        .map_err(|e| SourceError::Transient(format!("court page body: {}", e)))
                }
            })
            .await?;

        let fact = parse_orders(&page);
        if fact.has_order {
            tracing::info!(
                "SudRF: lead {} has {} court order(s), latest {}",
                lead.lead_id,
                fact.order_count,
                fact.order_date.as_deref().unwrap_or("-")
            );
        }
        Ok(FactData::Court(fact))
    }
}

#[async_trait]
impl SourceAdapter for CourtRegistryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Court
    }

    async fn fetch(&self, lead: &Lead) -> SourceFact {
        into_fact(SourceKind::Court, lead, self.lookup(lead).await)
    }
}

/// Collects `resultItem` blocks. Items whose date is not `dd.mm.yyyy` are
/// skipped; the latest valid date becomes the order date.
pub fn parse_orders(html: &str) -> CourtFact {
    let dates: Vec<NaiveDate> = blocks_with_class(html, "resultItem")
        .into_iter()
        .filter_map(|item| text_of_class(item, "date"))
        .filter_map(|raw| NaiveDate::parse_from_str(raw.trim(), "%d.%m.%Y").ok())
        .collect();

    CourtFact {
        has_order: !dates.is_empty(),
        order_date: dates.iter().max().map(|d| d.format("%Y-%m-%d").to_string()),
        order_count: dates.len() as u32,
    }
}
