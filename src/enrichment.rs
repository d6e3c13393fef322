/// Per-lead enrichment: fan a lead out to every registry adapter and merge
/// the facts they return.
///
/// Each adapter runs as its own task under an independent timeout, so a
/// hung or panicking registry only costs its own slot:
/// 1. Spawn one task per adapter
/// 2. Collect facts as they finish
/// 3. Fill the slots of timed-out or crashed adapters with `error` facts
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::errors::SourceError;
use crate::models::{EnrichedLead, Lead, SourceFact, SourceKind, SourceStatus};
use crate::sources::SourceAdapter;

pub struct EnrichmentOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    source_timeout: Duration,
}

impl EnrichmentOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, source_timeout: Duration) -> Self {
        Self {
            adapters,
            source_timeout,
        }
    }

    /// Never fails. Sources without an adapter stay `unavailable`.
    pub async fn enrich(&self, lead: &Lead) -> EnrichedLead {
        let shared = Arc::new(lead.clone());
        let mut pending: BTreeSet<SourceKind> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for adapter in &self.adapters {
            let kind = adapter.kind();
            pending.insert(kind);

            let adapter = Arc::clone(adapter);
            let lead = Arc::clone(&shared);
            let limit = self.source_timeout;
            tasks.spawn(async move {
                match tokio::time::timeout(limit, adapter.fetch(&lead)).await {
                    Ok(fact) => (kind, fact),
                    Err(_) => {
                        tracing::warn!(
                            "{}: no answer for lead {} within {:?}",
                            kind,
                            lead.lead_id,
                            limit
                        );
                        let error = SourceError::Transient(format!("timed out after {:?}", limit));
                        (kind, SourceFact::from_error(kind, &error))
                    }
                }
            });
        }

        let mut enriched = EnrichedLead::new(lead.clone());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, fact)) => {
                    pending.remove(&kind);
                    enriched.merge(fact);
                }
                Err(e) => {
                    tracing::error!("✗ Adapter task for lead {} crashed: {}", lead.lead_id, e);
                }
            }
        }

        // Whatever is still pending belongs to a task that never returned.
        for kind in pending {
            let error = SourceError::Transient("adapter task aborted".to_string());
            enriched.merge(SourceFact::from_error(kind, &error));
        }

        tracing::debug!(
            "Lead {} enriched: {} ok, {} error, {} no_input, {} unavailable",
            lead.lead_id,
            enriched.count_status(SourceStatus::Ok),
            enriched.count_status(SourceStatus::Error),
            enriched.count_status(SourceStatus::NoInput),
            enriched.count_status(SourceStatus::Unavailable)
        );

        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DebtFact, FactData, TaxFact};
    use async_trait::async_trait;

    struct Fixed(SourceFact);

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn kind(&self) -> SourceKind {
            self.0.source
        }

        async fn fetch(&self, _lead: &Lead) -> SourceFact {
            self.0.clone()
        }
    }

    struct Hangs;

    #[async_trait]
    impl SourceAdapter for Hangs {
        fn kind(&self) -> SourceKind {
            SourceKind::Court
        }

        async fn fetch(&self, _lead: &Lead) -> SourceFact {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("timeout fires first")
        }
    }

    struct Panics;

    #[async_trait]
    impl SourceAdapter for Panics {
        fn kind(&self) -> SourceKind {
            SourceKind::Property
        }

        async fn fetch(&self, _lead: &Lead) -> SourceFact {
            panic!("parser bug")
        }
    }

    fn lead() -> Lead {
        Lead {
            lead_id: "L-7".to_string(),
            fio: "Петров Пётр Петрович".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_timeout_and_panic_are_isolated() {
        let debt = DebtFact {
            amount: 400_000.0,
            count: 3,
            ..Default::default()
        };
        let orchestrator = EnrichmentOrchestrator::new(
            vec![
                Arc::new(Fixed(SourceFact::ok(FactData::Debt(debt.clone())))),
                Arc::new(Hangs),
                Arc::new(Panics),
                Arc::new(Fixed(SourceFact::ok(FactData::Tax(TaxFact::default())))),
            ],
            Duration::from_millis(50),
        );

        let enriched = orchestrator.enrich(&lead()).await;

        assert_eq!(enriched.debt, debt);
        assert_eq!(enriched.status(SourceKind::Debt), SourceStatus::Ok);
        assert_eq!(enriched.status(SourceKind::Tax), SourceStatus::Ok);
        assert_eq!(enriched.status(SourceKind::Court), SourceStatus::Error);
        assert_eq!(enriched.status(SourceKind::Property), SourceStatus::Error);
        assert_eq!(enriched.status(SourceKind::Bankruptcy), SourceStatus::Unavailable);
        assert!(!enriched.court.has_order);
    }

    #[tokio::test]
    async fn test_no_adapters_leaves_everything_unavailable() {
        let orchestrator = EnrichmentOrchestrator::new(Vec::new(), Duration::from_secs(1));
        let enriched = orchestrator.enrich(&lead()).await;
        assert_eq!(enriched.count_status(SourceStatus::Unavailable), 5);
        assert!(enriched.tax.active);
    }
}
