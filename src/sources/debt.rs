use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use super::html::{blocks_with_class, find_tag, text_of_class};
use super::{into_fact, SourceAdapter};
use crate::captcha::CaptchaSolver;
use crate::errors::SourceError;
use crate::models::{DebtFact, DebtType, FactData, Lead, SourceFact, SourceKind};
use crate::registry_client::{RegistryClient, RouteMode, Route};

/// Enforcement-proceedings registry (FSSP). The search form sits behind an
/// image captcha, so every lookup is challenge page, solve, then form submit.
pub struct DebtRegistryAdapter {
    http: Arc<RegistryClient>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    base_url: String,
}

/// Captcha challenge extracted from the search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub image_url: String,
    pub token: String,
}

impl DebtRegistryAdapter {
    pub fn new(
        http: Arc<RegistryClient>,
        solver: Option<Arc<dyn CaptchaSolver>>,
        base_url: String,
    ) -> Self {
        Self {
            http,
            solver,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/iss/ip/", self.base_url)
    }

    async fn lookup(&self, lead: &Lead) -> Result<FactData, SourceError> {
        if lead.fio().is_none() {
            return Err(SourceError::NoInput("fio"));
        }
        let solver = self.solver.as_deref().ok_or_else(|| {
            SourceError::Unavailable("captcha solver not configured".to_string())
        })?;

        let page_url = self.search_url();
        let (route, challenge) = self
            .http
            .with_retry(SourceKind::Debt, RouteMode::Proxied, |route| {
                let page_url = page_url.as_str();
                async move {
                    let page = route
                        .send(route.client().get(page_url))
                        .await?
                        .text()
                        .await
                        .map_err(|e| SourceError::Transient(format!("challenge page body: {}", e)))?;
                    let challenge = parse_challenge(&page, page_url)?;
                    Ok((route, challenge))
                }
            })
            .await?;

        // One solve per lookup. Failures after this point are never re-solved.
        let Some(answer) = solver.solve(&challenge.image_url).await else {
            return Err(SourceError::CaptchaUnsolved);
        };

        self.submit(&route, &page_url, &challenge, &answer, lead)
            .await
            .map(FactData::Debt)
    }

    /// Posts the search form on the route that served the challenge, so the
    /// registry sees one client.
    async fn submit(
        &self,
        route: &Route,
        page_url: &str,
        challenge: &Challenge,
        answer: &str,
        lead: &Lead,
    ) -> Result<DebtFact, SourceError> {
        let fio = lead.fio_parts();
        let birth_date = lead
            .dob
            .map(|d| d.format("%d.%m.%Y").to_string())
            .unwrap_or_default();
        let form = [
            ("is", "ip"),
            ("region", "-1"),
            ("lastname", fio.last_name.as_str()),
            ("firstname", fio.first_name.as_str()),
            ("patronymic", fio.middle_name.as_str()),
            ("bd", birth_date.as_str()),
            ("captcha", answer),
            ("captcha_token", challenge.token.as_str()),
        ];

        let results = self
            .http
            .retry_pinned(SourceKind::Debt, || {
                let form = &form;
                async move {
                    route
                        .send(route.client().post(page_url).form(form))
                        .await?
                        .text()
                        .await
                        .map_err(|e| SourceError::Transient(format!("result page body: {}", e)))
                }
            })
            .await?;

        let fact = parse_debts(&results);
        tracing::info!(
            "FSSP: lead {} has {} debt record(s), total {:.2}",
            lead.lead_id,
            fact.count,
            fact.amount
        );
        Ok(fact)
    }
}

#[async_trait]
impl SourceAdapter for DebtRegistryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Debt
    }

    async fn fetch(&self, lead: &Lead) -> SourceFact {
        into_fact(SourceKind::Debt, lead, self.lookup(lead).await)
    }
}

/// Locates the captcha image and its hidden token. Relative image
/// references are resolved against the page URL.
pub fn parse_challenge(html: &str, page_url: &str) -> Result<Challenge, SourceError> {
    let src = find_tag(html, "img", |t| t.has_class("captcha-img"))
        .and_then(|img| img.attr("src"))
        .ok_or_else(|| SourceError::ParseError("captcha image not found".to_string()))?;
    let token = find_tag(html, "input", |t| {
        t.attr("name").as_deref() == Some("captcha_token")
    })
    .and_then(|input| input.attr("value"))
    .ok_or_else(|| SourceError::ParseError("captcha token not found".to_string()))?;

    let image_url = Url::parse(page_url)
        .and_then(|base| base.join(&src))
        .map_err(|e| SourceError::ParseError(format!("bad captcha reference {}: {}", src, e)))?;

    Ok(Challenge {
        image_url: image_url.to_string(),
        token,
    })
}

/// Aggregates the result rows. Rows with an unparseable amount are dropped.
pub fn parse_debts(html: &str) -> DebtFact {
    let mut amount = 0.0;
    let mut types = Vec::new();
    let mut creditor = None;

    for row in blocks_with_class(html, "search-result-item") {
        let Some(row_amount) = text_of_class(row, "amount").and_then(|t| parse_amount(&t)) else {
            tracing::debug!("FSSP: skipping row with unparseable amount");
            continue;
        };
        amount += row_amount;
        types.push(DebtType::classify(
            &text_of_class(row, "type").unwrap_or_default(),
        ));
        if creditor.is_none() {
            creditor = text_of_class(row, "creditor");
        }
    }

    DebtFact {
        amount,
        debt_type: representative_type(&types),
        creditor: creditor.unwrap_or_default(),
        count: types.len() as u32,
    }
}

/// Parses amounts such as `1 234 567,89 руб.`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let cleaned = cleaned.trim_end_matches('.');
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Most frequent category; ties go to the one seen first.
pub fn representative_type(types: &[DebtType]) -> DebtType {
    let mut tally: Vec<(&DebtType, usize)> = Vec::new();
    for debt_type in types {
        match tally.iter_mut().find(|(t, _)| *t == debt_type) {
            Some((_, count)) => *count += 1,
            None => tally.push((debt_type, 1)),
        }
    }

    let mut best: Option<(&DebtType, usize)> = None;
    for (debt_type, count) in tally {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((debt_type, count));
        }
    }
    best.map(|(t, _)| t.clone()).unwrap_or_default()
}
