use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::SourceError;

// ============ Leads ============

/// An identity record to be enriched and scored.
///
/// Leads arrive already normalized; nothing in the core mutates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Unique, stable identifier.
    pub lead_id: String,
    /// Full name: surname, given name, patronymic.
    pub fio: String,
    /// Date of birth.
    #[serde(default)]
    pub dob: Option<NaiveDate>,
    /// Taxpayer id as received.
    #[serde(default)]
    pub inn: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// FIO split into its three positional tokens. Missing tokens are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FioParts {
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
}

impl Lead {
    /// Returns the INN only when it is a well-formed 10 to 12 digit id.
    pub fn inn(&self) -> Option<&str> {
        let inn = self.inn.as_deref()?.trim();
        let well_formed =
            (10..=12).contains(&inn.len()) && inn.chars().all(|c| c.is_ascii_digit());
        well_formed.then_some(inn)
    }

    /// Returns the trimmed FIO, or `None` when it is blank.
    pub fn fio(&self) -> Option<&str> {
        let fio = self.fio.trim();
        (!fio.is_empty()).then_some(fio)
    }

    pub fn fio_parts(&self) -> FioParts {
        let mut tokens = self.fio.split_whitespace().map(str::to_string);
        FioParts {
            last_name: tokens.next().unwrap_or_default(),
            first_name: tokens.next().unwrap_or_default(),
            middle_name: tokens.next().unwrap_or_default(),
        }
    }
}

// ============ Sources ============

/// The registries queried for every lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Enforcement-proceedings debt registry (FSSP).
    Debt,
    /// Bankruptcy registry (Fedresurs).
    Bankruptcy,
    /// Real-estate registry (Rosreestr).
    Property,
    /// Court-order registry (SudRF).
    Court,
    /// Taxpayer-id status registry (FNS).
    Tax,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Debt,
        SourceKind::Bankruptcy,
        SourceKind::Property,
        SourceKind::Court,
        SourceKind::Tax,
    ];

    /// Field prefix used in the flattened lead view.
    pub fn prefix(&self) -> &'static str {
        match self {
            SourceKind::Debt => "fssp",
            SourceKind::Bankruptcy => "fedresurs",
            SourceKind::Property => "rosreestr",
            SourceKind::Court => "court",
            SourceKind::Tax => "inn",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Error,
    Unavailable,
    NoInput,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::Error => "error",
            SourceStatus::Unavailable => "unavailable",
            SourceStatus::NoInput => "no_input",
        }
    }
}

/// Debt category as reported by the debt registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DebtType {
    Bank,
    Microfinance,
    Tax,
    Utility,
    Other(String),
    #[default]
    Unknown,
}

impl DebtType {
    /// Maps a registry label onto a category. Blank labels are `Other("")`,
    /// which scores neutrally; `Unknown` is reserved for "no data".
    pub fn classify(raw: &str) -> Self {
        let label = raw.trim().to_lowercase();
        match label.as_str() {
            "bank" | "банк" | "кредит" | "кредитный" => DebtType::Bank,
            "mfo" | "microfinance" | "мфо" | "микрозайм" => DebtType::Microfinance,
            "tax" | "налог" | "налоги" | "фнс" => DebtType::Tax,
            "utility" | "жкх" | "коммунальные" => DebtType::Utility,
            "unknown" => DebtType::Unknown,
            _ => DebtType::Other(label),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DebtType::Bank => "bank",
            DebtType::Microfinance => "mfo",
            DebtType::Tax => "tax",
            DebtType::Utility => "utility",
            DebtType::Other(label) => label,
            DebtType::Unknown => "unknown",
        }
    }

    pub fn is_bank_or_mfo(&self) -> bool {
        matches!(self, DebtType::Bank | DebtType::Microfinance)
    }

    pub fn is_tax_or_utility(&self) -> bool {
        matches!(self, DebtType::Tax | DebtType::Utility)
    }
}

impl From<String> for DebtType {
    fn from(raw: String) -> Self {
        DebtType::classify(&raw)
    }
}

impl From<DebtType> for String {
    fn from(debt_type: DebtType) -> Self {
        debt_type.as_str().to_string()
    }
}

// ============ Facts ============

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebtFact {
    /// Sum of all parsed enforcement amounts, rubles.
    pub amount: f64,
    /// Most frequent category among parsed records.
    pub debt_type: DebtType,
    /// Creditor of the first parsed record.
    pub creditor: String,
    /// Number of parsed records.
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankruptcyFact {
    pub is_bankrupt: bool,
    /// Type of the first active procedure, `"none"` without one.
    pub procedure: String,
}

impl Default for BankruptcyFact {
    fn default() -> Self {
        Self {
            is_bankrupt: false,
            procedure: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyFact {
    pub has_property: bool,
    pub property_count: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CourtFact {
    pub has_order: bool,
    /// ISO date (`YYYY-MM-DD`) of the most recent order.
    pub order_date: Option<String>,
    pub order_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxFact {
    pub active: bool,
    /// `"active"`, or the registry's explanation when the id is not active.
    pub status: String,
}

impl Default for TaxFact {
    fn default() -> Self {
        Self {
            active: true,
            status: "active".to_string(),
        }
    }
}

/// Adapter-specific payload of a [`SourceFact`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactData {
    Debt(DebtFact),
    Bankruptcy(BankruptcyFact),
    Property(PropertyFact),
    Court(CourtFact),
    Tax(TaxFact),
}

impl FactData {
    /// Neutral payload used whenever a source did not answer `ok`.
    pub fn default_for(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Debt => FactData::Debt(DebtFact::default()),
            SourceKind::Bankruptcy => FactData::Bankruptcy(BankruptcyFact::default()),
            SourceKind::Property => FactData::Property(PropertyFact::default()),
            SourceKind::Court => FactData::Court(CourtFact::default()),
            SourceKind::Tax => FactData::Tax(TaxFact::default()),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            FactData::Debt(_) => SourceKind::Debt,
            FactData::Bankruptcy(_) => SourceKind::Bankruptcy,
            FactData::Property(_) => SourceKind::Property,
            FactData::Court(_) => SourceKind::Court,
            FactData::Tax(_) => SourceKind::Tax,
        }
    }
}

/// Result of one adapter call. Always produced, never omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFact {
    pub source: SourceKind,
    pub status: SourceStatus,
    pub data: FactData,
    /// Diagnostic for non-ok statuses.
    pub detail: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl SourceFact {
    pub fn ok(data: FactData) -> Self {
        Self {
            source: data.kind(),
            status: SourceStatus::Ok,
            data,
            detail: None,
            fetched_at: Utc::now(),
        }
    }

    /// Fact carrying neutral defaults and the status the error maps to.
    pub fn from_error(kind: SourceKind, error: &SourceError) -> Self {
        Self {
            source: kind,
            status: error.status(),
            data: FactData::default_for(kind),
            detail: Some(error.to_string()),
            fetched_at: Utc::now(),
        }
    }
}

// ============ Enriched lead ============

/// A lead with one fact block per source and the per-source status map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedLead {
    pub lead: Lead,
    pub debt: DebtFact,
    pub bankruptcy: BankruptcyFact,
    pub property: PropertyFact,
    pub court: CourtFact,
    pub tax: TaxFact,
    pub statuses: BTreeMap<SourceKind, SourceStatus>,
    pub fetched_at: BTreeMap<SourceKind, DateTime<Utc>>,
}

impl EnrichedLead {
    /// Starts from defaults everywhere; sources never merged stay `unavailable`.
    pub fn new(lead: Lead) -> Self {
        Self {
            lead,
            debt: DebtFact::default(),
            bankruptcy: BankruptcyFact::default(),
            property: PropertyFact::default(),
            court: CourtFact::default(),
            tax: TaxFact::default(),
            statuses: SourceKind::ALL
                .iter()
                .map(|kind| (*kind, SourceStatus::Unavailable))
                .collect(),
            fetched_at: BTreeMap::new(),
        }
    }

    pub fn merge(&mut self, fact: SourceFact) {
        self.statuses.insert(fact.source, fact.status);
        self.fetched_at.insert(fact.source, fact.fetched_at);
        // A payload that disagrees with its source tag keeps the defaults.
        if fact.data.kind() != fact.source {
            return;
        }
        match fact.data {
            FactData::Debt(d) => self.debt = d,
            FactData::Bankruptcy(b) => self.bankruptcy = b,
            FactData::Property(p) => self.property = p,
            FactData::Court(c) => self.court = c,
            FactData::Tax(t) => self.tax = t,
        }
    }

    pub fn status(&self, kind: SourceKind) -> SourceStatus {
        self.statuses
            .get(&kind)
            .copied()
            .unwrap_or(SourceStatus::Unavailable)
    }

    pub fn count_status(&self, status: SourceStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }

    /// Flattened field namespace keyed by source prefix. Every key is present.
    pub fn flatten(&self) -> Map<String, Value> {
        let stamp = |kind: SourceKind| {
            self.fetched_at
                .get(&kind)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        };
        let debt_status = match self.status(SourceKind::Debt) {
            SourceStatus::Ok if self.debt.amount > 0.0 => "active",
            SourceStatus::Ok => "none",
            other => other.as_str(),
        };

        let mut map = Map::new();
        map.insert("lead_id".into(), json!(self.lead.lead_id));
        map.insert("fio".into(), json!(self.lead.fio));
        map.insert("phone".into(), json!(self.lead.phone.clone().unwrap_or_default()));
        map.insert("inn".into(), json!(self.lead.inn.clone().unwrap_or_default()));
        map.insert("fssp_debt_amount".into(), json!(self.debt.amount));
        map.insert("fssp_debt_type".into(), json!(self.debt.debt_type.as_str()));
        map.insert("fssp_creditor".into(), json!(self.debt.creditor));
        map.insert("fssp_debt_count".into(), json!(self.debt.count));
        map.insert("fssp_status".into(), json!(debt_status));
        map.insert("fssp_updated".into(), json!(stamp(SourceKind::Debt)));
        map.insert("fedresurs_is_bankrupt".into(), json!(self.bankruptcy.is_bankrupt));
        map.insert("fedresurs_procedure".into(), json!(self.bankruptcy.procedure));
        map.insert("fedresurs_updated".into(), json!(stamp(SourceKind::Bankruptcy)));
        map.insert("rosreestr_has_property".into(), json!(self.property.has_property));
        map.insert("rosreestr_property_count".into(), json!(self.property.property_count));
        map.insert("rosreestr_updated".into(), json!(stamp(SourceKind::Property)));
        map.insert("court_has_order".into(), json!(self.court.has_order));
        map.insert("court_order_date".into(), json!(self.court.order_date));
        map.insert("court_order_count".into(), json!(self.court.order_count));
        map.insert("court_updated".into(), json!(stamp(SourceKind::Court)));
        map.insert("inn_active".into(), json!(self.tax.active));
        map.insert("inn_status".into(), json!(self.tax.status));
        map.insert("inn_updated".into(), json!(stamp(SourceKind::Tax)));
        for kind in SourceKind::ALL {
            map.insert(
                format!("{}_source_status", kind.prefix()),
                json!(self.status(kind).as_str()),
            );
        }
        map
    }
}

// ============ Scoring ============

fn default_min_debt() -> i64 {
    250_000
}

fn default_true() -> bool {
    true
}

/// Caller-supplied thresholds and downstream filters.
///
/// Only `min_debt` takes part in scoring. The boolean flags select which
/// scored leads reach the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_min_debt")]
    pub min_debt: i64,
    #[serde(default = "default_true")]
    pub exclude_bankrupt: bool,
    #[serde(default)]
    pub exclude_no_debt: bool,
    #[serde(default)]
    pub only_property: bool,
    #[serde(default)]
    pub only_bank_mfo: bool,
    #[serde(default)]
    pub only_court_orders: bool,
    #[serde(default = "default_true")]
    pub only_active_inn: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_debt: default_min_debt(),
            exclude_bankrupt: true,
            exclude_no_debt: false,
            only_property: false,
            only_bank_mfo: false,
            only_court_orders: false,
            only_active_inn: true,
        }
    }
}

impl ScoringConfig {
    /// Applies the downstream filter flags to an enriched lead.
    pub fn admits(&self, enriched: &EnrichedLead) -> bool {
        if self.exclude_bankrupt && enriched.bankruptcy.is_bankrupt {
            return false;
        }
        if self.exclude_no_debt && enriched.debt.amount <= 0.0 {
            return false;
        }
        if self.only_property && !enriched.property.has_property {
            return false;
        }
        if self.only_bank_mfo && !enriched.debt.debt_type.is_bank_or_mfo() {
            return false;
        }
        if self.only_court_orders && !enriched.court.has_order {
            return false;
        }
        if self.only_active_inn && !enriched.tax.active {
            return false;
        }
        true
    }
}

/// Segmentation bucket assigned by a fixed decision order over raw facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    HighDebtRecentCourt,
    BankOnlyNoProperty,
    TaxDebtWithProperty,
    MultipleCreditors,
    DefaultGroup,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::HighDebtRecentCourt => "high_debt_recent_court",
            Group::BankOnlyNoProperty => "bank_only_no_property",
            Group::TaxDebtWithProperty => "tax_debt_with_property",
            Group::MultipleCreditors => "multiple_creditors",
            Group::DefaultGroup => "default_group",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringResult {
    /// Clamped to `0..=100`.
    pub score: i32,
    /// At most three, in rule evaluation order.
    pub reasons: Vec<String>,
    pub is_target: bool,
    pub group: Group,
}

/// Output record handed to the result sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredLeadRecord {
    pub lead_id: String,
    pub fio: String,
    pub phone: String,
    pub score: i32,
    pub reason_1: String,
    pub reason_2: String,
    pub reason_3: String,
    pub is_target: bool,
    pub group: Group,
}

impl ScoredLeadRecord {
    pub fn new(lead: &Lead, result: &ScoringResult) -> Self {
        let reason = |idx: usize| result.reasons.get(idx).cloned().unwrap_or_default();
        Self {
            lead_id: lead.lead_id.clone(),
            fio: lead.fio.clone(),
            phone: lead.phone.clone().unwrap_or_default(),
            score: result.score,
            reason_1: reason(0),
            reason_2: reason(1),
            reason_3: reason(2),
            is_target: result.is_target,
            group: result.group,
        }
    }
}
