//! Lead scoring.
//!
//! Seven ordered rules each contribute a signed delta and, when nonzero, a
//! reason. Only the first three reasons are kept. The sum is clamped to
//! `0..=100` once every rule has run.

use chrono::{Local, NaiveDate};

use crate::models::{EnrichedLead, Group, ScoringConfig, ScoringResult};

pub const TARGET_THRESHOLD: i32 = 50;
pub const MAX_REASONS: usize = 3;
const LOW_DEBT: f64 = 100_000.0;
const COURT_ORDER_WINDOW_DAYS: i64 = 90;
const HIGH_DEBT_GROUP: f64 = 500_000.0;
const MULTIPLE_CREDITORS_GROUP: f64 = 300_000.0;

/// Scores enriched leads against a fixed evaluation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringEngine {
    as_of: NaiveDate,
}

struct Tally {
    sum: i32,
    reasons: Vec<String>,
}

impl Tally {
    fn add(&mut self, delta: i32, reason: impl Into<String>) {
        if delta == 0 {
            return;
        }
        self.sum += delta;
        if self.reasons.len() < MAX_REASONS {
            self.reasons.push(reason.into());
        }
    }
}

impl ScoringEngine {
    pub fn new(as_of: NaiveDate) -> Self {
        Self { as_of }
    }

    pub fn today() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn score(&self, lead: &EnrichedLead, config: &ScoringConfig) -> ScoringResult {
        let mut tally = Tally {
            sum: 0,
            reasons: Vec::with_capacity(MAX_REASONS),
        };

        // 1. Debt amount
        let debt = lead.debt.amount;
        if debt > config.min_debt as f64 {
            tally.add(30, format!("Сумма долга > {} руб", group_thousands(config.min_debt)));
        } else if debt < LOW_DEBT {
            tally.add(-15, "Долг < 100,000 руб");
        }

        // 2. Debt type
        if lead.debt.debt_type.is_bank_or_mfo() {
            tally.add(20, "Долг от банка/МФО");
        } else if lead.debt.debt_type.is_tax_or_utility() {
            tally.add(-10, "Налоговые/ЖКХ долги");
        }

        // 3. Property
        if !lead.property.has_property {
            tally.add(10, "Нет имущества");
        }

        // 4. Court order
        if lead.court.has_order && self.order_is_recent(lead.court.order_date.as_deref()) {
            tally.add(15, "Судебный приказ (последние 3 мес)");
        }

        // 5. Bankruptcy
        if lead.bankruptcy.is_bankrupt {
            tally.add(-100, "Признан банкротом");
        } else {
            tally.add(10, "Нет признаков банкротства");
        }

        // 6. Tax-id status
        if lead.tax.active {
            tally.add(5, "Активный ИНН");
        } else {
            tally.add(-100, "Неактивный ИНН");
        }

        // 7. Multiple debts
        if lead.debt.count > 2 {
            tally.add(5, "Множественные долги");
        }

        let score = tally.sum.clamp(0, 100);
        ScoringResult {
            score,
            reasons: tally.reasons,
            is_target: score >= TARGET_THRESHOLD,
            group: classify_group(lead),
        }
    }

    /// An order counts when `0 <= age < 90` days. Future or unparseable
    /// dates never count. ISO datetimes are judged by their date part.
    fn order_is_recent(&self, order_date: Option<&str>) -> bool {
        let Some(date) = order_date.and_then(parse_order_date) else {
            return false;
        };
        let age = (self.as_of - date).num_days();
        (0..COURT_ORDER_WINDOW_DAYS).contains(&age)
    }
}

fn parse_order_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().split(['T', ' ']).next()?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// First matching group wins. Evaluated over raw facts, never the score.
pub fn classify_group(lead: &EnrichedLead) -> Group {
    let debt = lead.debt.amount;
    let debt_type = &lead.debt.debt_type;
    let has_property = lead.property.has_property;

    if debt > HIGH_DEBT_GROUP && lead.court.has_order {
        Group::HighDebtRecentCourt
    } else if debt_type.is_bank_or_mfo() && !has_property {
        Group::BankOnlyNoProperty
    } else if debt_type.is_tax_or_utility() && has_property {
        Group::TaxDebtWithProperty
    } else if debt > MULTIPLE_CREDITORS_GROUP && !debt_type.is_tax_or_utility() {
        Group::MultipleCreditors
    } else {
        Group::DefaultGroup
    }
}

/// `250000` -> `250,000`.
fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DebtType, Lead};

    fn engine() -> ScoringEngine {
        ScoringEngine::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn enriched() -> EnrichedLead {
        EnrichedLead::new(Lead {
            lead_id: "L-1".to_string(),
            fio: "Сидоров Сидор Сидорович".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(250_000), "250,000");
        assert_eq!(group_thousands(1_000_000), "1,000,000");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(-1500), "-1,500");
    }

    #[test]
    fn test_court_window_boundaries() {
        let engine = engine();
        assert!(engine.order_is_recent(Some("2024-06-01")));
        // 89 and 90 days before 2024-06-01
        assert!(engine.order_is_recent(Some("2024-03-04")));
        assert!(!engine.order_is_recent(Some("2024-03-03")));
        assert!(!engine.order_is_recent(Some("2024-06-02")));
        assert!(!engine.order_is_recent(Some("01.05.2024")));
        assert!(!engine.order_is_recent(None));
    }

    #[test]
    fn test_court_window_accepts_datetimes() {
        let engine = engine();
        assert!(engine.order_is_recent(Some("2024-05-20T10:30:00")));
        assert!(engine.order_is_recent(Some("2024-05-20T10:30:00+03:00")));
        assert!(engine.order_is_recent(Some("2024-05-20 10:30:00")));
        assert!(!engine.order_is_recent(Some("2024-03-03T23:59:59")));
        assert!(!engine.order_is_recent(Some("T10:30:00")));
    }

    #[test]
    fn test_min_debt_threshold_is_strict() {
        let mut lead = enriched();
        lead.debt.amount = 250_000.0;
        lead.debt.debt_type = DebtType::Other("alimony".to_string());
        let result = engine().score(&lead, &ScoringConfig::default());
        // no debt delta, no type delta: property +10, bankruptcy +10, inn +5
        assert_eq!(result.score, 25);
        assert_eq!(
            result.reasons,
            vec!["Нет имущества", "Нет признаков банкротства", "Активный ИНН"]
        );
    }

    #[test]
    fn test_custom_min_debt_in_reason() {
        let mut lead = enriched();
        lead.debt.amount = 150_000.0;
        let config = ScoringConfig {
            min_debt: 100_000,
            ..Default::default()
        };
        let result = engine().score(&lead, &config);
        assert_eq!(result.reasons[0], "Сумма долга > 100,000 руб");
    }
}
