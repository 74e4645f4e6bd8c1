//! Payment-ledger rules: billing months, horizon expansion and the
//! pending/late classification. Everything here is pure so the ledger
//! behavior can be tested without a database.

use chrono::{Datelike, NaiveDate};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AppError;
use crate::models::{Payment, PaymentStatus};

/// A billing month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::Validation(format!(
                "Month out of range: {}",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        if s.len() != 7 {
            return Err(AppError::Validation(format!("Invalid month '{}'", s)));
        }
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| AppError::Validation(format!("Invalid month '{}'", s)))?;
        let year: i32 = year
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid month '{}'", s)))?;
        let month: u32 = month
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid month '{}'", s)))?;
        Self::new(year, month)
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(self) -> NaiveDate {
        // Fields are range-checked on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("valid month")
    }

    pub fn last_day(self) -> NaiveDate {
        self.succ().first_day().pred_opt().expect("valid date")
    }
}

impl Default for Month {
    fn default() -> Self {
        Self {
            year: 1970,
            month: 1,
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Month::parse(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// The months a student is billed for when enrolling on `start`:
/// `start`'s month plus `horizon - 1` following months.
pub fn billing_months(start: NaiveDate, horizon: u32) -> Vec<Month> {
    let mut months = Vec::with_capacity(horizon as usize);
    let mut current = Month::of(start);
    for _ in 0..horizon {
        months.push(current);
        current = current.succ();
    }
    months
}

/// Derive the reported status of a payment row. An unpaid row turns `late`
/// once its month has fully elapsed; `paid` is final.
pub fn classify(stored: PaymentStatus, month: Month, today: NaiveDate) -> PaymentStatus {
    match stored {
        PaymentStatus::Paid => PaymentStatus::Paid,
        _ if today > month.last_day() => PaymentStatus::Late,
        _ => PaymentStatus::Pending,
    }
}

/// Paid and outstanding totals for one ledger month.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyFinancials {
    pub month: Month,
    pub paid_amount: i64,
    pub paid_count: u32,
    pub outstanding_amount: i64,
    pub outstanding_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialReport {
    pub months: Vec<MonthlyFinancials>,
    pub total_paid: i64,
    pub total_outstanding: i64,
}

/// Roll the ledger up into per-month paid/outstanding totals. Outstanding
/// covers both pending and late rows; months come back in order.
pub fn aggregate_financials(payments: &[Payment]) -> FinancialReport {
    let mut by_month: BTreeMap<Month, MonthlyFinancials> = BTreeMap::new();

    for payment in payments {
        let entry = by_month
            .entry(payment.month)
            .or_insert_with(|| MonthlyFinancials {
                month: payment.month,
                paid_amount: 0,
                paid_count: 0,
                outstanding_amount: 0,
                outstanding_count: 0,
            });
        if payment.status == PaymentStatus::Paid {
            entry.paid_amount += payment.amount;
            entry.paid_count += 1;
        } else {
            entry.outstanding_amount += payment.amount;
            entry.outstanding_count += 1;
        }
    }

    let total_paid = by_month.values().map(|m| m.paid_amount).sum();
    let total_outstanding = by_month.values().map(|m| m.outstanding_amount).sum();

    FinancialReport {
        months: by_month.into_values().collect(),
        total_paid,
        total_outstanding,
    }
}

/// Runtime billing knobs, loaded once at startup and managed by Rocket.
#[derive(Debug, Clone, Copy)]
pub struct BillingConfig {
    pub horizon_months: u32,
}

impl BillingConfig {
    pub const DEFAULT_HORIZON_MONTHS: u32 = 12;

    pub fn from_env() -> Self {
        let horizon_months = std::env::var("BILLING_HORIZON_MONTHS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(Self::DEFAULT_HORIZON_MONTHS);
        Self { horizon_months }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            horizon_months: Self::DEFAULT_HORIZON_MONTHS,
        }
    }
}
