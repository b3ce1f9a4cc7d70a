//! Budget utilization and financial health scoring over local records.

use crate::models::{Budget, Transaction};
use chrono::NaiveDate;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// How close a budget is to its limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    /// Under 75%
    Healthy,
    /// 75% or more
    Warning,
    /// 90% or more
    Critical,
    /// At or over the limit
    Exceeded,
}

impl BudgetStatus {
    /// Status for a utilization percentage
    #[must_use]
    pub fn from_percentage(utilization: Decimal) -> Self {
        if utilization >= Decimal::from(100) {
            Self::Exceeded
        } else if utilization >= Decimal::from(90) {
            Self::Critical
        } else if utilization >= Decimal::from(75) {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

/// Spending against one budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUtilization {
    /// Remote id of the budget, when known
    pub budget_id: Option<i64>,
    /// Display title
    pub title: Option<String>,
    /// Category the budget covers
    pub category_id: Option<i64>,
    /// Limit
    pub limit: Decimal,
    /// Spent so far
    pub current: Decimal,
    /// `limit - current`; negative once exceeded
    pub remaining: Decimal,
    /// `current / limit * 100`, two decimal places; zero for a non-positive limit
    pub utilization_percentage: Decimal,
    /// Threshold bucket
    pub status: BudgetStatus,
    /// Period start
    pub start_date: NaiveDate,
    /// Period end
    pub end_date: NaiveDate,
}

/// Utilization of every budget, most-used first.
#[must_use]
pub fn budget_utilization(budgets: &[Budget]) -> Vec<BudgetUtilization> {
    let mut rows: Vec<BudgetUtilization> = budgets
        .iter()
        .map(|budget| {
            let utilization = if budget.amount > Decimal::ZERO {
                (budget.current_amount / budget.amount * HUNDRED).round_dp(2)
            } else {
                Decimal::ZERO
            };
            BudgetUtilization {
                budget_id: budget.id,
                title: budget.title.clone(),
                category_id: budget.category_id,
                limit: budget.amount.round_dp(2),
                current: budget.current_amount.round_dp(2),
                remaining: (budget.amount - budget.current_amount).round_dp(2),
                utilization_percentage: utilization,
                status: BudgetStatus::from_percentage(utilization),
                start_date: budget.start_date,
                end_date: budget.end_date,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.utilization_percentage.cmp(&a.utilization_percentage));
    rows
}

/// Money in and out over a period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeSummary {
    /// Sum of positive amounts
    pub total_income: Decimal,
    /// Sum of the magnitudes of negative amounts
    pub total_expenses: Decimal,
    /// Income minus expenses
    pub net_savings: Decimal,
    /// Net savings as a percentage of income, two decimal places
    pub savings_rate: Decimal,
}

/// Totals transactions starting within `[start, end]`. Positive amounts are
/// income, negative amounts are expenses.
#[must_use]
pub fn income_vs_expenses(
    transactions: &[Transaction],
    start: NaiveDate,
    end: NaiveDate,
) -> IncomeSummary {
    let (income, expenses) = transactions
        .iter()
        .filter(|tx| tx.start_date >= start && tx.start_date <= end)
        .fold((Decimal::ZERO, Decimal::ZERO), |(income, expenses), tx| {
            if tx.amount > Decimal::ZERO {
                (income + tx.amount, expenses)
            } else {
                (income, expenses + tx.amount.abs())
            }
        });

    let net_savings = income - expenses;
    let savings_rate = if income > Decimal::ZERO {
        (net_savings / income * HUNDRED).round_dp(2)
    } else {
        Decimal::ZERO
    };

    IncomeSummary {
        total_income: income.round_dp(2),
        total_expenses: expenses.round_dp(2),
        net_savings: net_savings.round_dp(2),
        savings_rate,
    }
}

/// Letter grade of a health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    /// 90 and above
    A,
    /// 80 and above
    B,
    /// 70 and above
    C,
    /// 60 and above
    D,
    /// Below 60
    F,
}

impl Grade {
    /// Grade for a 0-100 score
    #[must_use]
    pub const fn from_score(score: u32) -> Self {
        match score {
            90.. => Self::A,
            80..=89 => Self::B,
            70..=79 => Self::C,
            60..=69 => Self::D,
            _ => Self::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}

/// 0-100 financial health score and what went into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthScore {
    /// Sum of the components
    pub total_score: u32,
    /// Letter grade
    pub grade: Grade,
    /// Savings rate component, out of 40
    pub savings_score: u32,
    /// Budget adherence component, out of 30
    pub budget_score: u32,
    /// Spending consistency component, out of 20
    pub spending_score: u32,
    /// Emergency fund component, out of 10
    pub emergency_score: u32,
    /// Suggestions, most important first
    pub recommendations: Vec<String>,
}

/// Spending consistency is not measured yet; every user gets this score.
const SPENDING_CONSISTENCY_SCORE: u32 = 15;

/// Scores a savings rate (percent) and budget utilization.
#[must_use]
pub fn financial_health_score(savings_rate: Decimal, budgets: &[BudgetUtilization]) -> HealthScore {
    let savings_score = if savings_rate >= Decimal::from(20) {
        40
    } else if savings_rate >= Decimal::from(10) {
        30
    } else if savings_rate >= Decimal::from(5) {
        20
    } else if savings_rate > Decimal::ZERO {
        10
    } else {
        0
    };

    let count = |status: BudgetStatus| {
        u32::try_from(budgets.iter().filter(|b| b.status == status).count()).unwrap_or(u32::MAX)
    };
    let exceeded = count(BudgetStatus::Exceeded);
    let critical = count(BudgetStatus::Critical);
    let warning = count(BudgetStatus::Warning);

    let budget_score = if budgets.is_empty() {
        15
    } else if exceeded > 0 {
        20_u32.saturating_sub(exceeded.saturating_mul(5))
    } else if critical > 0 {
        25_u32.saturating_sub(critical.saturating_mul(5))
    } else {
        30
    };

    let emergency_score = (savings_rate / Decimal::from(2))
        .trunc()
        .to_u32()
        .unwrap_or(0)
        .min(10);

    let total_score = savings_score + budget_score + SPENDING_CONSISTENCY_SCORE + emergency_score;

    let mut recommendations = Vec::new();
    if savings_rate < Decimal::from(10) {
        recommendations.push("Try to save at least 10% of your income each month".to_string());
    } else if savings_rate < Decimal::from(20) {
        recommendations.push(
            "Great progress! Aim for 20% savings rate for optimal financial health".to_string(),
        );
    }
    if exceeded > 0 {
        recommendations.push(format!(
            "You've exceeded {exceeded} budget(s). Review your spending in these categories"
        ));
    }
    if critical + warning > 0 {
        recommendations.push(format!(
            "{} budget(s) are approaching their limit. Consider reducing discretionary spending",
            critical + warning
        ));
    }
    if total_score < 70 {
        recommendations
            .push("Consider creating a detailed monthly budget to track expenses better".to_string());
        recommendations.push("Look for areas to reduce unnecessary spending".to_string());
    }
    if budgets.is_empty() {
        recommendations.push(
            "Create budgets for your major spending categories to better control expenses"
                .to_string(),
        );
    }

    HealthScore {
        total_score,
        grade: Grade::from_score(total_score),
        savings_score,
        budget_score,
        spending_score: SPENDING_CONSISTENCY_SCORE,
        emergency_score,
        recommendations,
    }
}
