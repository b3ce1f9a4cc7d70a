//! Progressive income tax with capped reliefs.
//!
//! Everything here is pure `Decimal` arithmetic: the same inputs always give
//! the same outputs, down to the last digit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relief name that carries a statutory ceiling by default
pub const RENT_RELIEF: &str = "rent";

/// Ceiling on rent relief
pub const MAX_RENT_RELIEF: Decimal = Decimal::from_parts(500_000, 0, 0, false, 0);

/// Share of gross income granted as automatic rent relief (20%)
pub const RENT_RELIEF_RATE: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;
const MONTHS: Decimal = Decimal::from_parts(12, 0, 0, false, 0);

/// One band of a progressive schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBracket {
    /// Income where the band starts
    pub lower_bound: Decimal,
    /// Income where the band ends; `None` for the open top band
    pub upper_bound: Option<Decimal>,
    /// Fraction of in-band income owed, e.g. `0.15`
    pub rate: Decimal,
    /// Label for breakdowns; generated from the bounds when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaxBracket {
    /// Unlabelled band
    #[must_use]
    pub const fn new(lower_bound: Decimal, upper_bound: Option<Decimal>, rate: Decimal) -> Self {
        Self {
            lower_bound,
            upper_bound,
            rate,
            description: None,
        }
    }

    /// Attaches a label
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The label, or one derived from bounds and rate
    #[must_use]
    pub fn describe(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        let percent = (self.rate * HUNDRED).normalize();
        match self.upper_bound {
            Some(upper) => format!("{} - {} at {percent}%", self.lower_bound, upper),
            None => format!("{} and above at {percent}%", self.lower_bound),
        }
    }
}

/// What one band contributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketBreakdown {
    /// Band label
    pub description: String,
    /// Income taxed in this band
    pub taxable_in_bracket: Decimal,
    /// Tax owed on it
    pub tax_in_bracket: Decimal,
    /// Band rate
    pub rate: Decimal,
}

/// Full result of a calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxCalculation {
    /// Income before reliefs
    pub gross_income: Decimal,
    /// Sum of reliefs after caps
    pub total_reliefs: Decimal,
    /// `max(0, gross - reliefs)`
    pub taxable_income: Decimal,
    /// Sum over all bands
    pub net_tax: Decimal,
    /// `net_tax / gross * 100`, two decimal places; zero for zero income
    pub effective_rate: Decimal,
    /// One entry per band, in ascending order
    pub breakdown_by_bracket: Vec<BracketBreakdown>,
}

/// Ceilings applied to named reliefs before they are summed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliefPolicy {
    caps: BTreeMap<String, Decimal>,
}

impl Default for ReliefPolicy {
    fn default() -> Self {
        Self::uncapped().with_cap(RENT_RELIEF, MAX_RENT_RELIEF)
    }
}

impl ReliefPolicy {
    /// Policy with no ceilings at all
    #[must_use]
    pub const fn uncapped() -> Self {
        Self {
            caps: BTreeMap::new(),
        }
    }

    /// Adds or replaces the ceiling for `name`
    #[must_use]
    pub fn with_cap(mut self, name: impl Into<String>, cap: Decimal) -> Self {
        self.caps.insert(name.into(), cap);
        self
    }

    /// A claimed relief after its ceiling. Negative claims count as zero.
    #[must_use]
    pub fn capped(&self, name: &str, amount: Decimal) -> Decimal {
        let amount = amount.max(Decimal::ZERO);
        self.caps.get(name).map_or(amount, |cap| amount.min(*cap))
    }

    /// Runs the progressive schedule over `gross_income` less capped reliefs.
    ///
    /// Bands are applied in ascending order of `lower_bound` whatever order
    /// they are passed in.
    #[must_use]
    pub fn calculate(
        &self,
        gross_income: Decimal,
        reliefs: &BTreeMap<String, Decimal>,
        brackets: &[TaxBracket],
    ) -> TaxCalculation {
        let total_reliefs: Decimal = reliefs
            .iter()
            .map(|(name, amount)| self.capped(name, *amount))
            .sum();
        let taxable_income = (gross_income - total_reliefs).max(Decimal::ZERO);

        let mut ordered: Vec<&TaxBracket> = brackets.iter().collect();
        ordered.sort_by(|a, b| a.lower_bound.cmp(&b.lower_bound));

        let mut net_tax = Decimal::ZERO;
        let mut breakdown_by_bracket = Vec::with_capacity(ordered.len());
        for bracket in ordered {
            let top = bracket
                .upper_bound
                .map_or(taxable_income, |upper| taxable_income.min(upper));
            let taxable_in_bracket = (top - bracket.lower_bound).max(Decimal::ZERO);
            let tax_in_bracket = taxable_in_bracket * bracket.rate;
            net_tax += tax_in_bracket;
            breakdown_by_bracket.push(BracketBreakdown {
                description: bracket.describe(),
                taxable_in_bracket,
                tax_in_bracket,
                rate: bracket.rate,
            });
        }

        let effective_rate = if gross_income > Decimal::ZERO {
            (net_tax / gross_income * HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };

        TaxCalculation {
            gross_income,
            total_reliefs,
            taxable_income,
            net_tax,
            effective_rate,
            breakdown_by_bracket,
        }
    }
}

/// [`ReliefPolicy::calculate`] with the default ceilings.
#[must_use]
pub fn calculate(
    gross_income: Decimal,
    reliefs: &BTreeMap<String, Decimal>,
    brackets: &[TaxBracket],
) -> TaxCalculation {
    ReliefPolicy::default().calculate(gross_income, reliefs, brackets)
}

/// Rent relief granted without a claim: 20% of gross, at most the ceiling.
#[must_use]
pub fn automatic_rent_relief(gross_income: Decimal) -> Decimal {
    (gross_income * RENT_RELIEF_RATE)
        .max(Decimal::ZERO)
        .min(MAX_RENT_RELIEF)
}

/// Annual projection from a monthly income
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualTaxEstimate {
    /// Input monthly income
    pub monthly_income: Decimal,
    /// Twelve months of it
    pub annual_income: Decimal,
    /// Tax on the annual income with automatic rent relief
    pub annual_tax: Decimal,
    /// Annual tax spread over twelve months, two decimal places
    pub monthly_tax: Decimal,
    /// Monthly income minus monthly tax, two decimal places
    pub monthly_take_home: Decimal,
}

/// Projects a year of tax from one month's income.
#[must_use]
pub fn estimate_annual_tax(monthly_income: Decimal, brackets: &[TaxBracket]) -> AnnualTaxEstimate {
    let annual_income = monthly_income * MONTHS;
    let reliefs = BTreeMap::from([(
        RENT_RELIEF.to_string(),
        automatic_rent_relief(annual_income),
    )]);
    let calculation = calculate(annual_income, &reliefs, brackets);
    let monthly_tax = (calculation.net_tax / MONTHS).round_dp(2);

    AnnualTaxEstimate {
        monthly_income,
        annual_income,
        annual_tax: calculation.net_tax,
        monthly_tax,
        monthly_take_home: (monthly_income - monthly_tax).round_dp(2),
    }
}

/// PAYE schedule effective 1 January 2026.
#[must_use]
pub fn nigeria_2026_brackets() -> Vec<TaxBracket> {
    let naira = |n: i64| Decimal::new(n, 0);
    let rate = |percent: i64| Decimal::new(percent, 2);
    vec![
        TaxBracket::new(naira(0), Some(naira(800_000)), rate(0))
            .with_description("₦0 - ₦800,000 at 0% (Tax-Free)"),
        TaxBracket::new(naira(800_000), Some(naira(3_200_000)), rate(15))
            .with_description("₦800,001 - ₦3,200,000 at 15%"),
        TaxBracket::new(naira(3_200_000), Some(naira(6_400_000)), rate(18))
            .with_description("₦3,200,001 - ₦6,400,000 at 18%"),
        TaxBracket::new(naira(6_400_000), Some(naira(12_800_000)), rate(21))
            .with_description("₦6,400,001 - ₦12,800,000 at 21%"),
        TaxBracket::new(naira(12_800_000), Some(naira(50_000_000)), rate(23))
            .with_description("₦12,800,001 - ₦50,000,000 at 23%"),
        TaxBracket::new(naira(50_000_000), None, rate(25))
            .with_description("₦50,000,001 and above at 25%"),
    ]
}
