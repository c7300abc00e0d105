//! Monthly recurring revenue bookkeeping. Amounts are whole cents.

pub const DEFAULT_CURRENCY: &str = "USD";

/// Milestones in cents, ascending.
pub const MRR_MILESTONES: [i64; 9] = [
    10_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000, 5_000_000, 10_000_000,
];

/// Upper-cased currency code, [`DEFAULT_CURRENCY`] when blank.
pub fn normalize_currency(currency: Option<&str>) -> String {
    currency
        .map(str::trim)
        .filter(|currency| !currency.is_empty())
        .map(str::to_uppercase)
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

/// Highest milestone `amount` reaches above `last_reached`, if any.
pub fn new_milestone(amount: i64, last_reached: i64) -> Option<i64> {
    MRR_MILESTONES
        .iter()
        .copied()
        .filter(|milestone| amount >= *milestone && *milestone > last_reached)
        .max()
}

pub fn milestones_hit(amount: i64) -> usize {
    MRR_MILESTONES
        .iter()
        .filter(|milestone| amount >= **milestone)
        .count()
}

pub fn next_milestone(amount: i64) -> Option<i64> {
    MRR_MILESTONES
        .iter()
        .copied()
        .find(|milestone| amount < *milestone)
}

/// Percent change from `previous` to `current`; zero without a baseline.
pub fn growth_percent(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    (current - previous) as f64 / previous as f64 * 100.0
}

/// `$500`, `$25K`.
pub fn format_milestone(cents: i64) -> String {
    let dollars = cents / 100;
    if dollars >= 1000 {
        format!("${}K", dollars / 1000)
    } else {
        format!("${dollars}")
    }
}

/// `1234.50 USD`.
pub fn format_amount(cents: i64, currency: &str) -> String {
    format!("{}.{:02} {currency}", cents / 100, (cents % 100).abs())
}
