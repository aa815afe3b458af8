//! Token and price accounting.

use serde::{Deserialize, Serialize};

/// One usage record as reported by a model call (or one chunk of it).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Usage {
    /// A record with token counts only.
    pub fn tokens(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Self::default()
        }
    }

    /// Attach a price.
    pub fn priced(mut self, total_price: f64, currency: impl Into<String>) -> Self {
        self.total_price = total_price;
        self.currency = Some(currency.into());
        self
    }
}

/// Running totals across every usage record of a run.
///
/// Records are summed field by field.  The first currency seen is kept;
/// later ones are not checked against it.
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    total: Option<Usage>,
    records: usize,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the totals.
    pub fn add(&mut self, usage: &Usage) {
        self.records += 1;
        let Some(total) = self.total.as_mut() else {
            self.total = Some(usage.clone());
            return;
        };
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
        total.total_price += usage.total_price;
        if total.currency.is_none() {
            total.currency.clone_from(&usage.currency);
        }
    }

    /// Number of records folded in.
    pub fn records(&self) -> usize {
        self.records
    }

    /// The totals; all zero when nothing was recorded.
    pub fn total(&self) -> Usage {
        self.total.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accumulator_reports_zero() {
        let acc = UsageAccumulator::new();
        assert_eq!(acc.total(), Usage::default());
        assert_eq!(acc.records(), 0);
    }

    #[test]
    fn totals_equal_the_sum_of_records() {
        let records = [
            Usage::tokens(10, 5).priced(0.25, "USD"),
            Usage::tokens(3, 0),
            Usage::tokens(20, 7).priced(0.5, "USD"),
        ];
        let mut acc = UsageAccumulator::new();
        for r in &records {
            acc.add(r);
        }

        let total = acc.total();
        assert_eq!(total.prompt_tokens, 33);
        assert_eq!(total.completion_tokens, 12);
        assert_eq!(total.total_tokens, records.iter().map(|r| r.total_tokens).sum::<u64>());
        assert_eq!(total.total_price, 0.75);
        assert_eq!(acc.records(), 3);
    }

    #[test]
    fn first_currency_wins() {
        let mut acc = UsageAccumulator::new();
        acc.add(&Usage::tokens(1, 1));
        acc.add(&Usage::tokens(1, 1).priced(0.5, "EUR"));
        acc.add(&Usage::tokens(1, 1).priced(0.5, "USD"));
        assert_eq!(acc.total().currency.as_deref(), Some("EUR"));
    }
}
