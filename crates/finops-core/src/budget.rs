use crate::calculator::Calculator;
use crate::config::Budget;
use crate::data_structures::{AggregationResult, BudgetAlert};
use crate::error::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Compares aggregated spend against configured budgets.
pub struct BudgetChecker {
    budgets: Vec<Budget>,
    calculator: Calculator,
}

impl BudgetChecker {
    pub fn new(budgets: Vec<Budget>) -> Result<Self> {
        for budget in &budgets {
            budget.validate()?;
        }

        Ok(Self {
            budgets,
            calculator: Calculator::new(),
        })
    }

    pub fn budgets(&self) -> &[Budget] {
        &self.budgets
    }

    pub fn check(&self, result: &AggregationResult) -> Vec<BudgetAlert> {
        self.check_at(result, Utc::now())
    }

    /// At most one alert per budget: the first configured threshold the
    /// spend has reached.
    pub fn check_at(&self, result: &AggregationResult, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        let mut alerts = Vec::new();

        for budget in &self.budgets {
            let spend = self.current_spend(budget, result);
            let percent_used = self
                .calculator
                .calculate_percent_used(spend, budget.monthly_limit);

            let Some(threshold) = budget
                .alert_at_percentages
                .iter()
                .copied()
                .find(|threshold| percent_used >= *threshold)
            else {
                debug!(budget = %budget.name, spend, percent_used, "Budget within limits");
                continue;
            };

            info!(
                budget = %budget.name,
                spend,
                limit = budget.monthly_limit,
                percent_used,
                threshold,
                "Budget threshold crossed"
            );

            alerts.push(BudgetAlert::new(
                budget.name.clone(),
                budget.provider().map(str::to_string),
                budget.scope().map(str::to_string),
                budget.monthly_limit,
                spend,
                percent_used,
                threshold,
                now,
            ));
        }

        alerts
    }

    /// Scope narrows to one account; a provider filter alongside it narrows
    /// to that account as seen by that provider.
    pub fn current_spend(&self, budget: &Budget, result: &AggregationResult) -> f64 {
        match (budget.provider(), budget.scope()) {
            (Some(provider), Some(scope)) => result.provider_account_cost(provider, scope),
            (None, Some(scope)) => result.by_account().get(scope).copied().unwrap_or(0.0),
            (Some(provider), None) => result.by_provider().get(provider).copied().unwrap_or(0.0),
            (None, None) => result.total_cost(),
        }
    }
}
