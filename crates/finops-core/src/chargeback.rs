//! Tag-based chargeback allocation.
//!
//! Tagged spend lands directly on its cost center. The untagged pool is
//! handed out by shared-cost rules, parked on a named pool center, or split
//! proportionally to direct spend, in that order of preference.

use crate::calculator::Calculator;
use crate::config::ChargebackConfig;
use crate::data_structures::{Allocation, CostRecord};
use crate::error::{FinopsError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct ChargebackAllocator {
    config: ChargebackConfig,
    calculator: Calculator,
}

impl ChargebackAllocator {
    /// Rejects shared-cost rules that could never add up.
    pub fn new(config: ChargebackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            calculator: Calculator::new(),
        })
    }

    pub fn config(&self) -> &ChargebackConfig {
        &self.config
    }

    pub fn cost_center_for<'r>(&self, record: &'r CostRecord) -> Option<&'r str> {
        record
            .tag(&self.config.primary_tag)
            .or_else(|| record.tag(&self.config.fallback_tag))
    }

    pub fn allocate(&self, records: &[CostRecord]) -> Allocations {
        let mut allocations: HashMap<String, Allocation> = HashMap::new();
        let mut untagged: Vec<&CostRecord> = Vec::new();

        for record in records {
            match self.cost_center_for(record) {
                Some(cost_center) => allocations
                    .entry(cost_center.to_string())
                    .or_insert_with(|| Allocation::new(cost_center))
                    .add_direct(record),
                None => untagged.push(record),
            }
        }

        let grand_total = records.iter().map(CostRecord::cost).sum();
        let untagged_total: f64 = untagged.iter().map(|record| record.cost()).sum();
        let unallocated = self.allocate_untagged(&mut allocations, &untagged, untagged_total);

        info!(
            records = records.len(),
            cost_centers = allocations.len(),
            untagged_records = untagged.len(),
            untagged_total,
            "Chargeback allocation complete"
        );

        Allocations {
            allocations,
            grand_total,
            untagged_total,
            unallocated,
        }
    }

    /// Returns whatever could not be placed anywhere.
    fn allocate_untagged(
        &self,
        allocations: &mut HashMap<String, Allocation>,
        untagged: &[&CostRecord],
        pool: f64,
    ) -> f64 {
        if untagged.is_empty() {
            return 0.0;
        }

        if !self.config.shared_cost_split.is_empty() {
            for rule in &self.config.shared_cost_split {
                allocations
                    .entry(rule.cost_center.clone())
                    .or_insert_with(|| Allocation::new(rule.cost_center.as_str()))
                    .add_allocated(pool * rule.percentage / 100.0);
            }

            let remaining_pct = 100.0 - self.config.shared_percentage();
            if remaining_pct > 0.0 {
                return self.distribute_proportionally(allocations, pool * remaining_pct / 100.0);
            }
            return 0.0;
        }

        if let Some(pool_center) = self.untagged_pool() {
            let center = allocations
                .entry(pool_center.to_string())
                .or_insert_with(|| Allocation::new(pool_center));
            for record in untagged {
                center.absorb_untagged(record);
            }
            debug!(cost_center = pool_center, amount = pool, "Untagged pool assigned");
            return 0.0;
        }

        self.distribute_proportionally(allocations, pool)
    }

    fn untagged_pool(&self) -> Option<&str> {
        self.config
            .untagged_pool
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    fn distribute_proportionally(
        &self,
        allocations: &mut HashMap<String, Allocation>,
        amount: f64,
    ) -> f64 {
        let total_direct: f64 = allocations.values().map(Allocation::direct_cost).sum();

        let mut placed = false;
        for allocation in allocations.values_mut() {
            if let Some(share) = self.calculator.calculate_proportional_share(
                amount,
                allocation.direct_cost(),
                total_direct,
            ) {
                allocation.add_allocated(share);
                placed = true;
            }
        }

        if placed {
            0.0
        } else {
            warn!(amount, "No direct spend to weight against, shared cost left unallocated");
            amount
        }
    }
}

/// Output of one allocation run.
#[derive(Debug, Clone, Serialize)]
pub struct Allocations {
    allocations: HashMap<String, Allocation>,
    grand_total: f64,
    untagged_total: f64,
    unallocated: f64,
}

impl Allocations {
    pub fn get(&self, cost_center: &str) -> Option<&Allocation> {
        self.allocations.get(cost_center)
    }

    pub fn allocations(&self) -> &HashMap<String, Allocation> {
        &self.allocations
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Sum of every input record's cost.
    pub fn grand_total(&self) -> f64 {
        self.grand_total
    }

    pub fn untagged_total(&self) -> f64 {
        self.untagged_total
    }

    /// Untagged spend that had no cost center to land on.
    pub fn unallocated(&self) -> f64 {
        self.unallocated
    }

    pub fn allocated_total(&self) -> f64 {
        self.allocations.values().map(Allocation::total_cost).sum()
    }

    pub fn into_report(self, period: impl Into<String>) -> ChargebackReport {
        ChargebackReport::new(self, period, Utc::now())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargebackReport {
    period: String,
    allocations: Vec<Allocation>,
    total_cost: f64,
    unallocated: f64,
    generated_at: DateTime<Utc>,
}

impl ChargebackReport {
    pub fn new(
        allocations: Allocations,
        period: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut sorted: Vec<Allocation> = allocations.allocations.into_values().collect();
        sorted.sort_by(|a, b| {
            b.total_cost()
                .total_cmp(&a.total_cost())
                .then_with(|| a.cost_center().cmp(b.cost_center()))
        });

        Self {
            period: period.into(),
            allocations: sorted,
            total_cost: allocations.grand_total,
            unallocated: allocations.unallocated,
            generated_at,
        }
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    /// Largest cost center first.
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// The TOTAL row: every input dollar, allocated or not.
    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn unallocated(&self) -> f64 {
        self.unallocated
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    fn share_of_total(&self, cost: f64) -> f64 {
        if self.total_cost == 0.0 {
            0.0
        } else {
            cost / self.total_cost * 100.0
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record([
            "Cost Center",
            "Total Cost",
            "Direct Cost",
            "Allocated Cost",
            "AWS",
            "Azure",
            "GCP",
            "% of Total",
        ])?;

        for allocation in &self.allocations {
            let cloud = |name: &str| allocation.by_cloud().get(name).copied().unwrap_or(0.0);
            out.write_record([
                allocation.cost_center().to_string(),
                format!("{:.2}", allocation.total_cost()),
                format!("{:.2}", allocation.direct_cost()),
                format!("{:.2}", allocation.allocated_cost()),
                format!("{:.2}", cloud("aws")),
                format!("{:.2}", cloud("azure")),
                format!("{:.2}", cloud("gcp")),
                format!("{:.1}%", self.share_of_total(allocation.total_cost())),
            ])?;
        }

        if self.unallocated != 0.0 {
            out.write_record([
                "UNALLOCATED".to_string(),
                format!("{:.2}", self.unallocated),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                format!("{:.1}%", self.share_of_total(self.unallocated)),
            ])?;
        }

        out.write_record([
            "TOTAL".to_string(),
            format!("{:.2}", self.total_cost),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            "100.0%".to_string(),
        ])?;

        out.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(&path).map_err(|e| FinopsError::io(&path, e))?;
        self.write_csv(file)
    }
}
