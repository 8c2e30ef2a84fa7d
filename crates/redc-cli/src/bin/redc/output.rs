//! Output formatting for CLI responses.
//!
//! Supports both human-readable and JSON output formats for
//! integration with scripts and other tools.

use std::fmt::Write as _;

use redc_compose::ComposePlan;
use redc_compose::DownReport;
use redc_compose::UpReport;
use redc_cost::CostEstimate;

/// Trait for types that can be output in multiple formats.
pub trait Outputable {
    /// Convert to JSON value for structured output.
    fn to_json(&self) -> serde_json::Value;

    /// Convert to human-readable string.
    fn to_human(&self) -> String;
}

/// Print a value in the appropriate format.
pub fn print_output<T: Outputable>(value: &T, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&value.to_json())
                .unwrap_or_else(|e| { format!("{{\"error\": \"failed to serialize: {}\"}}", e) })
        );
    } else {
        println!("{}", value.to_human());
    }
}

impl Outputable for UpReport {
    fn to_json(&self) -> serde_json::Value {
        let setup: Vec<serde_json::Value> = self
            .setup
            .iter()
            .map(|task| {
                serde_json::json!({
                    "name": task.name,
                    "service": task.service,
                    "outputs": task.outputs
                })
            })
            .collect();
        serde_json::json!({
            "deployed": self.deployed,
            "setup": setup,
            "setup_summary": {
                "skipped_tasks": self.setup_summary.skipped_tasks,
                "succeeded": self.setup_summary.succeeded,
                "failed": self.setup_summary.failed
            }
        })
    }

    fn to_human(&self) -> String {
        let mut out = format!("Deployed {} service instance(s)", self.deployed.len());
        for name in &self.deployed {
            let _ = write!(out, "\n  - {name}");
        }
        if !self.setup.is_empty() {
            let _ = write!(
                out,
                "\nSetup: {} succeeded, {} failed, {} skipped",
                self.setup_summary.succeeded, self.setup_summary.failed, self.setup_summary.skipped_tasks
            );
            for task in self.setup.iter().filter(|t| !t.outputs.is_empty()) {
                let _ = write!(out, "\n[{}] {}", task.name, task.outputs);
            }
        }
        out
    }
}

impl Outputable for DownReport {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "found": self.found,
            "destroyed": self.destroyed
        })
    }

    fn to_human(&self) -> String {
        if self.found == 0 {
            return "No deployed service instances found".to_string();
        }
        let mut out = format!("Destroyed {} of {} service instance(s)", self.destroyed.len(), self.found);
        for name in &self.destroyed {
            let _ = write!(out, "\n  - {name}");
        }
        out
    }
}

impl Outputable for ComposePlan {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }

    fn to_human(&self) -> String {
        self.render_text()
    }
}

impl Outputable for CostEstimate {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "{:<30} {:>6} {:>12} {:>12}\n",
            "RESOURCE",
            "COUNT",
            format!("{}/HOUR", self.currency),
            format!("{}/MONTH", self.currency)
        );
        for line in &self.breakdown {
            if line.available {
                let _ = writeln!(
                    out,
                    "{:<30} {:>6} {:>12.4} {:>12.2}",
                    line.resource_type, line.count, line.total_hourly, line.total_monthly
                );
            } else {
                let _ = writeln!(out, "{:<30} {:>6} {:>12} {:>12}", line.resource_type, line.count, "n/a", "n/a");
            }
        }
        let _ = write!(
            out,
            "{:<30} {:>6} {:>12.4} {:>12.2}",
            "TOTAL", "", self.total_hourly_cost, self.total_monthly_cost
        );
        for warning in &self.warnings {
            let _ = write!(out, "\nwarning: {warning}");
        }
        out
    }
}

/// Result of a pricing cache sweep.
pub struct SweepOutput {
    pub removed: usize,
    pub remaining: u64,
}

impl Outputable for SweepOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "removed": self.removed,
            "remaining": self.remaining
        })
    }

    fn to_human(&self) -> String {
        format!("Removed {} expired pricing row(s), {} remaining", self.removed, self.remaining)
    }
}
