// DAMONBENCH RESULT RECORDS
// ONE RECORD PER COMPLETED RUN: THE RUN'S CONFIG PLUS ITS MEASURED METRICS.
// APPEND-ONLY, IN EXECUTION ORDER (== MATRIX ORDER). FAILED RUNS LEAVE NO RECORD.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::matrix::{ConfigRecord, CGROUP_NAME};

pub const RUNTIME_SEC: &str = "runtime_sec";

pub type Metrics = BTreeMap<String, f64>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub config: ConfigRecord,
    pub results: Metrics,
}

impl BenchmarkResult {
    pub fn new(config: ConfigRecord, results: Metrics) -> Self {
        Self { config, results }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.results.get(name).copied()
    }

    pub fn runtime_sec(&self) -> Option<f64> {
        self.metric(RUNTIME_SEC)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResultCollector {
    results: Vec<BenchmarkResult>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantSummary {
    pub variant: String,
    pub runs: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    pub fn as_slice(&self) -> &[BenchmarkResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_vec(self) -> Vec<BenchmarkResult> {
        self.results
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.results).context("serializing results")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut text = self.to_json()?;
        text.push('\n');
        fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }

    // RUNTIME PER CGROUP VARIANT, IN ORDER OF FIRST APPEARANCE
    pub fn summary(&self) -> Vec<VariantSummary> {
        let mut order: Vec<String> = Vec::new();
        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for r in &self.results {
            let Some(rt) = r.runtime_sec() else { continue };
            let variant = r
                .config
                .get(CGROUP_NAME)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            if !samples.contains_key(&variant) {
                order.push(variant.clone());
            }
            samples.entry(variant).or_default().push(rt);
        }

        order
            .into_iter()
            .map(|variant| {
                let vals = &samples[&variant];
                let sum: f64 = vals.iter().sum();
                VariantSummary {
                    runs: vals.len(),
                    mean: sum / vals.len() as f64,
                    min: vals.iter().copied().fold(f64::INFINITY, f64::min),
                    max: vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    variant,
                }
            })
            .collect()
    }

    pub fn summary_table(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!(
            "{:<16} {:>5} {:>10} {:>10} {:>10}",
            "CGROUP", "RUNS", "MEAN", "MIN", "MAX"
        ));
        lines.push(format!(
            "{} {} {} {} {}",
            "-".repeat(16),
            "-".repeat(5),
            "-".repeat(10),
            "-".repeat(10),
            "-".repeat(10),
        ));
        for s in self.summary() {
            lines.push(format!(
                "{:<16} {:>5} {:>9.3}s {:>9.3}s {:>9.3}s",
                s.variant, s.runs, s.mean, s.min, s.max
            ));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixBuilder;

    fn record(cgroup: &str, iteration: u32, runtime: f64) -> BenchmarkResult {
        let config = MatrixBuilder::new()
            .option(CGROUP_NAME, &[cgroup])
            .option(crate::matrix::ITERATION, &[iteration])
            .build()
            .unwrap()
            .remove(0);
        let mut m = Metrics::new();
        m.insert(RUNTIME_SEC.to_string(), runtime);
        BenchmarkResult::new(config, m)
    }

    #[test]
    fn keeps_append_order() {
        let mut c = ResultCollector::new();
        c.push(record("damon_test", 2, 1.0));
        c.push(record("baseline_test", 1, 2.0));
        c.push(record("damon_test", 2, 1.0));
        let cgroups: Vec<_> = c
            .as_slice()
            .iter()
            .map(|r| r.config.get_str(CGROUP_NAME).unwrap().to_string())
            .collect();
        // NO DEDUPLICATION
        assert_eq!(cgroups, vec!["damon_test", "baseline_test", "damon_test"]);
    }

    #[test]
    fn summary_groups_by_variant() {
        let mut c = ResultCollector::new();
        c.push(record("baseline_test", 1, 4.0));
        c.push(record("baseline_test", 2, 6.0));
        c.push(record("damon_test", 1, 3.0));
        let s = c.summary();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].variant, "baseline_test");
        assert_eq!(s[0].runs, 2);
        assert_eq!(s[0].mean, 5.0);
        assert_eq!(s[0].min, 4.0);
        assert_eq!(s[0].max, 6.0);
        assert_eq!(s[1].variant, "damon_test");
        assert_eq!(c.summary_table().len(), 4);
    }

    #[test]
    fn json_shape() {
        let mut c = ResultCollector::new();
        c.push(record("baseline_test", 1, 1.5));
        let v: serde_json::Value = serde_json::from_str(&c.to_json().unwrap()).unwrap();
        assert_eq!(v[0]["config"]["cgroup_name"], "baseline_test");
        assert_eq!(v[0]["config"]["iteration"], 1);
        assert_eq!(v[0]["results"]["runtime_sec"], 1.5);
    }

    #[test]
    fn write_json_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.json");
        let mut c = ResultCollector::new();
        c.push(record("damon_test", 1, 0.25));
        c.write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"runtime_sec\": 0.25"));
    }
}
