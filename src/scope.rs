//! Experiment-scope variable store
//!
//! The experiment runner owns a bag of named scalar variables per run. The
//! controller reads its configuration from there and publishes calibration
//! and pulse timing back into it, so state survives between steps of one run
//! and disappears with the run.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

/// Scalar variable value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    /// Monotonic timestamp, only meaningful within one process
    Time(Instant),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Time(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<Instant> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Time(t) => write!(f, "{:?}", t),
        }
    }
}

/// Read/write access to the runner's named variables
pub trait VariableStore {
    fn get(&self, name: &str) -> Option<&Value>;

    fn set(&mut self, name: &str, value: Value);

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// In-memory store for one experiment run
#[derive(Debug, Default)]
pub struct ExperimentScope {
    name: String,
    vars: HashMap<String, Value>,
}

impl ExperimentScope {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!("Experiment scope '{}' started", name);
        Self {
            name,
            vars: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variables sorted by name, for end-of-run summaries
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut vars: Vec<_> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }
}

impl VariableStore for ExperimentScope {
    fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    fn set(&mut self, name: &str, value: Value) {
        debug!("[{}] {} = {}", self.name, name, value);
        self.vars.insert(name.to_string(), value);
    }
}

impl Drop for ExperimentScope {
    fn drop(&mut self) {
        debug!(
            "Experiment scope '{}' ended with {} variables",
            self.name,
            self.vars.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut scope = ExperimentScope::new("run-1");
        assert!(!scope.contains("timeout"));
        scope.set("timeout", Value::Int(2000));
        assert_eq!(scope.get("timeout"), Some(&Value::Int(2000)));
        scope.set("timeout", Value::Text("infinite".into()));
        assert_eq!(scope.get("timeout").and_then(Value::as_i64), None);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Int(80).as_f64(), Some(80.0));
    }

    #[test]
    fn test_scopes_do_not_share_state() {
        let mut first = ExperimentScope::new("run-1");
        first.set("tactstim_calibration_perc", Value::Float(80.0));
        let second = ExperimentScope::new("run-2");
        assert!(!second.contains("tactstim_calibration_perc"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut scope = ExperimentScope::new("run-1");
        scope.set("b", Value::Int(2));
        scope.set("a", Value::Int(1));
        let names: Vec<_> = scope.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
