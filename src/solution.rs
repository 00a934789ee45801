use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

/// Start of one scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub train: usize,
    pub operation: usize,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionFile {
    pub objective_value: i64,
    pub events: Vec<Event>,
}

impl SolutionFile {
    /// Events are ordered by time, then train, then operation.
    pub fn new(objective_value: i64, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| (e.time, e.train, e.operation));
        SolutionFile {
            objective_value,
            events,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        info!("Wrote solution to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_sorted() {
        let e = |train, operation, time| Event {
            train,
            operation,
            time,
        };
        let solution = SolutionFile::new(3, vec![e(1, 1, 6), e(0, 2, 14), e(1, 0, 2), e(0, 0, 6)]);
        assert_eq!(solution.events, vec![e(1, 0, 2), e(0, 0, 6), e(1, 1, 6), e(0, 2, 14)]);
    }

    #[test]
    fn json_layout() {
        let solution = SolutionFile::new(
            5,
            vec![Event {
                train: 0,
                operation: 1,
                time: 9,
            }],
        );
        let value: serde_json::Value = serde_json::from_str(&solution.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "objective_value": 5,
                "events": [{"train": 0, "operation": 1, "time": 9}]
            })
        );
    }
}
