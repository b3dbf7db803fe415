use serde::Serialize;
use std::fmt;

/// Success/failure tally for one scan.
///
/// Only ever incremented while a scan runs; read once the scan has finished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counter {
    #[serde(rename = "success_count")]
    success: u64,
    #[serde(rename = "fail_count")]
    fail: u64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_success(&mut self) {
        self.success += 1;
    }

    pub fn increment_fail(&mut self) {
        self.fail += 1;
    }

    pub fn success_count(&self) -> u64 {
        self.success
    }

    pub fn fail_count(&self) -> u64 {
        self.fail
    }

    pub fn total(&self) -> u64 {
        self.success + self.fail
    }

    /// Sum of two tallies, for passes that run more than one scan.
    pub fn merge(self, other: Counter) -> Counter {
        Counter {
            success: self.success + other.success,
            fail: self.fail + other.fail,
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.success, self.fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_merge() {
        let mut first = Counter::new();
        first.increment_success();
        first.increment_success();
        first.increment_fail();
        let mut second = Counter::new();
        second.increment_fail();

        let merged = first.merge(second);
        assert_eq!(merged.success_count(), 2);
        assert_eq!(merged.fail_count(), 2);
        assert_eq!(merged.total(), 4);
        assert_eq!(merged.to_string(), "2 succeeded, 2 failed");
    }

    #[test]
    fn test_serialize_field_names() {
        let mut counter = Counter::new();
        counter.increment_success();
        let json = serde_json::to_value(counter).unwrap();
        assert_eq!(json, serde_json::json!({"success_count": 1, "fail_count": 0}));
    }
}
