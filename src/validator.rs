use crate::config::PlateRules;
use std::collections::HashSet;

/// Decides whether an OCR reading could be a license plate.
#[derive(Debug, Clone)]
pub struct PlateValidator {
    min_len: usize,
    max_len: usize,
    denylist: HashSet<String>,
}

impl PlateValidator {
    pub fn new(rules: &PlateRules) -> Self {
        PlateValidator {
            min_len: rules.min_len,
            max_len: rules.max_len,
            denylist: rules.denylist.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Length is counted in characters, not bytes.
    pub fn is_valid_plate(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let len = text.chars().count();
        if len < self.min_len || len > self.max_len {
            return false;
        }
        !self.denylist.contains(&text.to_lowercase())
    }
}

impl Default for PlateValidator {
    fn default() -> Self {
        PlateValidator::new(&PlateRules::default())
    }
}
