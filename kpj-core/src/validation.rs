use regex::Regex;
use serde::Serialize;

use crate::config::ValidationSection;

/// Format check applied before any browser work is scheduled.
pub trait IdentifierValidator: Send + Sync {
    fn validate(&self, identifier: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RejectedIdentifier {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct KpjValidator {
    min_length: usize,
    max_length: usize,
}

impl KpjValidator {
    pub fn new(config: &ValidationSection) -> Self {
        Self {
            min_length: config.min_length,
            max_length: config.max_length,
        }
    }

    pub fn validate_list<I, S>(&self, identifiers: I) -> (Vec<String>, Vec<RejectedIdentifier>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        for identifier in identifiers {
            let identifier = identifier.as_ref();
            match self.validate(identifier) {
                Ok(()) => valid.push(identifier.to_string()),
                Err(reason) => rejected.push(RejectedIdentifier {
                    identifier: identifier.to_string(),
                    reason,
                }),
            }
        }
        (valid, rejected)
    }

    /// Strips everything that is not an ASCII digit.
    pub fn sanitize(raw: &str) -> String {
        raw.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    /// Finds every standalone digit run of acceptable length in free text.
    pub fn extract_from_text(&self, text: &str) -> Vec<String> {
        let pattern = format!(r"\b\d{{{},{}}}\b", self.min_length, self.max_length);
        let Ok(regex) = Regex::new(&pattern) else {
            return Vec::new();
        };
        regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|candidate| self.validate(candidate).is_ok())
            .collect()
    }
}

impl Default for KpjValidator {
    fn default() -> Self {
        Self::new(&ValidationSection::default())
    }
}

impl IdentifierValidator for KpjValidator {
    fn validate(&self, identifier: &str) -> Result<(), String> {
        if identifier.is_empty() {
            return Err("KPJ cannot be empty".into());
        }
        let length = identifier.chars().count();
        if length < self.min_length || length > self.max_length {
            return Err(format!(
                "KPJ must be {}-{} digits",
                self.min_length, self.max_length
            ));
        }
        if !identifier.chars().all(|c| c.is_ascii_digit()) {
            return Err("KPJ must contain only digits".into());
        }
        Ok(())
    }
}
