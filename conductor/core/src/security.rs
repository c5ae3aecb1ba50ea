//! Input Validation
//!
//! Guards the text that flows from clients into prompts. Everything here runs
//! before a session is touched, so a rejected request never produces a stream.

use serde::{Deserialize, Serialize};

/// Size limits for client-supplied text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorLimits {
    /// Maximum user message size in bytes
    pub max_message_size: usize,
    /// Maximum situation description size in bytes
    pub max_situation_size: usize,
}

impl Default for TutorLimits {
    fn default() -> Self {
        Self {
            max_message_size: 4096,
            max_situation_size: 1024,
        }
    }
}

/// Outcome of validating a piece of input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    /// Input is acceptable
    Valid,
    /// Input is rejected, with a reason suitable for the client
    Invalid(String),
}

impl ValidationResult {
    /// Whether the input was accepted
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Validates client input against [`TutorLimits`]
#[derive(Clone, Debug, Default)]
pub struct InputValidator {
    limits: TutorLimits,
}

impl InputValidator {
    /// Create a new input validator with the given limits
    #[must_use]
    pub fn new(limits: TutorLimits) -> Self {
        Self { limits }
    }

    /// Validate a user message
    #[must_use]
    pub fn validate_message(&self, content: &str) -> ValidationResult {
        if content.trim().is_empty() {
            return ValidationResult::Invalid("missing text".to_string());
        }
        check_text("Message", content, self.limits.max_message_size)
    }

    /// Validate a situation description (empty is allowed; defaults apply)
    #[must_use]
    pub fn validate_situation(&self, situation: &str) -> ValidationResult {
        check_text("Situation", situation, self.limits.max_situation_size)
    }
}

fn check_text(what: &str, content: &str, max: usize) -> ValidationResult {
    if content.len() > max {
        return ValidationResult::Invalid(format!(
            "{what} too large: {} bytes (max: {max})",
            content.len()
        ));
    }

    // Control characters (except newline, tab)
    if content
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
    {
        return ValidationResult::Invalid(format!("{what} contains invalid control characters"));
    }

    ValidationResult::Valid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_message() {
        let validator = InputValidator::default();
        assert!(validator.validate_message("Je voudrais un café, s'il vous plaît.\n").is_valid());
    }

    #[test]
    fn test_rejects_empty_message() {
        let validator = InputValidator::default();
        assert_eq!(
            validator.validate_message("  \n"),
            ValidationResult::Invalid("missing text".to_string())
        );
    }

    #[test]
    fn test_rejects_oversized_and_control_chars() {
        let validator = InputValidator::new(TutorLimits {
            max_message_size: 8,
            max_situation_size: 4,
        });

        assert!(!validator.validate_message("123456789").is_valid());
        assert!(!validator.validate_message("a\u{0007}b").is_valid());
        assert!(!validator.validate_situation("hotel").is_valid());
        assert!(validator.validate_situation("").is_valid());
    }
}
