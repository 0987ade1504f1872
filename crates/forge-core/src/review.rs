//! Draft review checklist

use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

/// Phrases that mark a draft as incomplete
pub const INCOMPLETE_MARKERS: &[&str] = &[
    "insufficient information",
    "need more details",
    "additional information required",
    "information not found",
    "no local data",
    "requires web search",
];

/// Review settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// Markers every accepted draft must contain (case-insensitive)
    #[serde(default)]
    pub required_markers: Vec<String>,
    /// Extra incompleteness markers on top of the built-in ones
    #[serde(default)]
    pub extra_incomplete_markers: Vec<String>,
}

fn default_min_length() -> usize {
    20
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            required_markers: Vec::new(),
            extra_incomplete_markers: Vec::new(),
        }
    }
}

/// Outcome of one review pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewOutcome {
    pub passed: bool,
    pub failures: Vec<String>,
}

impl ReviewOutcome {
    /// Feedback handed to the reviser
    pub fn feedback(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `Validation` carrying the failures when the draft was rejected
    pub fn verdict(&self) -> Result<(), ForgeError> {
        if self.passed {
            Ok(())
        } else {
            Err(ForgeError::Validation(self.failures.clone()))
        }
    }
}

/// Checks a draft against a fixed checklist
#[derive(Debug, Clone, Default)]
pub struct ReviewChecklist {
    config: ReviewConfig,
}

impl ReviewChecklist {
    pub fn new(config: ReviewConfig) -> Self {
        Self { config }
    }

    pub fn review(&self, draft: &str) -> ReviewOutcome {
        self.check(draft, true)
    }

    /// Review a reply that is allowed to be short, such as a greeting
    pub fn review_brief(&self, draft: &str) -> ReviewOutcome {
        self.check(draft, false)
    }

    fn check(&self, draft: &str, enforce_length: bool) -> ReviewOutcome {
        let trimmed = draft.trim();
        let mut failures = Vec::new();

        if trimmed.is_empty() {
            failures.push("The response is empty.".to_string());
            return ReviewOutcome {
                passed: false,
                failures,
            };
        }

        let length = trimmed.chars().count();
        if enforce_length && length < self.config.min_length {
            failures.push(format!(
                "The response is too short ({} characters, at least {} expected).",
                length, self.config.min_length
            ));
        }

        let lower = trimmed.to_lowercase();
        let incomplete = INCOMPLETE_MARKERS
            .iter()
            .map(|m| m.to_string())
            .chain(self.config.extra_incomplete_markers.iter().map(|m| m.to_lowercase()));
        for marker in incomplete {
            if lower.contains(&marker) {
                failures.push(format!(
                    "The response says \"{}\"; answer with the information available.",
                    marker
                ));
            }
        }

        for marker in &self.config.required_markers {
            if !lower.contains(&marker.to_lowercase()) {
                failures.push(format!("The response must include \"{}\".", marker));
            }
        }

        ReviewOutcome {
            passed: failures.is_empty(),
            failures,
        }
    }
}
