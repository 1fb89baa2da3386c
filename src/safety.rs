// src/safety.rs
//! Advisory content gate applied to user-authored text before it is stored or sent
//! to a provider. Substring matching is easy to evade; this is not a security boundary.

use serde::Serialize;

pub const DEFAULT_DENY_LIST: &[&str] = &[
    "kill",
    "suicide",
    "bomb",
    "illegal",
    "hack",
    "drop tables",
    "rm -rf",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SafetyVerdict {
    fn allowed() -> Self {
        Self { allowed: true, reason: None }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyFilter {
    // Stored lowercased so `check` only lowercases the input.
    deny_list: Vec<String>,
}

impl SafetyFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let deny_list = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { deny_list }
    }

    pub fn check(&self, text: &str) -> SafetyVerdict {
        let lowered = text.to_lowercase();
        match self.deny_list.iter().find(|phrase| lowered.contains(phrase.as_str())) {
            Some(phrase) => SafetyVerdict {
                allowed: false,
                reason: Some(format!("Input contains banned content: \"{}\"", phrase)),
            },
            None => SafetyVerdict::allowed(),
        }
    }

    pub fn phrases(&self) -> &[String] {
        &self.deny_list
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DENY_LIST)
    }
}
