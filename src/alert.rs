//! Severity-tagged configuration alerts.
//!
//! Cross-field config problems are reported as a list of alerts instead of
//! failing immediately. Only [`Severity::Error`] alerts block a session setup.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    /// Config parameter the alert refers to, if any.
    pub param: Option<String>,
    pub message: String,
}

impl Alert {
    pub fn new(severity: Severity, param: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity,
            param: param.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn error(param: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, Some(param), message)
    }

    pub fn warning(param: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, Some(param), message)
    }

    pub fn info(param: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, Some(param), message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.param {
            Some(p) => write!(f, "{} ({}): {}", level, p, self.message),
            None => write!(f, "{}: {}", level, self.message),
        }
    }
}

/// Keep only the alerts that block a setup.
pub fn errors_of(alerts: &[Alert]) -> Vec<Alert> {
    alerts.iter().filter(|a| a.is_error()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_error_alerts_are_blocking() {
        let alerts = vec![
            Alert::warning("gain", "gain is high"),
            Alert::error("range_interval", "too long"),
            Alert::info("profile", "consider profile 2"),
        ];
        let errs = errors_of(&alerts);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].param.as_deref(), Some("range_interval"));
    }

    #[test]
    fn display_includes_param() {
        let a = Alert::warning("gain", "gain is high");
        assert_eq!(a.to_string(), "warning (gain): gain is high");
    }
}
