use std::fmt;

/// How serious a diagnostic is; sorting puts errors first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Info => f.write_str("info"),
        }
    }
}

/// One user-visible problem, pinpointing its origin.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub origin: String,
    pub message: String,
}

impl Diagnostic {
    pub fn error(origin: impl Into<String>, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn warning(origin: impl Into<String>, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn info(origin: impl Into<String>, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Info,
            origin: origin.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.origin.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.origin, self.message)
        }
    }
}

/// Collects diagnostics across stages; errors are surfaced together at the
/// next stage boundary rather than aborting mid-stage.
#[derive(Debug, Default)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
}

impl Reporter {
    pub fn new() -> Reporter {
        Reporter::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => log::error!("{}", diagnostic),
            Severity::Warning => log::warn!("{}", diagnostic),
            Severity::Info => log::info!("{}", diagnostic),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Diagnostics sorted by severity, then origin, for stable output.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut sorted: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        sorted.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.origin.cmp(&b.origin))
                .then_with(|| a.message.cmp(&b.message))
        });
        sorted
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_puts_errors_first() {
        let mut reporter = Reporter::new();
        reporter.report(Diagnostic::warning("b.txt", "later"));
        reporter.report(Diagnostic::error("a.txt", "fatal"));
        reporter.report(Diagnostic::warning("a.txt", "earlier"));

        let sorted = reporter.sorted();
        assert_eq!(sorted[0].severity, Severity::Error);
        assert_eq!(sorted[1].origin, "a.txt");
        assert_eq!(sorted[2].origin, "b.txt");
        assert!(reporter.has_errors());
    }
}
