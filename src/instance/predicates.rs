//! Success checks for the output of third-party command-line tools.

use crate::runner::CommandOutput;

/// How a step decides that its command did what it should.
///
/// The tools driven here (paster, mysql, apache init scripts) do not report
/// structured results, so each step states the output it expects instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessPredicate {
    /// Nothing printed, apart from whitespace.
    Empty,
    /// Trimmed output equals the text.
    Exactly(String),
    /// The last non-blank line, trimmed, equals the text.
    LastLineIs(String),
    /// The marker appears anywhere in the output.
    Contains(String),
    /// Exit status zero.
    ExitOk,
    /// Exit status zero, or the marker appears in the output.
    ExitOkOrContains(String),
}

impl SuccessPredicate {
    pub fn exactly(text: impl Into<String>) -> Self {
        Self::Exactly(text.into())
    }

    pub fn last_line_is(text: impl Into<String>) -> Self {
        Self::LastLineIs(text.into())
    }

    pub fn contains(marker: impl Into<String>) -> Self {
        Self::Contains(marker.into())
    }

    pub fn exit_ok_or_contains(marker: impl Into<String>) -> Self {
        Self::ExitOkOrContains(marker.into())
    }

    pub fn accepts(&self, out: &CommandOutput) -> bool {
        match self {
            Self::Empty => out.trimmed().is_empty(),
            Self::Exactly(text) => out.trimmed() == text,
            Self::LastLineIs(text) => out
                .output
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .is_some_and(|line| line == text),
            Self::Contains(marker) => out.output.contains(marker.as_str()),
            Self::ExitOk => out.success(),
            Self::ExitOkOrContains(marker) => {
                out.success() || out.output.contains(marker.as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ignores_whitespace_and_status() {
        assert!(SuccessPredicate::Empty.accepts(&CommandOutput::ok(" \n")));
        assert!(SuccessPredicate::Empty.accepts(&CommandOutput::failed(1, "")));
        assert!(!SuccessPredicate::Empty.accepts(&CommandOutput::ok("ERROR 1007")));
    }

    #[test]
    fn exactly_compares_trimmed_output() {
        let pred = SuccessPredicate::exactly("Running setup_app() from onlinelinguisticdatabase.websetup");
        assert!(pred.accepts(&CommandOutput::ok(
            "Running setup_app() from onlinelinguisticdatabase.websetup\n"
        )));
        assert!(!pred.accepts(&CommandOutput::ok(
            "Running setup_app() from onlinelinguisticdatabase.websetup\nTraceback"
        )));
    }

    #[test]
    fn last_line_skips_trailing_blank_lines() {
        let pred = SuccessPredicate::last_line_is("/srv/apps/blaold/production.ini");
        let out = CommandOutput::ok(
            "Distribution already installed:\n  onlinelinguisticdatabase 1.2\n/srv/apps/blaold/production.ini\n\n",
        );
        assert!(pred.accepts(&out));
        assert!(!pred.accepts(&CommandOutput::ok("")));
        assert!(!pred.accepts(&CommandOutput::ok("/srv/apps/blaold/production.ini\nerror")));
    }

    #[test]
    fn marker_and_exit_checks() {
        let done = SuccessPredicate::contains("...done.");
        assert!(done.accepts(&CommandOutput::failed(1, "Restarting web server apache2 ...done.")));
        assert!(!done.accepts(&CommandOutput::ok("")));

        assert!(SuccessPredicate::ExitOk.accepts(&CommandOutput::ok("noise")));
        assert!(!SuccessPredicate::ExitOk.accepts(&CommandOutput {
            status: None,
            output: String::new(),
        }));

        let either = SuccessPredicate::exit_ok_or_contains("Adding system startup");
        assert!(either.accepts(&CommandOutput::ok("")));
        assert!(either.accepts(&CommandOutput::failed(2, " Adding system startup for /etc/init.d/x")));
        assert!(!either.accepts(&CommandOutput::failed(2, "")));
    }
}
