//! Operator-facing output and prompts.

use std::io::{self, BufRead as _, IsTerminal as _, Write as _};

use crate::error::{AppError, Result};

const HEADER: &str = "\x1b[95m";
const OK: &str = "\x1b[92m";
const WARNING: &str = "\x1b[93m";
const FAIL: &str = "\x1b[91m";
const END: &str = "\x1b[0m";

/// ANSI colouring, switched on or off once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    /// Colour only when asked to and stdout is a terminal.
    pub fn detect(wanted: bool) -> Self {
        Self::new(wanted && io::stdout().is_terminal())
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("{code}{text}{END}")
        } else {
            text.to_string()
        }
    }

    pub fn header(&self, text: &str) -> String {
        self.paint(HEADER, text)
    }

    pub fn ok(&self, text: &str) -> String {
        self.paint(OK, text)
    }

    pub fn warning(&self, text: &str) -> String {
        self.paint(WARNING, text)
    }

    pub fn fail(&self, text: &str) -> String {
        self.paint(FAIL, text)
    }
}

/// Prints progress, warnings and failures for the operator.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    palette: Palette,
}

impl Console {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn header(&self, text: &str) {
        println!("\n{}", self.palette.header(text));
    }

    pub fn say(&self, text: &str) {
        println!("{}", text);
    }

    pub fn ok(&self, text: &str) {
        println!("{}", self.palette.ok(text));
    }

    pub fn warn(&self, text: &str) {
        println!("{}", self.palette.warning(text));
    }

    pub fn fail(&self, text: &str) {
        eprintln!("{}", self.palette.fail(text));
    }
}

/// Source of operator answers.
pub trait Prompter {
    /// Ask a question and return the answer without its line ending.
    fn ask(&self, question: &str) -> Result<String>;

    /// Ask a yes/no question; only `y` or `Y` count as yes.
    fn confirm(&self, question: &str) -> Result<bool> {
        let answer = self.ask(question)?;
        Ok(matches!(answer.trim(), "y" | "Y"))
    }

    /// Ask, and fail with `missing` when the answer is blank.
    fn require(&self, question: &str, missing: &str) -> Result<String> {
        let answer = self.ask(question)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AppError::config(missing));
        }
        Ok(answer.to_string())
    }
}

/// Reads answers from standard input.
#[derive(Debug, Clone, Copy)]
pub struct StdinPrompter {
    palette: Palette,
}

impl StdinPrompter {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }
}

impl Prompter for StdinPrompter {
    fn ask(&self, question: &str) -> Result<String> {
        print!("{} ", self.palette.warning(question));
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    struct Scripted(RefCell<VecDeque<&'static str>>);

    impl Prompter for Scripted {
        fn ask(&self, _question: &str) -> Result<String> {
            Ok(self.0.borrow_mut().pop_front().unwrap_or("").to_string())
        }
    }

    #[test]
    fn palette_wraps_only_when_enabled() {
        assert_eq!(Palette::plain().fail("x"), "x");
        assert_eq!(Palette::new(true).fail("x"), "\x1b[91mx\x1b[0m");
    }

    #[test]
    fn confirm_accepts_only_y() {
        let prompter = Scripted(RefCell::new(VecDeque::from(["y", "yes", "Y", ""])));
        assert!(prompter.confirm("?").unwrap());
        assert!(!prompter.confirm("?").unwrap());
        assert!(prompter.confirm("?").unwrap());
        assert!(!prompter.confirm("?").unwrap());
    }

    #[test]
    fn require_rejects_blank() {
        let prompter = Scripted(RefCell::new(VecDeque::from(["  ", " value "])));
        assert!(prompter.require("?", "missing").is_err());
        assert_eq!(prompter.require("?", "missing").unwrap(), "value");
    }
}
