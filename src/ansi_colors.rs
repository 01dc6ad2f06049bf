//! ANSI styling for terminal output of the `prf` binary.

use std::fmt;

/// ANSI escape codes
mod codes {
    pub const RESET: &str = "\x1b[0m";

    pub const BOLD: &str = "\x1b[1m";
    pub const DIMMED: &str = "\x1b[2m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Text wrapped in ANSI codes
pub struct StyledString {
    content: String,
    styles: Vec<&'static str>,
}

impl StyledString {
    fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            styles: Vec::new(),
        }
    }

    fn with_style(mut self, style: &'static str) -> Self {
        self.styles.push(style);
        self
    }

    /// Bold on top of a color, as in `"ok".green().bold()`.
    pub fn bold(self) -> Self {
        self.with_style(codes::BOLD)
    }
}

impl fmt::Display for StyledString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for style in &self.styles {
            write!(f, "{}", style)?;
        }
        write!(f, "{}", self.content)?;
        write!(f, "{}", codes::RESET)
    }
}

/// Color methods on borrowed text
pub trait Colorize {
    fn to_styled(&self) -> StyledString;

    fn red(&self) -> StyledString {
        self.to_styled().with_style(codes::RED)
    }
    fn green(&self) -> StyledString {
        self.to_styled().with_style(codes::GREEN)
    }
    fn yellow(&self) -> StyledString {
        self.to_styled().with_style(codes::YELLOW)
    }
    fn cyan(&self) -> StyledString {
        self.to_styled().with_style(codes::CYAN)
    }
    fn bold(&self) -> StyledString {
        self.to_styled().bold()
    }
    fn dimmed(&self) -> StyledString {
        self.to_styled().with_style(codes::DIMMED)
    }
}

impl Colorize for str {
    fn to_styled(&self) -> StyledString {
        StyledString::new(self)
    }
}

impl Colorize for String {
    fn to_styled(&self) -> StyledString {
        StyledString::new(self.as_str())
    }
}
