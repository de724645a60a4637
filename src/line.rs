//! Line record, its textual encoding and ordering.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};

/// Line template error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    template: String,
    reason: &'static str,
}

impl TemplateError {
    fn new(template: &str, reason: &'static str) -> Self {
        TemplateError {
            template: template.to_string(),
            reason,
        }
    }

    /// Returns the rejected template.
    pub fn template(&self) -> &str {
        &self.template
    }
}

impl Error for TemplateError {}

impl Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid line template {:?}: {}", self.template, self.reason)
    }
}

/// Malformed line error. Every variant carries the offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The line does not contain the decoration.
    MissingDecoration(String),
    /// The part preceding the decoration is not an integer.
    InvalidNumber(String),
    /// Nothing follows the decoration.
    EmptyText(String),
}

impl FormatError {
    /// Returns the line that failed to parse.
    pub fn line(&self) -> &str {
        match self {
            FormatError::MissingDecoration(line) => line,
            FormatError::InvalidNumber(line) => line,
            FormatError::EmptyText(line) => line,
        }
    }
}

impl Error for FormatError {}

impl Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::MissingDecoration(line) => write!(f, "invalid line format (no decoration): {}", line),
            FormatError::InvalidNumber(line) => write!(f, "invalid line format (bad number): {}", line),
            FormatError::EmptyText(line) => write!(f, "invalid line format (empty text): {}", line),
        }
    }
}

/// A single record: an integer tag and a text payload.
///
/// Lines are ordered by `text` (byte-wise) and then by `number`.
/// The text must not contain a line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Line {
    number: i64,
    text: String,
}

impl Line {
    pub fn new(number: i64, text: impl Into<String>) -> Self {
        Line {
            number,
            text: text.into(),
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl PartialOrd for Line {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Line {
    fn cmp(&self, other: &Self) -> Ordering {
        // str comparison is byte-wise
        self.text
            .as_str()
            .cmp(other.text.as_str())
            .then(self.number.cmp(&other.number))
    }
}

/// Literal string separating the number from the text in the line encoding.
///
/// Obtained by instantiating both placeholders of a line template with empty strings,
/// so the template `"{0}. {1}"` yields the decoration `". "`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration(String);

impl Decoration {
    /// Derives the decoration from a line template.
    ///
    /// `{0}` stands for the number, `{1}` for the text, `{{` and `}}` are literal braces.
    /// Both placeholders must be present exactly once with the number first, and the
    /// remaining literal must not be empty.
    pub fn from_template(template: &str) -> Result<Self, TemplateError> {
        let mut decoration = String::with_capacity(template.len());
        let mut number_seen = false;
        let mut text_seen = false;

        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    decoration.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    decoration.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err(TemplateError::new(template, "unbalanced '{'")),
                        }
                    }
                    match name.trim() {
                        "0" if number_seen => return Err(TemplateError::new(template, "duplicated {0}")),
                        "0" if text_seen => return Err(TemplateError::new(template, "{0} must precede {1}")),
                        "0" => number_seen = true,
                        "1" if text_seen => return Err(TemplateError::new(template, "duplicated {1}")),
                        "1" => text_seen = true,
                        _ => return Err(TemplateError::new(template, "only {0} and {1} placeholders are allowed")),
                    }
                }
                '}' => return Err(TemplateError::new(template, "unbalanced '}'")),
                c => decoration.push(c),
            }
        }

        if !number_seen || !text_seen {
            return Err(TemplateError::new(template, "both {0} and {1} are required"));
        }
        if decoration.is_empty() {
            return Err(TemplateError::new(template, "empty decoration"));
        }

        return Ok(Decoration(decoration));
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a raw line, splitting at the first occurrence of the decoration.
    ///
    /// A text that itself contains the decoration is kept whole, since only the first
    /// occurrence splits. A decoration that can occur inside the number (digits, sign)
    /// makes the encoding ambiguous and such lines may not parse back to what was written.
    pub fn parse(&self, raw: &str) -> Result<Line, FormatError> {
        let index = raw
            .find(self.0.as_str())
            .ok_or_else(|| FormatError::MissingDecoration(raw.to_string()))?;

        let number = raw[..index]
            .trim()
            .parse::<i64>()
            .map_err(|_| FormatError::InvalidNumber(raw.to_string()))?;

        let text = &raw[index + self.0.len()..];
        if text.is_empty() {
            return Err(FormatError::EmptyText(raw.to_string()));
        }

        return Ok(Line::new(number, text));
    }

    /// Writes a newline-terminated line.
    pub fn write_line<W: Write>(&self, writer: &mut W, line: &Line) -> io::Result<()> {
        writeln!(writer, "{}{}{}", line.number, self.0, line.text)
    }
}
