//! Assertions on captured text (pod logs, files read from guests)

use regex::Regex;

use crate::Error;

/// What a piece of captured text must satisfy
#[derive(Clone, Debug, Default)]
pub struct ContentExpectation {
    /// Substring that must appear
    pub contains: Option<String>,
    /// At least one line must match
    pub regex: Option<Regex>,
    /// Exact number of lines
    pub lines: Option<usize>,
}

impl ContentExpectation {
    /// Compile `pattern` into the line regex
    pub fn with_regex(mut self, pattern: &str) -> Result<Self, Error> {
        self.regex = Some(compile(pattern)?);
        Ok(self)
    }

    /// Whether nothing is being asserted
    pub fn is_empty(&self) -> bool {
        self.contains.is_none() && self.regex.is_none() && self.lines.is_none()
    }

    /// Check `content`, returning the first unmet expectation
    pub fn check(&self, content: &str) -> Result<(), String> {
        if let Some(needle) = &self.contains {
            if !content.contains(needle.as_str()) {
                return Err(format!("content does not contain {:?}", needle));
            }
        }
        if let Some(re) = &self.regex {
            if matching_lines(content, re).is_empty() {
                return Err(format!("no line matches /{}/", re.as_str()));
            }
        }
        if let Some(expected) = self.lines {
            let actual = line_count(content);
            if actual != expected {
                return Err(format!("expected {} lines, found {}", expected, actual));
            }
        }
        Ok(())
    }
}

/// Compile a user-supplied pattern
pub fn compile(pattern: &str) -> Result<Regex, Error> {
    Regex::new(pattern)
        .map_err(|e| Error::validation_for_field("regex", format!("invalid pattern: {}", e)))
}

/// Lines of `content` matching `re`, in order
pub fn matching_lines<'a>(content: &'a str, re: &Regex) -> Vec<&'a str> {
    content.lines().filter(|line| re.is_match(line)).collect()
}

/// Number of lines; a trailing newline does not start another line
pub fn line_count(content: &str) -> usize {
    content.lines().count()
}
