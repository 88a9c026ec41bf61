//! Output Parser - turns a command's output into one value per descriptor
//!
//! Two modes, fixed at construction:
//! - Pattern: the output must match a regular expression (anchored at the
//!   start, multi-line, `.` matches newlines); capture group `i` feeds
//!   descriptor `i`.
//! - Exit code: every descriptor is derived from the exit code alone.

use crate::domain::{coerce, DomainError, PortType, PortValue, ValueDescriptor};
use crate::port::CommandOutput;
use regex::{Regex, RegexBuilder};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum OutputParser {
    Pattern(Regex),
    ExitCode,
}

impl OutputParser {
    /// Build the parser for an optional output pattern
    ///
    /// # Errors
    /// DomainError::InvalidConfig if the pattern does not compile
    pub fn new(pattern: Option<&str>) -> Result<Self, DomainError> {
        match pattern {
            Some(p) => Ok(OutputParser::Pattern(compile_pattern(p)?)),
            None => Ok(OutputParser::ExitCode),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, OutputParser::Pattern(_))
    }

    /// New cache contents, in descriptor order
    pub fn parse(
        &self,
        output: &CommandOutput,
        descriptors: &[ValueDescriptor],
    ) -> Vec<Option<PortValue>> {
        match self {
            OutputParser::Pattern(regex) => parse_pattern(regex, &output.stdout, descriptors),
            OutputParser::ExitCode => parse_exit_code(output.exit_code, descriptors),
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, DomainError> {
    let build = |p: &str| {
        RegexBuilder::new(p)
            .multi_line(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| DomainError::InvalidConfig(format!("invalid output_regexp: {}", e)))
    };

    // The bare pattern must be valid on its own, not only once wrapped
    build(pattern)?;
    // \A rather than ^: with multi_line, ^ would also match at later lines
    build(&format!(r"\A(?:{})", pattern))
}

fn parse_pattern(
    regex: &Regex,
    stdout: &str,
    descriptors: &[ValueDescriptor],
) -> Vec<Option<PortValue>> {
    let Some(captures) = regex.captures(stdout) else {
        debug!(output = %stdout, "Output does not match pattern, all values unknown");
        return vec![None; descriptors.len()];
    };

    let groups: Vec<Option<&str>> = captures
        .iter()
        .skip(1)
        .map(|g| g.map(|m| m.as_str()))
        .collect();

    align_groups(&groups, stdout, descriptors.len())
        .iter()
        .zip(descriptors)
        .map(|(text, d)| coerce(text, d.port_type).into_value())
        .collect()
}

/// Produce exactly `count` group texts.
///
/// No capture groups: the whole output, once per descriptor.
/// Fewer groups than descriptors: padded with empty text. Groups that did
/// not participate in the match are empty text too.
pub fn align_groups(groups: &[Option<&str>], stdout: &str, count: usize) -> Vec<String> {
    if groups.is_empty() {
        return vec![stdout.to_string(); count];
    }

    (0..count)
        .map(|i| groups.get(i).copied().flatten().unwrap_or("").to_string())
        .collect()
}

fn parse_exit_code(exit_code: i32, descriptors: &[ValueDescriptor]) -> Vec<Option<PortValue>> {
    descriptors
        .iter()
        .map(|d| match d.port_type {
            // Process success means true
            PortType::Boolean => Some(PortValue::from(exit_code == 0)),
            PortType::Number => Some(PortValue::Integer(i64::from(exit_code))),
        })
        .collect()
}
