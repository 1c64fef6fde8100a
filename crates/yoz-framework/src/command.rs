//! Clap-based command argument parsing.

use clap::Parser;
use yoz_core::{ParseError, ParseResult};

/// Simple shell-like argument splitting for plain text.
///
/// Handles:
/// - Space-separated arguments
/// - Quoted strings (single and double quotes)
/// - Escape sequences within double quotes
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;
    let mut quoted = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_double_quote => escape_next = true,
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                    quoted = false;
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

/// Parses `args` into `T`, using `command` as the binary name.
pub fn parse_args<T: Parser>(command: &str, args: &str) -> ParseResult<T> {
    let argv = std::iter::once(command.to_string()).chain(shell_split(args));
    T::try_parse_from(argv).map_err(|e| ParseError::Arguments {
        command: command.to_string(),
        reason: e.to_string(),
    })
}
