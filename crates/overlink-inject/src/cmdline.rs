//! Command-line splitting and launch requests.
//!
//! A single-string command line is split with the host's rules:
//! `CommandLineToArgvW` semantics on Windows, shell-like quoting elsewhere.

use std::iter::{Peekable, repeat_n};
use std::path::PathBuf;
use std::str::Chars;

use serde::{Deserialize, Serialize};

use crate::error::{InjectError, InjectResult, LaunchStage};

/// What to launch and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl LaunchRequest {
    /// Split `command_line` with the host's rules.
    ///
    /// An empty `working_dir` means "inherit the controller's".
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchStage::Parse`] error if the line is empty or has an
    /// unterminated quote.
    pub fn parse(command_line: &str, working_dir: impl Into<PathBuf>) -> InjectResult<Self> {
        let working_dir = working_dir.into();
        let working_dir = (!working_dir.as_os_str().is_empty()).then_some(working_dir);
        Self::from_argv(split_command_line(command_line)?, working_dir)
    }

    /// A request from an already split argument vector.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchStage::Parse`] error if `argv` is empty or its first
    /// element is empty.
    pub fn from_argv(argv: Vec<String>, working_dir: Option<PathBuf>) -> InjectResult<Self> {
        match argv.first() {
            Some(program) if !program.is_empty() => Ok(Self { argv, working_dir }),
            _ => Err(InjectError::launch(LaunchStage::Parse, "empty command line")),
        }
    }

    /// Program token as given, before lookup.
    #[must_use]
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Working directory, if one was given.
    #[must_use]
    pub fn working_dir(&self) -> Option<&std::path::Path> {
        self.working_dir.as_deref()
    }
}

/// Split a command line with the host platform's rules.
///
/// # Errors
///
/// Returns a [`LaunchStage::Parse`] error if nothing remains after splitting
/// or a quote is left open.
pub fn split_command_line(line: &str) -> InjectResult<Vec<String>> {
    #[cfg(windows)]
    let argv = split_windows(line);
    #[cfg(not(windows))]
    let argv = split_posix(line)?;

    if argv.first().is_none_or(String::is_empty) {
        return Err(InjectError::launch(LaunchStage::Parse, "empty command line"));
    }
    Ok(argv)
}

/// Split with `CommandLineToArgvW` rules.
///
/// The program name ends at the first space unless quoted, and takes no
/// escapes. In later arguments `2n` backslashes before a quote give `n`
/// backslashes and toggle quoting, `2n+1` give `n` and a literal quote, and
/// `""` inside quotes is a literal quote.
#[must_use]
pub fn split_windows(line: &str) -> Vec<String> {
    let mut chars = line.trim_start_matches([' ', '\t']).chars().peekable();
    let mut argv = Vec::new();

    let mut program = String::new();
    if chars.next_if_eq(&'"').is_some() {
        for c in chars.by_ref() {
            if c == '"' {
                break;
            }
            program.push(c);
        }
    } else {
        while let Some(c) = chars.next_if(|c| !matches!(c, ' ' | '\t')) {
            program.push(c);
        }
    }
    argv.push(program);

    loop {
        while chars.next_if(|c| matches!(c, ' ' | '\t')).is_some() {}
        if chars.peek().is_none() {
            break;
        }
        argv.push(windows_argument(&mut chars));
    }
    argv
}

fn windows_argument(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut arg = String::new();
    let mut quoted = false;

    loop {
        let mut backslashes = 0usize;
        while chars.next_if_eq(&'\\').is_some() {
            backslashes = backslashes.saturating_add(1);
        }

        match chars.peek().copied() {
            Some('"') => {
                chars.next();
                arg.extend(repeat_n('\\', backslashes / 2));
                if backslashes % 2 == 1 {
                    arg.push('"');
                } else if quoted && chars.next_if_eq(&'"').is_some() {
                    arg.push('"');
                } else {
                    quoted = !quoted;
                }
            },
            next => {
                arg.extend(repeat_n('\\', backslashes));
                match next {
                    None => break,
                    Some(' ' | '\t') if !quoted => break,
                    Some(c) => {
                        chars.next();
                        arg.push(c);
                    },
                }
            },
        }
    }
    arg
}

/// Split with shell-like rules: whitespace separates, single quotes are
/// literal, double quotes allow `\"`, `\\`, `\$` and `` \` `` escapes, and a
/// bare backslash escapes the next character.
///
/// # Errors
///
/// Returns a [`LaunchStage::Parse`] error for an unterminated quote.
pub fn split_posix(line: &str) -> InjectResult<Vec<String>> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut current));
                    in_word = false;
                }
            },
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated('\'')),
                    }
                }
            },
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('"' | '\\' | '$' | '`')) => current.push(e),
                            Some('\n') => {},
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            },
                            None => return Err(unterminated('"')),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated('"')),
                    }
                }
            },
            '\\' => {
                in_word = true;
                current.push(chars.next().unwrap_or('\\'));
            },
            c => {
                in_word = true;
                current.push(c);
            },
        }
    }

    if in_word {
        argv.push(current);
    }
    Ok(argv)
}

fn unterminated(quote: char) -> InjectError {
    InjectError::launch(LaunchStage::Parse, format!("unterminated {quote} quote"))
}
