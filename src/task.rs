//! Command-file parsing.
//!
//! Each non-blank line of a command file is either a `WAIT <seconds>`
//! directive or a task of the form `<client_id> <COMMAND> <parameter>`.

use crate::error::{FarmError, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Lines longer than this many bytes are cut before tokenizing.
pub const MAX_LINE_LENGTH: usize = 255;

pub const MAX_CLIENT_ID_LEN: usize = 15;
pub const MAX_COMMAND_LEN: usize = 31;
pub const MAX_PARAMETER_LEN: usize = 63;

/// Keyword introducing a pause directive.
const WAIT_KEYWORD: &str = "WAIT";

/// One unit of work read from the command file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub client_id: String,
    pub command: String,
    pub parameter: String,
}

impl Task {
    pub fn new(
        client_id: impl Into<String>,
        command: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            command: command.into(),
            parameter: parameter.into(),
        }
    }
}

/// A parsed command-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Task(Task),
    /// Pause before the next line (honored by the serial path only).
    Wait(Duration),
}

/// Why a single line could not be turned into a directive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("{field} is {len} characters long, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("client id '{0}' cannot be used as a file name")]
    InvalidClientId(String),

    #[error("invalid WAIT duration '{0}'")]
    InvalidWait(String),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Cut a raw line to [`MAX_LINE_LENGTH`] bytes without splitting a character.
pub fn truncate_line(line: &str) -> &str {
    if line.len() <= MAX_LINE_LENGTH {
        return line;
    }
    let mut end = MAX_LINE_LENGTH;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// Parse one command-file line.
///
/// Returns `Ok(None)` for blank lines. Tokens after the parameter are ignored.
pub fn parse_line(line: &str) -> std::result::Result<Option<Directive>, ParseError> {
    let mut tokens = truncate_line(line).split_whitespace();

    let Some(first) = tokens.next() else {
        return Ok(None);
    };

    if first == WAIT_KEYWORD {
        let seconds = tokens.next().ok_or(ParseError::MissingField("WAIT duration"))?;
        let seconds: u64 = seconds
            .parse()
            .map_err(|_| ParseError::InvalidWait(seconds.to_string()))?;
        return Ok(Some(Directive::Wait(Duration::from_secs(seconds))));
    }

    let command = tokens.next().ok_or(ParseError::MissingField("command"))?;
    let parameter = tokens.next().ok_or(ParseError::MissingField("parameter"))?;

    check_len("client id", first, MAX_CLIENT_ID_LEN)?;
    check_len("command", command, MAX_COMMAND_LEN)?;
    check_len("parameter", parameter, MAX_PARAMETER_LEN)?;

    if first == "." || first == ".." || first.contains(['/', '\\']) {
        return Err(ParseError::InvalidClientId(first.to_string()));
    }

    Ok(Some(Directive::Task(Task::new(first, command, parameter))))
}

/// Parse one raw command-file line as read from disk.
///
/// The line is cut to [`MAX_LINE_LENGTH`] bytes first. A character split by
/// the cut is dropped; any other invalid UTF-8 rejects the line.
pub fn parse_raw_line(raw: &[u8]) -> std::result::Result<Option<Directive>, ParseError> {
    let cut = raw.len() > MAX_LINE_LENGTH;
    let raw = &raw[..raw.len().min(MAX_LINE_LENGTH)];
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) if cut && e.error_len().is_none() => {
            std::str::from_utf8(&raw[..e.valid_up_to()]).map_err(|_| ParseError::InvalidUtf8)?
        }
        Err(_) => return Err(ParseError::InvalidUtf8),
    };
    parse_line(line)
}

/// Raw lines of a command file, without their `\n` or `\r\n` terminator.
///
/// Unlike [`BufRead::lines`], undecodable bytes are left for
/// [`parse_raw_line`] to reject instead of failing the whole read.
pub struct RawLines<R> {
    reader: R,
}

impl<R: BufRead> Iterator for RawLines<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(Ok(buf))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn raw_lines<R: BufRead>(reader: R) -> RawLines<R> {
    RawLines { reader }
}

fn check_len(field: &'static str, value: &str, max: usize) -> std::result::Result<(), ParseError> {
    let len = value.chars().count();
    if len > max {
        return Err(ParseError::FieldTooLong { field, len, max });
    }
    Ok(())
}

/// Read every task from a command file up front.
///
/// `WAIT` directives are dropped and malformed lines are skipped with a warning.
pub fn read_tasks<R: BufRead>(reader: R) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();

    for (index, line) in raw_lines(reader).enumerate() {
        let line = line?;
        match parse_raw_line(&line) {
            Ok(Some(Directive::Task(task))) => tasks.push(task),
            Ok(Some(Directive::Wait(duration))) => {
                debug!(
                    line = index + 1,
                    seconds = duration.as_secs(),
                    "Ignoring WAIT directive in pooled mode"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed line"),
        }
    }

    Ok(tasks)
}

/// Open a command file, mapping failure to the fatal [`FarmError::CommandFile`].
pub fn open_command_file(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| FarmError::CommandFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Load every task from the command file at `path`.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    read_tasks(open_command_file(path)?)
}
