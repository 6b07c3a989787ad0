//! Command codec
//!
//! Maps a frame payload to a [`Command`] and renders [`Reply`] strings.
//!
//! Two payload encodings are supported:
//!
//! - [`WireFormat::Fields`]: every field (command name first) is a 4-byte
//!   big-endian length followed by that many UTF-8 bytes. Nothing needs
//!   escaping, so file contents travel untouched.
//! - [`WireFormat::Delimited`]: UTF-8 text split on a single delimiter
//!   character. The split for `add` is bounded at its arity so the trailing
//!   file contents may contain the delimiter.
//!
//! Replies are plain UTF-8 in both formats: `list <json>` or `message <text>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::frame::LENGTH_PREFIX_SIZE;

/// Reply text for a command name nobody recognizes
pub const UNKNOWN_COMMAND: &str = "Неизвестная команда";

/// Reply text for a command with too few arguments
pub const MISSING_ARGUMENTS: &str = "Ошибка: не хватает аргументов";

/// Default delimiter for the delimited wire format
pub const DEFAULT_DELIMITER: char = '|';

const LIST_PREFIX: &str = "list ";
const MESSAGE_PREFIX: &str = "message ";

/// Errors from decoding or encoding a command payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("field {index} overruns the payload")]
    TruncatedField { index: usize },

    #[error("{command} expects {expected} arguments, got {got}")]
    MissingArguments {
        command: String,
        expected: usize,
        got: usize,
    },

    #[error("interval must be a positive integer of milliseconds, got '{0}'")]
    InvalidInterval(String),

    #[error("field {index} contains the delimiter '{delimiter}'")]
    DelimiterInField { index: usize, delimiter: char },
}

impl CodecError {
    /// Reply sent back to the client for a malformed command
    pub fn to_reply(&self) -> Reply {
        match self {
            Self::MissingArguments { .. } => Reply::message(MISSING_ARGUMENTS),
            other => Reply::message(format!("Ошибка: {}", other)),
        }
    }
}

/// Payload encoding used for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// Each field carries its own length prefix
    ///
    /// Plain delimited text is not accepted here: `frobnicate` sent raw
    /// decodes as a truncated field, not as an unknown command. Clients
    /// speaking the legacy text protocol need a server configured with
    /// [`WireFormat::Delimited`].
    #[default]
    Fields,
    /// Fields joined by a single delimiter character
    Delimited,
}

/// A decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        name: String,
        filename: String,
        launch_command: String,
        interval_ms: u64,
        file_contents: String,
    },
    Remove {
        name: String,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    List,
    Get {
        name: String,
    },
    Shutdown,
    /// Anything the server does not recognize, kept for logging
    Unknown {
        name: String,
    },
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::List => "applist",
            Self::Get { .. } => "get",
            Self::Shutdown => "shutdown",
            Self::Unknown { name } => name,
        }
    }

    /// Number of positional arguments a command name takes
    fn arity(name: &str) -> Option<usize> {
        match name {
            "add" => Some(5),
            "remove" | "start" | "stop" | "get" => Some(1),
            "applist" | "shutdown" => Some(0),
            _ => None,
        }
    }

    /// All fields in wire order, command name first
    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.name().to_string()];
        match self {
            Self::Add {
                name,
                filename,
                launch_command,
                interval_ms,
                file_contents,
            } => {
                fields.push(name.clone());
                fields.push(filename.clone());
                fields.push(launch_command.clone());
                fields.push(interval_ms.to_string());
                fields.push(file_contents.clone());
            }
            Self::Remove { name } | Self::Start { name } | Self::Stop { name } | Self::Get { name } => {
                fields.push(name.clone());
            }
            Self::List | Self::Shutdown | Self::Unknown { .. } => {}
        }
        fields
    }

    /// Build a command from decoded fields
    ///
    /// Extra trailing arguments are ignored.
    fn from_fields(mut fields: Vec<String>) -> Result<Self, CodecError> {
        if fields.is_empty() {
            return Ok(Self::Unknown { name: String::new() });
        }
        let name = fields.remove(0);
        let Some(expected) = Self::arity(&name) else {
            return Ok(Self::Unknown { name });
        };
        if fields.len() < expected {
            return Err(CodecError::MissingArguments {
                command: name,
                expected,
                got: fields.len(),
            });
        }
        fields.truncate(expected);
        let mut args = fields.into_iter();
        let mut next = || args.next().unwrap_or_default();

        let command = match name.as_str() {
            "add" => {
                let name = next();
                let filename = next();
                let launch_command = next();
                let interval = next();
                let file_contents = next();
                Self::Add {
                    name,
                    filename,
                    launch_command,
                    interval_ms: parse_interval(&interval)?,
                    file_contents,
                }
            }
            "remove" => Self::Remove { name: next() },
            "start" => Self::Start { name: next() },
            "stop" => Self::Stop { name: next() },
            "get" => Self::Get { name: next() },
            "applist" => Self::List,
            _ => Self::Shutdown,
        };
        Ok(command)
    }
}

fn parse_interval(raw: &str) -> Result<u64, CodecError> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(CodecError::InvalidInterval(raw.to_string())),
    }
}

/// Encodes and decodes command payloads in one wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandCodec {
    format: WireFormat,
    delimiter: char,
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::fields()
    }
}

impl CommandCodec {
    /// Length-prefixed field codec
    pub fn fields() -> Self {
        Self {
            format: WireFormat::Fields,
            delimiter: DEFAULT_DELIMITER,
        }
    }

    /// Single-delimiter text codec
    pub fn delimited(delimiter: char) -> Self {
        Self {
            format: WireFormat::Delimited,
            delimiter,
        }
    }

    pub fn new(format: WireFormat, delimiter: char) -> Self {
        Self { format, delimiter }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Decode a frame payload into a command
    pub fn decode(&self, payload: &[u8]) -> Result<Command, CodecError> {
        let fields = match self.format {
            WireFormat::Fields => decode_fields(payload)?,
            WireFormat::Delimited => {
                let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
                split_delimited(text, self.delimiter)
            }
        };
        debug!(format = ?self.format, field_count = fields.len(), "decode: split payload");
        Command::from_fields(fields)
    }

    /// Encode a command into a frame payload
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>, CodecError> {
        let fields = command.to_fields();
        match self.format {
            WireFormat::Fields => Ok(encode_fields(&fields)),
            WireFormat::Delimited => {
                // The final field of `add` survives the bounded split
                let free_tail = matches!(command, Command::Add { .. });
                for (index, field) in fields.iter().enumerate() {
                    let is_tail = index == fields.len() - 1;
                    if field.contains(self.delimiter) && !(free_tail && is_tail) {
                        return Err(CodecError::DelimiterInField {
                            index,
                            delimiter: self.delimiter,
                        });
                    }
                }
                Ok(fields.join(&self.delimiter.to_string()).into_bytes())
            }
        }
    }
}

fn split_delimited(text: &str, delimiter: char) -> Vec<String> {
    let name = text.split(delimiter).next().unwrap_or_default();
    let pieces: Vec<&str> = if name == "add" {
        text.splitn(6, delimiter).collect()
    } else {
        text.split(delimiter).collect()
    };
    pieces.into_iter().map(str::to_string).collect()
}

fn encode_fields<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let total: usize = fields.iter().map(|f| LENGTH_PREFIX_SIZE + f.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for field in fields {
        let bytes = field.as_ref().as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

fn decode_fields(payload: &[u8]) -> Result<Vec<String>, CodecError> {
    let mut fields = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let index = fields.len();
        if rest.len() < LENGTH_PREFIX_SIZE {
            return Err(CodecError::TruncatedField { index });
        }
        let (header, tail) = rest.split_at(LENGTH_PREFIX_SIZE);
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if tail.len() < len {
            return Err(CodecError::TruncatedField { index });
        }
        let (field, tail) = tail.split_at(len);
        let field = String::from_utf8(field.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        fields.push(field);
        rest = tail;
    }
    Ok(fields)
}

/// A server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Enumeration of job names
    List(Vec<String>),
    /// Human-readable status or result text
    Message(String),
    /// Any payload without a recognized prefix
    Raw(String),
}

impl Reply {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }

    /// Render the reply as sent on the wire
    pub fn render(&self) -> String {
        match self {
            Self::List(names) => {
                let json = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string());
                format!("{}{}", LIST_PREFIX, json)
            }
            Self::Message(text) => format!("{}{}", MESSAGE_PREFIX, text),
            Self::Raw(text) => text.clone(),
        }
    }

    /// Parse a reply received from the server
    pub fn parse(text: &str) -> Self {
        if let Some(json) = text.strip_prefix(LIST_PREFIX) {
            return match serde_json::from_str::<Vec<String>>(json) {
                Ok(names) => Self::List(names),
                Err(_) => Self::Raw(text.to_string()),
            };
        }
        if let Some(message) = text.strip_prefix(MESSAGE_PREFIX) {
            return Self::Message(message.to_string());
        }
        Self::Raw(text.to_string())
    }

    /// Text shown to a person running the client
    pub fn display(&self) -> String {
        match self {
            Self::List(names) => {
                let json = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string());
                format!("Доступные программы:\n{}", json)
            }
            Self::Message(text) | Self::Raw(text) => text.clone(),
        }
    }
}
