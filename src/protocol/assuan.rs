//! Assuan line protocol used by gpg-agent
//!
//! Every message is a single newline-terminated line. A client command is
//! a keyword followed by optional arguments; the server answers with any
//! number of data (`D`), status (`S`) or comment (`#`) lines and finishes
//! with `OK`, `ERR` or `END`. An `INQUIRE` line asks the client for data
//! and hands the turn back to it until it replies with `END` or `CAN`.

use crate::error::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest line accepted from either side, newline included
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// libgpg-error source id for gpg-agent
const GPG_ERR_SOURCE_GPGAGENT: u32 = 4;

/// libgpg-error `GPG_ERR_FORBIDDEN`
const GPG_ERR_FORBIDDEN: u32 = 251;

/// Error code carried by the synthesized denial line
pub const DENIED_ERROR_CODE: u32 = (GPG_ERR_SOURCE_GPGAGENT << 24) | GPG_ERR_FORBIDDEN;

/// Message carried by the synthesized denial line
pub const DENIED_MESSAGE: &str = "Key not allowed by proxy";

/// Client commands the proxy interprets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `SETKEY` / `SIGKEY`: select the key for later operations
    SelectKey,
    /// `PKSIGN`
    Sign,
    /// `PKDECRYPT`
    Decrypt,
    /// `D` data line; only expected while answering an inquiry
    Data,
    /// `END` / `CAN` closing an inquiry
    InquiryEnd,
    /// `#` comment or empty line, ignored by the server
    Comment,
    /// Anything else, passed through
    Other,
}

impl CommandKind {
    /// Whether the server sends a response to this line
    ///
    /// Data lines are consumed silently only while an inquiry is pending;
    /// outside one the server rejects them with an `ERR` line.
    pub fn expects_response(self, inquiring: bool) -> bool {
        match self {
            CommandKind::Comment => false,
            CommandKind::Data => !inquiring,
            _ => true,
        }
    }

    /// Operation name for audit events, for gated commands
    pub fn operation(self) -> Option<&'static str> {
        match self {
            CommandKind::Sign => Some("PKSIGN"),
            CommandKind::Decrypt => Some("PKDECRYPT"),
            _ => None,
        }
    }
}

/// A parsed client command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Classification of the keyword
    pub kind: CommandKind,
    /// The first whitespace-delimited token, as sent
    pub keyword: String,
    /// The second whitespace-delimited token, if any
    pub argument: Option<String>,
}

impl Command {
    /// Parse a raw line (with or without its trailing newline)
    pub fn parse(line: &[u8]) -> Self {
        let text = String::from_utf8_lossy(line);
        let mut tokens = text.split_whitespace();
        let keyword = tokens.next().unwrap_or_default().to_string();
        let argument = tokens.next().map(str::to_string);

        let kind = if text.starts_with('#') || trim_line_ending(line).is_empty() {
            CommandKind::Comment
        } else {
            match keyword.to_ascii_uppercase().as_str() {
                "SETKEY" | "SIGKEY" => CommandKind::SelectKey,
                "PKSIGN" => CommandKind::Sign,
                "PKDECRYPT" => CommandKind::Decrypt,
                "D" => CommandKind::Data,
                "END" | "CAN" => CommandKind::InquiryEnd,
                _ => CommandKind::Other,
            }
        };

        Self {
            kind,
            keyword,
            argument,
        }
    }
}

/// How a server line affects the response relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLine {
    /// More lines follow
    Continue,
    /// The response is complete
    Terminal,
    /// The server asked the client for data; the client speaks next
    Inquire,
}

impl ResponseLine {
    /// Classify a server line
    pub fn classify(line: &[u8]) -> Self {
        let line = trim_line_ending(line);
        if line.starts_with(b"OK") || line.starts_with(b"ERR") || line == b"END" {
            ResponseLine::Terminal
        } else if line.starts_with(b"INQUIRE") {
            ResponseLine::Inquire
        } else {
            ResponseLine::Continue
        }
    }
}

/// Strip a trailing `\n` or `\r\n`
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// The line sent to a client whose gated command was refused
pub fn denied_line() -> String {
    format!("ERR {} {}\n", DENIED_ERROR_CODE, DENIED_MESSAGE)
}

/// Read one line including its newline
///
/// Returns `None` on a clean end-of-stream. A final line without a newline
/// is returned as-is.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LENGTH as u64);
    let n = limited.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") && n >= MAX_LINE_LENGTH {
        return Err(Error::Protocol(format!(
            "Assuan line exceeds {} bytes",
            MAX_LINE_LENGTH
        )));
    }
    Ok(Some(line))
}

/// Write one line and flush it
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> Result<()> {
    writer.write_all(line).await?;
    writer.flush().await?;
    Ok(())
}
