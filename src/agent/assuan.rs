//! gpg-agent Assuan filter
//!
//! Reads the client's commands line by line, tracks the key selected with
//! `SETKEY`/`SIGKEY`, and refuses `PKSIGN`/`PKDECRYPT` for keys outside the
//! allow-list with a synthesized `ERR` line. Denied commands never reach
//! the upstream agent. Every other line is forwarded unchanged and the
//! upstream response is relayed up to its terminating line.

use super::handler::ConnectionContext;
use crate::error::{Error, Result};
use crate::filter::{KeyAllowList, normalize_key_id};
use crate::logging::{AuditEvent, Decision};
use crate::protocol::assuan::{
    Command, CommandKind, ResponseLine, denied_line, read_line, trim_line_ending, write_line,
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, trace};

/// Key-id gate for one gpg-agent proxy
#[derive(Debug, Clone, Default)]
pub struct AssuanFilter {
    allowed: KeyAllowList,
}

/// Per-connection key selection and inquiry state
#[derive(Debug, Default)]
pub struct AssuanSession {
    current_key_id: String,
    selection_rejected: bool,
    inquiring: bool,
}

impl AssuanSession {
    /// The key id last selected by the client, uppercased
    pub fn current_key_id(&self) -> &str {
        &self.current_key_id
    }

    fn select_key(&mut self, id: &str) {
        self.current_key_id = normalize_key_id(id);
        self.selection_rejected = false;
    }

    /// The agent refused the last selection and may still hold an earlier
    /// key, so gated operations stay closed until a selection succeeds
    fn reject_selection(&mut self) {
        self.selection_rejected = true;
    }

    fn permits(&self, allowed: &KeyAllowList) -> bool {
        if allowed.is_empty() {
            return true;
        }
        !self.selection_rejected && allowed.is_allowed(&self.current_key_id)
    }
}

/// How an upstream response ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseEnd {
    Ok,
    Err,
    Inquire,
}

impl AssuanFilter {
    pub fn new(allowed: KeyAllowList) -> Self {
        Self { allowed }
    }

    pub fn allowed_keys(&self) -> &KeyAllowList {
        &self.allowed
    }

    /// Serve one client over an already dialed upstream connection
    pub async fn serve<C, U>(&self, client: C, upstream: U, ctx: &ConnectionContext) -> Result<()>
    where
        C: AsyncRead + AsyncWrite,
        U: AsyncRead + AsyncWrite,
    {
        let (client_read, mut client_write) = tokio::io::split(client);
        let (upstream_read, mut upstream_write) = tokio::io::split(upstream);
        let mut client_read = BufReader::new(client_read);
        let mut upstream_read = BufReader::new(upstream_read);
        let mut session = AssuanSession::default();

        match read_line(&mut upstream_read).await? {
            Some(greeting) => write_line(&mut client_write, &greeting).await?,
            None => {
                return Err(Error::Protocol(
                    "Upstream agent closed before sending a greeting".to_string(),
                ));
            }
        }

        while let Some(line) = read_line(&mut client_read).await? {
            let command = Command::parse(&line);
            trace!(proxy = %ctx.proxy, keyword = %command.keyword, "Client command");

            if let Some(operation) = command.kind.operation() {
                let decision = Decision::from_allowed(session.permits(&self.allowed));
                ctx.record(AuditEvent::key_operation(
                    ctx.proxy.as_ref(),
                    operation,
                    session.current_key_id(),
                    decision,
                ));
                if !decision.is_allowed() {
                    write_line(&mut client_write, denied_line().as_bytes()).await?;
                    continue;
                }
            }

            if command.kind == CommandKind::SelectKey {
                match &command.argument {
                    Some(id) => session.select_key(id),
                    None => debug!(proxy = %ctx.proxy, "Key selection without an argument"),
                }
            }

            write_line(&mut upstream_write, &line).await?;
            if !command.kind.expects_response(session.inquiring) {
                continue;
            }

            let end = relay_response(&mut upstream_read, &mut client_write).await?;
            session.inquiring = end == ResponseEnd::Inquire;
            if command.kind == CommandKind::SelectKey && end == ResponseEnd::Err {
                session.reject_selection();
            }
        }

        Ok(())
    }
}

/// Copy upstream lines to the client until the response is complete
async fn relay_response<R, W>(upstream: &mut R, client: &mut W) -> Result<ResponseEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = read_line(upstream).await?.ok_or_else(|| {
            Error::Protocol("Upstream agent closed in the middle of a response".to_string())
        })?;
        write_line(client, &line).await?;

        match ResponseLine::classify(&line) {
            ResponseLine::Continue => {}
            ResponseLine::Inquire => return Ok(ResponseEnd::Inquire),
            ResponseLine::Terminal => {
                return Ok(if trim_line_ending(&line).starts_with(b"ERR") {
                    ResponseEnd::Err
                } else {
                    ResponseEnd::Ok
                });
            }
        }
    }
}
