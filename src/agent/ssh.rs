//! ssh-agent filter
//!
//! Narrows `SSH_AGENT_IDENTITIES_ANSWER` to the allowed fingerprints and
//! answers sign requests for any other key with `SSH_AGENT_FAILURE`
//! without contacting the upstream agent.

use super::handler::ConnectionContext;
use crate::error::{Error, Result};
use crate::filter::FingerprintAllowList;
use crate::logging::{AuditEvent, Decision};
use crate::protocol::ssh::{read_message, write_message};
use crate::protocol::{AgentMessage, Identity, MessageType};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

/// Operation name recorded for sign requests
const SIGN_OPERATION: &str = "SIGN_REQUEST";

/// Fingerprint filter for one ssh-agent proxy
#[derive(Debug, Clone, Default)]
pub struct SshAgentFilter {
    allowed: FingerprintAllowList,
}

impl SshAgentFilter {
    pub fn new(allowed: FingerprintAllowList) -> Self {
        Self { allowed }
    }

    pub fn allowed_fingerprints(&self) -> &FingerprintAllowList {
        &self.allowed
    }

    /// Serve one client over an already dialed upstream connection
    pub async fn serve<C, U>(&self, client: C, upstream: U, ctx: &ConnectionContext) -> Result<()>
    where
        C: AsyncRead + AsyncWrite,
        U: AsyncRead + AsyncWrite,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

        while let Some(request) = read_message(&mut client_read).await? {
            trace!(proxy = %ctx.proxy, msg_type = ?request.msg_type, "Client request");

            let response = match request.msg_type {
                MessageType::RequestIdentities => {
                    write_message(&mut upstream_write, &request).await?;
                    let answer = read_response(&mut upstream_read).await?;
                    self.filter_identities(answer, ctx)
                }
                MessageType::SignRequest if !self.sign_permitted(&request, ctx) => {
                    AgentMessage::failure()
                }
                _ => {
                    write_message(&mut upstream_write, &request).await?;
                    read_response(&mut upstream_read).await?
                }
            };

            write_message(&mut client_write, &response).await?;
        }

        Ok(())
    }

    fn filter_identities(&self, answer: AgentMessage, ctx: &ConnectionContext) -> AgentMessage {
        if answer.msg_type != MessageType::IdentitiesAnswer {
            warn!(msg_type = ?answer.msg_type, "Unexpected response to REQUEST_IDENTITIES");
            return answer;
        }

        let identities = match answer.parse_identities() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to parse identities from upstream");
                return AgentMessage::failure();
            }
        };

        let total = identities.len();
        let filtered: Vec<Identity> = identities
            .into_iter()
            .filter(|id| self.allowed.matches(id))
            .collect();

        debug!(
            proxy = %ctx.proxy,
            total = total,
            filtered = filtered.len(),
            "Filtered identities"
        );
        ctx.record(AuditEvent::identities_filtered(
            ctx.proxy.as_ref(),
            total as u32,
            filtered.len() as u32,
        ));

        AgentMessage::identities_answer(&filtered)
    }

    fn sign_permitted(&self, request: &AgentMessage, ctx: &ConnectionContext) -> bool {
        let (key_id, allowed) = match request.sign_request_key() {
            Ok(blob) => {
                let identity = Identity::new(blob, String::new());
                let key_id = identity
                    .fingerprint()
                    .map(|fp| fp.to_string())
                    .unwrap_or_else(|| "<unparseable key>".to_string());
                (key_id, self.allowed.matches(&identity))
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse sign request");
                ("<malformed request>".to_string(), false)
            }
        };

        ctx.record(AuditEvent::key_operation(
            ctx.proxy.as_ref(),
            SIGN_OPERATION,
            key_id,
            Decision::from_allowed(allowed),
        ));
        allowed
    }
}

async fn read_response<R: AsyncRead + Unpin>(upstream: &mut R) -> Result<AgentMessage> {
    read_message(upstream)
        .await?
        .ok_or_else(|| Error::Protocol("Upstream agent closed before responding".to_string()))
}
