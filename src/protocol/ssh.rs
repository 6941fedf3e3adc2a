//! SSH agent wire protocol (draft-miller-ssh-agent)
//!
//! Only the parts the filtering proxy needs: framing, identity lists and
//! the key blob of a sign request. Everything else travels as an opaque
//! payload.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ssh_key::{Fingerprint, HashAlg, PublicKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB, same as OpenSSH)
const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Upper bound on identities in one answer
const MAX_IDENTITIES: u32 = 10000;

/// SSH agent message types the proxy distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Failure,
    Success,
    RequestIdentities,
    IdentitiesAnswer,
    SignRequest,
    SignResponse,
    /// Any other type, carried through untouched
    Other(u8),
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            5 => MessageType::Failure,
            6 => MessageType::Success,
            11 => MessageType::RequestIdentities,
            12 => MessageType::IdentitiesAnswer,
            13 => MessageType::SignRequest,
            14 => MessageType::SignResponse,
            other => MessageType::Other(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Failure => 5,
            MessageType::Success => 6,
            MessageType::RequestIdentities => 11,
            MessageType::IdentitiesAnswer => 12,
            MessageType::SignRequest => 13,
            MessageType::SignResponse => 14,
            MessageType::Other(other) => other,
        }
    }
}

/// A key offered by the agent
#[derive(Debug, Clone)]
pub struct Identity {
    /// Raw public key blob
    pub key_blob: Bytes,
    /// Comment associated with the key
    pub comment: String,
    /// Parsed public key, when the blob is well-formed
    pub public_key: Option<PublicKey>,
}

impl Identity {
    pub fn new(key_blob: Bytes, comment: String) -> Self {
        let public_key = PublicKey::from_bytes(&key_blob).ok();
        Self {
            key_blob,
            comment,
            public_key,
        }
    }

    /// SHA256 fingerprint of the key
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.public_key
            .as_ref()
            .map(|k| k.fingerprint(HashAlg::Sha256))
    }
}

/// One SSH agent message (type byte plus payload)
#[derive(Debug, Clone)]
pub struct AgentMessage {
    pub msg_type: MessageType,
    pub payload: Bytes,
}

impl AgentMessage {
    pub fn new(msg_type: MessageType, payload: Bytes) -> Self {
        Self { msg_type, payload }
    }

    /// `SSH_AGENT_FAILURE`
    pub fn failure() -> Self {
        Self::new(MessageType::Failure, Bytes::new())
    }

    /// Decode the identity list of an `SSH_AGENT_IDENTITIES_ANSWER`
    pub fn parse_identities(&self) -> Result<Vec<Identity>> {
        if self.msg_type != MessageType::IdentitiesAnswer {
            return Err(Error::InvalidMessage(format!(
                "Expected IdentitiesAnswer, got {:?}",
                self.msg_type
            )));
        }

        let mut buf = &self.payload[..];
        let count = read_u32(&mut buf)?;
        if count > MAX_IDENTITIES {
            return Err(Error::InvalidMessage(format!(
                "Identity count {} exceeds maximum allowed {}",
                count, MAX_IDENTITIES
            )));
        }

        let mut identities = Vec::new();
        for _ in 0..count {
            let key_blob = read_string(&mut buf)?;
            let comment = String::from_utf8_lossy(&read_string(&mut buf)?).into_owned();
            identities.push(Identity::new(key_blob, comment));
        }
        Ok(identities)
    }

    /// Encode an `SSH_AGENT_IDENTITIES_ANSWER`
    pub fn identities_answer(identities: &[Identity]) -> Self {
        let mut payload = BytesMut::new();
        payload.put_u32(identities.len() as u32);
        for identity in identities {
            payload.put_u32(identity.key_blob.len() as u32);
            payload.put_slice(&identity.key_blob);
            payload.put_u32(identity.comment.len() as u32);
            payload.put_slice(identity.comment.as_bytes());
        }
        Self::new(MessageType::IdentitiesAnswer, payload.freeze())
    }

    /// Key blob addressed by an `SSH_AGENTC_SIGN_REQUEST`
    pub fn sign_request_key(&self) -> Result<Bytes> {
        if self.msg_type != MessageType::SignRequest {
            return Err(Error::InvalidMessage(format!(
                "Expected SignRequest, got {:?}",
                self.msg_type
            )));
        }
        let mut buf = &self.payload[..];
        read_string(&mut buf)
    }

    /// Frame the message (length prefix, type byte, payload)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.payload.len());
        buf.put_u32(1 + self.payload.len() as u32);
        buf.put_u8(self.msg_type.into());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidMessage("Message too short".to_string()));
    }
    Ok(buf.get_u32())
}

fn read_string(buf: &mut &[u8]) -> Result<Bytes> {
    let len = read_u32(buf)?;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "Field size {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_SIZE
        )));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(Error::InvalidMessage("Field truncated".to_string()));
    }
    let value = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(value)
}

/// Read one framed message; `None` on clean end-of-stream
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<AgentMessage>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(Error::InvalidMessage("Zero-length message".to_string()));
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(AgentMessage::new(
        MessageType::from(body[0]),
        Bytes::copy_from_slice(&body[1..]),
    )))
}

/// Write one framed message and flush it
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &AgentMessage) -> Result<()> {
    writer.write_all(&msg.encode()).await?;
    writer.flush().await?;
    Ok(())
}
