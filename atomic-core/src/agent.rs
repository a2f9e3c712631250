//! Signing identities.
//!
//! An [`Agent`] is an ed25519 key pair plus the URL of the Agent resource on
//! a server. Keys travel as base64 strings, the same way they are stored in
//! the `publicKey` property of an Agent resource.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::AtomicError;

pub const HEADER_PUBLIC_KEY: &str = "x-atomic-public-key";
pub const HEADER_SIGNATURE: &str = "x-atomic-signature";
pub const HEADER_TIMESTAMP: &str = "x-atomic-timestamp";
pub const HEADER_AGENT: &str = "x-atomic-agent";

/// A base64 encoded ed25519 key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generates a fresh ed25519 key pair.
pub fn generate_key_pair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    KeyPair {
        private_key: STANDARD.encode(signing_key.to_bytes()),
        public_key: STANDARD.encode(signing_key.verifying_key().as_bytes()),
    }
}

/// Derives the base64 public key from a base64 private key.
pub fn generate_public_key_from_private(private_key: &str) -> Result<String, AtomicError> {
    let signing_key = decode_signing_key(private_key)?;
    Ok(STANDARD.encode(signing_key.verifying_key().as_bytes()))
}

/// Strictly verifies a base64 signature over `message`.
pub fn verify_signature(
    public_key: &str,
    message: &[u8],
    signature: &str,
) -> Result<(), AtomicError> {
    let key_bytes: [u8; 32] = decode_fixed(public_key, "public key")?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| AtomicError::InvalidKey(format!("public key: {e}")))?;
    let sig_bytes: [u8; 64] = decode_fixed(signature, "signature")
        .map_err(|e| AtomicError::InvalidSignature(e.to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify_strict(message, &signature)
        .map_err(|e| AtomicError::InvalidSignature(e.to_string()))
}

fn decode_signing_key(private_key: &str) -> Result<SigningKey, AtomicError> {
    let bytes: [u8; 32] = decode_fixed(private_key, "private key")?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn decode_fixed<const N: usize>(b64: &str, what: &str) -> Result<[u8; N], AtomicError> {
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|e| AtomicError::InvalidKey(format!("{what} is not base64: {e}")))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| AtomicError::InvalidKey(format!("{what} must be {N} bytes, got {len}")))
}

/// Serialized form of an agent secret: base64 of this JSON object.
#[derive(Serialize, Deserialize)]
struct AgentSecret {
    #[serde(rename = "privateKey")]
    private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
}

/// A signing identity.
#[derive(Clone)]
pub struct Agent {
    signing_key: SigningKey,
    private_key: String,
    public_key: String,
    subject: Option<String>,
}

impl Agent {
    /// Creates an agent from a base64 private key. The public key is derived.
    pub fn from_private_key(
        private_key: &str,
        subject: Option<String>,
    ) -> Result<Self, AtomicError> {
        let signing_key = decode_signing_key(private_key)?;
        let public_key = STANDARD.encode(signing_key.verifying_key().as_bytes());
        Ok(Agent {
            signing_key,
            private_key: private_key.trim().to_string(),
            public_key,
            subject,
        })
    }

    /// Creates an agent with a freshly generated key pair.
    pub fn generate(subject: Option<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Agent {
            private_key: STANDARD.encode(signing_key.to_bytes()),
            public_key: STANDARD.encode(signing_key.verifying_key().as_bytes()),
            signing_key,
            subject,
        }
    }

    /// Decodes a secret produced by [`Agent::to_secret`].
    pub fn from_secret(secret: &str) -> Result<Self, AtomicError> {
        let json = STANDARD
            .decode(secret.trim())
            .map_err(|e| AtomicError::InvalidKey(format!("agent secret is not base64: {e}")))?;
        let parsed: AgentSecret = serde_json::from_slice(&json)
            .map_err(|e| AtomicError::InvalidKey(format!("agent secret is malformed: {e}")))?;
        Agent::from_private_key(&parsed.private_key, parsed.subject)
    }

    /// Exports the agent as base64 of `{"privateKey": .., "subject": ..}`.
    pub fn to_secret(&self) -> String {
        let secret = AgentSecret {
            private_key: self.private_key.clone(),
            subject: self.subject.clone(),
        };
        // Serializing two strings into JSON cannot fail.
        let json = serde_json::to_vec(&secret).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = Some(subject.into());
    }

    /// Signs `message` and returns the base64 signature.
    pub fn sign_message(&self, message: &[u8]) -> String {
        STANDARD.encode(self.signing_key.sign(message).to_bytes())
    }

    /// Builds the authentication headers for a request to `subject`.
    ///
    /// The signed message is `"<subject> <timestamp>"`.
    pub fn signed_headers(
        &self,
        subject: &str,
        timestamp: i64,
    ) -> Result<Vec<(String, String)>, AtomicError> {
        let agent = self.subject().ok_or(AtomicError::AgentSubjectMissing)?;
        let signature = self.sign_message(format!("{subject} {timestamp}").as_bytes());
        Ok(vec![
            (HEADER_PUBLIC_KEY.to_string(), self.public_key.clone()),
            (HEADER_SIGNATURE.to_string(), signature),
            (HEADER_TIMESTAMP.to_string(), timestamp.to_string()),
            (HEADER_AGENT.to_string(), agent.to_string()),
        ])
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("public_key", &self.public_key)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.private_key == other.private_key && self.subject == other.subject
    }
}
