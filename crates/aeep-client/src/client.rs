//! [`AeepClient`]: the HTTP-facing half of the SDK.
//!
//! Plays the role the teacher's `X402Client` plays for the payer side of
//! x402, but as a direct client rather than request middleware — AEEP's
//! negotiation messages are explicit calls the caller makes one at a time,
//! not payments injected transparently behind an arbitrary HTTP request.

use std::sync::Arc;

use aeep_types::signing::Ed25519Keypair;
use aeep_types::{Did, DidDocument, Envelope, MessageType};
use reqwest::{Client as HttpClient, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::builder::build_envelope;
use crate::error::ClientError;

/// An agent's SDK handle to one AEEP server: registers, discovers peers,
/// signs and sends negotiation messages, polls its queue, and opens the
/// push stream.
#[derive(Clone)]
pub struct AeepClient {
    http: HttpClient,
    base_url: Url,
    did: Did,
    keypair: Arc<Ed25519Keypair>,
}

impl AeepClient {
    /// Wraps an already-registered (or about-to-register) agent identity.
    pub fn new(base_url: Url, did: Did, keypair: Ed25519Keypair) -> Self {
        Self {
            http: HttpClient::new(),
            base_url,
            did,
            keypair: Arc::new(keypair),
        }
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Registers this agent. Signed with its own key, carried in a
    /// heartbeat-typed envelope since registration predates the agent
    /// having a stored DID document for the server to check against.
    #[instrument(skip_all, fields(did = %self.did))]
    pub async fn register(
        &self,
        did_document: DidDocument,
        display_name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
        payment_address: impl Into<String>,
        capabilities: Vec<(String, Value)>,
    ) -> Result<Value, ClientError> {
        let envelope = build_envelope(
            &self.keypair,
            MessageType::Heartbeat,
            self.did.clone(),
            self.did.clone(),
            &json!({
                "availability": "unknown",
                "display_name": display_name.into(),
                "description": description.into(),
                "endpoint": endpoint.into(),
                "payment_address": payment_address.into(),
                "capabilities": capabilities,
            }),
            None,
        )?;
        let body = json!({
            "envelope": envelope,
            "did_document": did_document,
            "public_key": aeep_types::util::encode_str(self.keypair.public_key_bytes()),
        });
        self.post_json("/api/v1/agents", &body).await
    }

    /// Sends a heartbeat carrying the new availability state.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, availability: aeep_types::Availability) -> Result<Value, ClientError> {
        let envelope = build_envelope(
            &self.keypair,
            MessageType::Heartbeat,
            self.did.clone(),
            self.did.clone(),
            &json!({ "availability": availability }),
            None,
        )?;
        self.post_json(
            &format!("/api/v1/agents/{}/heartbeat", self.did.agent_id()),
            &envelope,
        )
        .await
    }

    /// Revokes this agent's own DID. Terminal: the status graph has no
    /// out-edge from `revoked`.
    #[instrument(skip(self))]
    pub async fn revoke(&self) -> Result<Value, ClientError> {
        let envelope = build_envelope(
            &self.keypair,
            MessageType::Heartbeat,
            self.did.clone(),
            self.did.clone(),
            &json!({}),
            None,
        )?;
        self.post_json(&format!("/api/v1/agents/{}/revoke", self.did.agent_id()), &envelope)
            .await
    }

    /// Reactivates this agent's own DID from `deactivated` back to `active`.
    #[instrument(skip(self))]
    pub async fn reactivate(&self) -> Result<Value, ClientError> {
        let envelope = build_envelope(
            &self.keypair,
            MessageType::Heartbeat,
            self.did.clone(),
            self.did.clone(),
            &json!({}),
            None,
        )?;
        self.post_json(
            &format!("/api/v1/agents/{}/reactivate", self.did.agent_id()),
            &envelope,
        )
        .await
    }

    /// Discovers agents matching the supplied query-string filters (e.g.
    /// `capability`, `trust_min`, `status`, `availability`, `limit`,
    /// `offset`).
    pub async fn discover(&self, query: &[(&str, String)]) -> Result<Value, ClientError> {
        let mut url = self.url("/api/v1/agents");
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        self.get_json(url).await
    }

    /// Fetches one agent's public card.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Value, ClientError> {
        self.get_json(self.url(&format!("/api/v1/agents/{agent_id}")))
            .await
    }

    /// Signs and sends a negotiation message (`request`/`offer`/`accept`/
    /// `reject`/`result`/`verify`/`payment`/`payment-failed`).
    #[instrument(skip(self, payload), fields(to = %to))]
    pub async fn send<T: Serialize>(
        &self,
        message_type: MessageType,
        to: Did,
        payload: &T,
        expires_in_seconds: Option<i64>,
    ) -> Result<Value, ClientError> {
        let envelope = build_envelope(
            &self.keypair,
            message_type,
            self.did.clone(),
            to,
            payload,
            expires_in_seconds,
        )?;
        debug!(id = %envelope.id, "sending envelope");
        self.post_json("/api/v1/messages", &envelope).await
    }

    /// Polls this agent's queued messages, marking each returned envelope
    /// delivered server-side.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<Vec<Envelope>, ClientError> {
        let mut url = self.url(&format!("/api/v1/messages/{}", self.did.agent_id()));
        url.query_pairs_mut().append_pair("did", self.did.as_str());
        let response = self.http.get(url).send().await?;
        let response = Self::check_status(response).await?;
        let messages = response.json::<Vec<Envelope>>().await?;
        debug!(count = messages.len(), "polled messages");
        Ok(messages)
    }

    /// Opens the push stream and returns the raw SSE response for the
    /// caller to consume with their own event loop — left un-opinionated
    /// about framing the same way `reqwest::Response::bytes_stream` is.
    pub async fn stream(&self) -> Result<Response, ClientError> {
        let mut url = self.url(&format!("/api/v1/messages/{}/stream", self.did.agent_id()));
        url.query_pairs_mut().append_pair("did", self.did.as_str());
        let response = self.http.get(url).send().await?;
        Self::check_status(response).await
    }

    /// Looks up an interaction's verification status by its hash.
    pub async fn verify_status(&self, interaction_hash: &str) -> Result<Value, ClientError> {
        self.get_json(self.url(&format!("/api/v1/verify/{interaction_hash}")))
            .await
    }

    fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("path is a valid relative URL")
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let response = self.http.get(url).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: Response) -> Result<Response, ClientError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let code = body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        Err(ClientError::Server { code, message })
    }
}
