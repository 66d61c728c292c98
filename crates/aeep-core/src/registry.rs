//! Identity and discovery registry (§4.6).

use aeep_types::{Availability, Did, DidDocument, DidStatus, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::RegistryError;
use crate::store::{AgentRow, CapabilityRow, Store};
use crate::trust;

/// Threshold past which a periodic sweep marks an agent's availability as
/// `unknown`.
pub const HEARTBEAT_TIMEOUT_SECONDS: i64 = 300;

/// Fields a caller may update about their own agent record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentUpdate {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub endpoint: Option<String>,
    pub payment_address: Option<String>,
    pub capabilities: Option<Vec<(String, serde_json::Value)>>,
}

/// Flat per-agent discovery result, as shaped by the discovery endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub id: String,
    pub did: Did,
    pub name: String,
    pub trust_score: f64,
    pub capabilities: Vec<String>,
    pub pricing_hint: serde_json::Value,
    pub status: DidStatus,
    pub availability: Availability,
    pub last_seen_at: Timestamp,
}

/// Filters accepted by the discovery query.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub capability: Option<String>,
    pub trust_min: Option<f64>,
    pub status: Option<DidStatus>,
    pub availability: Option<Availability>,
    pub limit: usize,
    pub offset: usize,
}

impl DiscoveryFilter {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 100;
}

/// Registers a new agent. Duplicate DIDs are rejected.
#[instrument(skip_all, err, fields(did = %did))]
pub fn register(
    store: &dyn Store,
    did: Did,
    did_document: DidDocument,
    display_name: String,
    description: String,
    endpoint: String,
    payment_address: String,
    capabilities: Vec<(String, serde_json::Value)>,
) -> Result<AgentRow, RegistryError> {
    if store.get_agent_by_did(&did).is_some() {
        return Err(RegistryError::AgentExists);
    }
    let now = Timestamp::now();
    let agent = AgentRow {
        id: did.agent_id().to_string(),
        did: did.clone(),
        status: DidStatus::Active,
        availability: Availability::Unknown,
        last_seen_at: now,
        display_name,
        description,
        endpoint,
        payment_address,
        trust_score: 0.50,
        interaction_count: 0,
        successful_count: 0,
        failed_count: 0,
        dispute_count: 0,
        did_document,
        created_at: now,
    };
    store
        .insert_agent(agent.clone())
        .map_err(|_| RegistryError::AgentExists)?;
    let rows = capabilities
        .into_iter()
        .map(|(name, metadata)| CapabilityRow {
            agent_id: agent.id.clone(),
            name,
            metadata,
        })
        .collect();
    store.replace_capabilities(&agent.id, rows);
    Ok(agent)
}

/// Updates a self-owned agent record. Capability replacement is atomic.
#[instrument(skip_all, err, fields(agent_id = %agent_id))]
pub fn update(
    store: &dyn Store,
    agent_id: &str,
    requester: &Did,
    patch: AgentUpdate,
) -> Result<AgentRow, RegistryError> {
    let mut agent = store
        .get_agent(agent_id)
        .ok_or(RegistryError::AgentNotFound)?;
    if &agent.did != requester {
        return Err(RegistryError::NotOwner);
    }
    if let Some(name) = patch.display_name {
        agent.display_name = name;
    }
    if let Some(description) = patch.description {
        agent.description = description;
    }
    if let Some(endpoint) = patch.endpoint {
        agent.endpoint = endpoint;
    }
    if let Some(address) = patch.payment_address {
        agent.payment_address = address;
    }
    store.update_agent(agent.clone())?;
    if let Some(capabilities) = patch.capabilities {
        let rows = capabilities
            .into_iter()
            .map(|(name, metadata)| CapabilityRow {
                agent_id: agent_id.to_string(),
                name,
                metadata,
            })
            .collect();
        store.replace_capabilities(agent_id, rows);
    }
    Ok(agent)
}

/// Deactivates a self-owned agent: status `deactivated`, availability
/// `offline`. Allowed only from `active` (§3's DID status transition graph).
#[instrument(skip_all, err, fields(agent_id = %agent_id))]
pub fn deactivate(
    store: &dyn Store,
    agent_id: &str,
    requester: &Did,
) -> Result<AgentRow, RegistryError> {
    let mut agent = store
        .get_agent(agent_id)
        .ok_or(RegistryError::AgentNotFound)?;
    if &agent.did != requester {
        return Err(RegistryError::NotOwner);
    }
    if !agent.status.can_transition_to(DidStatus::Deactivated) {
        return Err(RegistryError::InvalidTransition);
    }
    agent.status = DidStatus::Deactivated;
    agent.availability = Availability::Offline;
    store.update_agent(agent.clone())?;
    Ok(agent)
}

/// Revokes a self-owned agent's DID: status `revoked`, availability
/// `offline`. Allowed only from `active`; terminal — the graph has no
/// out-edge from `revoked`.
#[instrument(skip_all, err, fields(agent_id = %agent_id))]
pub fn revoke(
    store: &dyn Store,
    agent_id: &str,
    requester: &Did,
) -> Result<AgentRow, RegistryError> {
    let mut agent = store
        .get_agent(agent_id)
        .ok_or(RegistryError::AgentNotFound)?;
    if &agent.did != requester {
        return Err(RegistryError::NotOwner);
    }
    if !agent.status.can_transition_to(DidStatus::Revoked) {
        return Err(RegistryError::InvalidTransition);
    }
    agent.status = DidStatus::Revoked;
    agent.availability = Availability::Offline;
    store.update_agent(agent.clone())?;
    Ok(agent)
}

/// Reactivates a self-owned agent from `deactivated` back to `active`, the
/// one inbound edge the status graph allows into a non-initial state.
#[instrument(skip_all, err, fields(agent_id = %agent_id))]
pub fn reactivate(
    store: &dyn Store,
    agent_id: &str,
    requester: &Did,
) -> Result<AgentRow, RegistryError> {
    let mut agent = store
        .get_agent(agent_id)
        .ok_or(RegistryError::AgentNotFound)?;
    if &agent.did != requester {
        return Err(RegistryError::NotOwner);
    }
    if !agent.status.can_transition_to(DidStatus::Active) {
        return Err(RegistryError::InvalidTransition);
    }
    agent.status = DidStatus::Active;
    agent.availability = Availability::Unknown;
    store.update_agent(agent.clone())?;
    Ok(agent)
}

/// Refreshes `last_seen_at` and availability for a self-owned agent.
#[instrument(skip_all, err, fields(agent_id = %agent_id))]
pub fn heartbeat(
    store: &dyn Store,
    agent_id: &str,
    requester: &Did,
    availability: Availability,
) -> Result<AgentRow, RegistryError> {
    let mut agent = store
        .get_agent(agent_id)
        .ok_or(RegistryError::AgentNotFound)?;
    if &agent.did != requester {
        return Err(RegistryError::NotOwner);
    }
    agent.last_seen_at = Timestamp::now();
    agent.availability = availability;
    store.update_agent(agent.clone())?;
    Ok(agent)
}

/// The trust score an agent presents right now: its stored, history-derived
/// score with inactivity decay (§4.5) applied against days since
/// `last_seen_at`. The stored value itself is never rewritten by decay —
/// only a fresh `completed`/`payment-failed`/`disputed` transition
/// recomputes and persists it — so a reactivated agent's history-derived
/// score is exactly what it was before it went quiet.
pub fn effective_trust_score(agent: &AgentRow) -> f64 {
    let days_inactive = Timestamp::now().elapsed_since(&agent.last_seen_at) as f64 / 86_400.0;
    trust::apply_decay(agent.trust_score, days_inactive)
}

/// Discovery: agents matching every supplied filter, ordered by trust
/// score descending, paginated.
pub fn discover(store: &dyn Store, filter: &DiscoveryFilter) -> Vec<DiscoveryResult> {
    let limit = filter.limit.clamp(1, DiscoveryFilter::MAX_LIMIT);
    let mut agents: Vec<AgentRow> = store
        .list_agents()
        .into_iter()
        .filter(|agent| {
            filter
                .status
                .is_none_or(|s| agent.status == s)
        })
        .filter(|agent| {
            filter
                .availability
                .is_none_or(|a| agent.availability == a)
        })
        .filter(|agent| filter.trust_min.is_none_or(|min| effective_trust_score(agent) >= min))
        .filter(|agent| {
            filter.capability.as_ref().is_none_or(|cap| {
                store
                    .capabilities_for(&agent.id)
                    .iter()
                    .any(|c| &c.name == cap)
            })
        })
        .collect();

    agents.sort_by(|a, b| {
        effective_trust_score(b).total_cmp(&effective_trust_score(a))
    });

    agents
        .into_iter()
        .skip(filter.offset)
        .take(limit)
        .map(|agent| {
            let capabilities = store.capabilities_for(&agent.id);
            DiscoveryResult {
                id: agent.id.clone(),
                did: agent.did.clone(),
                name: agent.display_name.clone(),
                trust_score: effective_trust_score(&agent),
                capabilities: capabilities.iter().map(|c| c.name.clone()).collect(),
                pricing_hint: capabilities
                    .first()
                    .map(|c| c.metadata.clone())
                    .unwrap_or(serde_json::Value::Null),
                status: agent.status,
                availability: agent.availability,
                last_seen_at: agent.last_seen_at,
            }
        })
        .collect()
}

/// Background sweep: marks agents whose `last_seen_at` is stale as
/// `unknown`.
pub fn sweep_stale_heartbeats(store: &dyn Store, timeout_seconds: i64) -> u64 {
    let now = Timestamp::now();
    let mut count = 0;
    for mut agent in store.list_agents() {
        if agent.availability == Availability::Unknown {
            continue;
        }
        if now.elapsed_since(&agent.last_seen_at) > timeout_seconds {
            agent.availability = Availability::Unknown;
            if store.update_agent(agent).is_ok() {
                count += 1;
            }
        }
    }
    count
}

impl From<crate::error::StoreError> for RegistryError {
    fn from(err: crate::error::StoreError) -> Self {
        RegistryError::Store(err)
    }
}
