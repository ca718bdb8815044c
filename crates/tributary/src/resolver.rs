//! Resolves which projects an event is live for.
//!
//! An event reaches a project only when every level of the tenancy chain is
//! enabled: the event source, the source's account, the binding, the
//! project, and the project's account. The first two levels gate the whole
//! event (an ignore); the rest gate individual projects.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{
    Account, AccountName, Binding, Event, EventId, EventSource, Project, ProjectId, SourceId,
};
use crate::store::{AccountStore, BindingQuery, EventSourceStore, EventStore, ProjectStore};

pub const SOURCE_DISABLED: &str = "event source disabled";
pub const SOURCE_ACCOUNT_DISABLED: &str = "event source account disabled";

/// An association token after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    /// Token bindings are matched against.
    pub token: String,
    /// Display name to use for the matched binding instead of its own.
    pub binding_name: Option<String>,
}

/// Interprets the association token carried by an event.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> DecodedToken;
}

/// Tokens are matched verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTokens;

impl TokenDecoder for PlainTokens {
    fn decode(&self, raw: &str) -> DecodedToken {
        DecodedToken {
            token: raw.to_string(),
            binding_name: None,
        }
    }
}

/// Local testing mode: `"<token>,<binding name>"` matches on `<token>` and
/// renames the matched binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct LitterboxTokens;

impl TokenDecoder for LitterboxTokens {
    fn decode(&self, raw: &str) -> DecodedToken {
        match raw.split_once(',') {
            Some((token, name)) => DecodedToken {
                token: token.to_string(),
                binding_name: Some(name.to_string()),
            },
            None => PlainTokens.decode(raw),
        }
    }
}

/// What to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub event_id: EventId,
    pub source_id: SourceId,
    pub association_token: String,
}

/// Everything the orchestrator needs once an event is not ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBindings {
    pub source: EventSource,
    pub account: Account,
    pub event: Event,
    /// Enabled, exactly-matching bindings of live projects.
    pub bindings: BTreeMap<ProjectId, Binding>,
    /// Live projects.
    pub projects: BTreeMap<ProjectId, Project>,
    /// Enabled accounts owning live projects.
    pub accounts: BTreeMap<AccountName, Account>,
    /// Every project with an exactly-matching binding, live or not.
    pub discovered: BTreeSet<ProjectId>,
}

impl ResolvedBindings {
    /// Projects that matched but are not live.
    pub fn ignored_project_ids(&self) -> Vec<ProjectId> {
        self.discovered
            .iter()
            .filter(|id| !self.projects.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Live projects, sorted.
    pub fn active_project_ids(&self) -> Vec<ProjectId> {
        self.projects.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Ignore { reason: String },
    Resolved(Box<ResolvedBindings>),
}

/// Loads and filters the bindings relevant to an event.
pub struct BindingResolver {
    sources: Arc<dyn EventSourceStore>,
    accounts: Arc<dyn AccountStore>,
    projects: Arc<dyn ProjectStore>,
    events: Arc<dyn EventStore>,
    decoder: Arc<dyn TokenDecoder>,
}

impl BindingResolver {
    pub fn new(
        sources: Arc<dyn EventSourceStore>,
        accounts: Arc<dyn AccountStore>,
        projects: Arc<dyn ProjectStore>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            sources,
            accounts,
            projects,
            events,
            decoder: Arc::new(PlainTokens),
        }
    }

    pub fn with_token_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub async fn resolve(&self, req: &ResolveRequest) -> Result<Resolution> {
        let source = self.sources.get(&req.source_id).await?;
        if !source.enabled {
            return Ok(Resolution::Ignore {
                reason: SOURCE_DISABLED.to_string(),
            });
        }

        let account = self.accounts.get(&source.account).await?;
        if !account.enabled {
            return Ok(Resolution::Ignore {
                reason: SOURCE_ACCOUNT_DISABLED.to_string(),
            });
        }

        let event = self.events.get(&req.event_id).await?;

        let decoded = self.decoder.decode(&req.association_token);
        let query = BindingQuery::for_token(req.source_id.clone(), decoded.token.clone());
        let candidates = self.sources.get_project_bindings(&query).await?;

        let mut discovered = BTreeSet::new();
        let mut bindings = BTreeMap::new();
        for mut binding in candidates {
            // The store filtered on the token already; do not rely on it.
            if binding.association_token != decoded.token {
                continue;
            }
            discovered.insert(binding.project_id.clone());

            if !binding.enabled {
                continue;
            }
            if let Some(name) = &decoded.binding_name {
                binding.name = name.clone();
            }
            bindings.insert(binding.project_id.clone(), binding);
        }

        let mut resolved = ResolvedBindings {
            source,
            account,
            event,
            bindings: BTreeMap::new(),
            projects: BTreeMap::new(),
            accounts: BTreeMap::new(),
            discovered,
        };

        if bindings.is_empty() {
            debug!(event_id = %req.event_id, "no enabled bindings matched");
            return Ok(Resolution::Resolved(Box::new(resolved)));
        }

        let project_ids: Vec<ProjectId> = bindings.keys().cloned().collect();
        let mut projects: BTreeMap<ProjectId, Project> = self
            .projects
            .batch_get(&project_ids)
            .await?
            .into_iter()
            // Only what was asked for; stores may return more.
            .filter(|(id, project)| project.enabled && bindings.contains_key(id))
            .collect();

        let account_names: Vec<AccountName> = projects
            .values()
            .map(|p| p.account.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let accounts: BTreeMap<AccountName, Account> = self
            .accounts
            .batch_get(&account_names)
            .await?
            .into_iter()
            .filter(|(name, account)| account.enabled && account_names.contains(name))
            .collect();

        projects.retain(|_, project| accounts.contains_key(&project.account));
        bindings.retain(|project_id, _| projects.contains_key(project_id));

        debug!(
            event_id = %req.event_id,
            discovered = resolved.discovered.len(),
            active = projects.len(),
            "bindings resolved"
        );

        resolved.bindings = bindings;
        resolved.projects = projects;
        resolved.accounts = accounts;
        Ok(Resolution::Resolved(Box::new(resolved)))
    }
}
