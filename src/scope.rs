//! Destination scopes and the accounts bound to them.

use crate::config::{self, Config};
use crate::model::{Account, DestinationScope};

pub trait ScopeResolver: Send + Sync {
    /// Scopes that have a remote account, whether or not pushing is enabled.
    fn active_scopes_with_account(&self) -> Vec<DestinationScope>;

    fn is_sync_enabled_for(&self, scope: &DestinationScope) -> bool;

    fn account_for(&self, scope: &DestinationScope) -> Option<Account>;
}

/// Scopes declared in the YAML configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigScopes {
    scopes: Vec<config::Scope>,
}

impl ConfigScopes {
    pub fn new(scopes: Vec<config::Scope>) -> Self {
        Self { scopes }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.scopes.clone())
    }

    fn find(&self, scope: &DestinationScope) -> Option<&config::Scope> {
        self.scopes.iter().find(|s| s.id == scope.id)
    }

    /// Every declared scope, with or without an account.
    pub fn all(&self) -> Vec<DestinationScope> {
        self.scopes.iter().map(config::Scope::destination).collect()
    }
}

impl ScopeResolver for ConfigScopes {
    fn active_scopes_with_account(&self) -> Vec<DestinationScope> {
        self.scopes
            .iter()
            .filter(|s| s.account.is_some())
            .map(config::Scope::destination)
            .collect()
    }

    fn is_sync_enabled_for(&self, scope: &DestinationScope) -> bool {
        self.find(scope).is_some_and(|s| s.sync_enabled)
    }

    fn account_for(&self, scope: &DestinationScope) -> Option<Account> {
        self.find(scope).and_then(|s| s.account.clone())
    }
}
