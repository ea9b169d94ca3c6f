//! Subscription management for variable clients.
//!
//! Each connection owns a [`SubscriptionManager`] that decides which
//! variable updates are forwarded to it.

use pvsim_core::path::PatternError;
use pvsim_core::NamePattern;
use pvsim_protocol::{Subscription, VariableUpdate};

use crate::variables::Variables;

/// A client's subscription to one name pattern.
#[derive(Debug, Clone)]
pub struct ClientSubscription {
    /// Pattern as sent by the client (e.g. "entry/*")
    pub name: String,
    matcher: NamePattern,
}

impl ClientSubscription {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            name: pattern.to_string(),
            matcher: NamePattern::new(pattern)?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.matches(name)
    }
}

/// Manages subscriptions for a single client connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: Vec<ClientSubscription>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every variable.
    pub fn subscribe_all(&mut self) {
        self.subscriptions.clear();
        if let Ok(all) = ClientSubscription::new("*") {
            self.subscriptions.push(all);
        }
    }

    /// Add subscriptions from a subscribe request.
    ///
    /// Returns a warning for every pattern that was rejected.
    pub fn add_subscriptions(&mut self, subs: &[Subscription]) -> Vec<String> {
        let mut warnings = Vec::new();

        for sub in subs {
            match ClientSubscription::new(&sub.name) {
                Ok(subscription) => self.subscriptions.push(subscription),
                Err(e) => warnings.push(format!("Ignoring subscription {:?}: {}", sub.name, e)),
            }
        }

        warnings
    }

    /// Remove a subscription by its pattern. `*` removes everything.
    pub fn remove_subscription(&mut self, pattern: &str) {
        if pattern == "*" {
            self.subscriptions.clear();
        } else {
            self.subscriptions.retain(|s| s.name != pattern);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Check if any subscription matches a variable name.
    pub fn matches(&self, name: &str) -> bool {
        self.subscriptions.iter().any(|s| s.matches(name))
    }

    /// Whether an update should be forwarded to this client.
    pub fn wants(&self, update: &VariableUpdate) -> bool {
        self.matches(&update.name)
    }

    /// Current state of every subscribed variable.
    ///
    /// Sent when a client connects with `sendCachedValues=true`.
    pub fn initial_updates(&self, variables: &Variables) -> Vec<VariableUpdate> {
        if self.subscriptions.is_empty() {
            return Vec::new();
        }

        variables
            .iter()
            .filter(|(name, _)| self.matches(name))
            .map(|(name, variable)| VariableUpdate {
                name: name.clone(),
                variable: variable.snapshot(),
            })
            .collect()
    }
}
