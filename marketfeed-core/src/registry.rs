use crate::{connection::ConnectionId, kind::SubscriptionKey};
use std::collections::{HashMap, HashSet};

/// The authoritative desired-subscription set for one venue, plus the reverse map of which
/// connection currently carries each key.
///
/// The two are deliberately separate: `desired` survives reconnects and Pool churn untouched,
/// while `assignment` is rebuilt as connections open and close. A key can be desired with no
/// assignment (awaiting a home after a drop) but never assigned without being desired.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: HashSet<SubscriptionKey>,
    assignment: HashMap<SubscriptionKey, ConnectionId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` to the desired set. Returns `false` if it was already desired.
    pub fn desire(&mut self, key: SubscriptionKey) -> bool {
        self.desired.insert(key)
    }

    /// Removes `key` from the desired set and drops any assignment it held.
    pub fn undesire(&mut self, key: &SubscriptionKey) -> bool {
        self.assignment.remove(key);
        self.desired.remove(key)
    }

    pub fn assign(&mut self, key: SubscriptionKey, connection: ConnectionId) {
        self.assignment.insert(key, connection);
    }

    pub fn unassign(&mut self, key: &SubscriptionKey) {
        self.assignment.remove(key);
    }

    pub fn connection_for(&self, key: &SubscriptionKey) -> Option<ConnectionId> {
        self.assignment.get(key).copied()
    }

    pub fn is_desired(&self, key: &SubscriptionKey) -> bool {
        self.desired.contains(key)
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }

    /// A point-in-time copy of the desired set. The Reconnector iterates this snapshot rather
    /// than the live set so a subscribe/unsubscribe racing in on another task mid-reconnect
    /// can't be silently skipped or double-homed.
    pub fn snapshot_desired(&self) -> Vec<SubscriptionKey> {
        self.desired.iter().cloned().collect()
    }

    /// Desired keys with no current connection, i.e. awaiting re-homing.
    pub fn unassigned(&self) -> Vec<SubscriptionKey> {
        self.desired
            .iter()
            .filter(|key| !self.assignment.contains_key(*key))
            .cloned()
            .collect()
    }

    /// Keys assigned to `connection` as of this instant.
    pub fn assigned_to(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        self.assignment
            .iter()
            .filter(|(_, id)| **id == connection)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Unassigns every key held by `connection`, returning them so the caller (Reconnector) can
    /// re-home whichever are still desired.
    pub fn drop_connection(&mut self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let keys = self.assigned_to(connection);
        for key in &keys {
            self.assignment.remove(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::DataKind;
    use marketfeed_instrument::symbol::CanonicalSymbol;

    fn key(base: &str) -> SubscriptionKey {
        SubscriptionKey::new(DataKind::Ticker, CanonicalSymbol::new(base, "USDT"))
    }

    #[test]
    fn test_desire_then_assign_resolves_connection() {
        let mut registry = SubscriptionRegistry::new();
        let btc = key("BTC");
        registry.desire(btc.clone());
        assert!(registry.unassigned().contains(&btc));

        let conn = crate::connection::ConnectionId::next();
        registry.assign(btc.clone(), conn);
        assert_eq!(registry.connection_for(&btc), Some(conn));
        assert!(registry.unassigned().is_empty());
    }

    #[test]
    fn test_drop_connection_returns_only_its_keys_and_clears_assignment() {
        let mut registry = SubscriptionRegistry::new();
        let btc = key("BTC");
        let eth = key("ETH");
        registry.desire(btc.clone());
        registry.desire(eth.clone());

        let conn_a = crate::connection::ConnectionId::next();
        let conn_b = crate::connection::ConnectionId::next();
        registry.assign(btc.clone(), conn_a);
        registry.assign(eth.clone(), conn_b);

        let dropped = registry.drop_connection(conn_a);
        assert_eq!(dropped, vec![btc.clone()]);
        assert_eq!(registry.connection_for(&btc), None);
        assert_eq!(registry.connection_for(&eth), Some(conn_b));
        assert!(registry.is_desired(&btc));
    }

    #[test]
    fn test_undesire_clears_both_desired_and_assignment() {
        let mut registry = SubscriptionRegistry::new();
        let btc = key("BTC");
        registry.desire(btc.clone());
        registry.assign(btc.clone(), crate::connection::ConnectionId::next());

        registry.undesire(&btc);
        assert!(!registry.is_desired(&btc));
        assert_eq!(registry.connection_for(&btc), None);
    }

    #[test]
    fn test_snapshot_desired_is_independent_copy() {
        let mut registry = SubscriptionRegistry::new();
        registry.desire(key("BTC"));
        let snapshot = registry.snapshot_desired();
        registry.desire(key("ETH"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
