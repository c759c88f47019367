//! Per-recipient swarm resolution.
//!
//! A swarm is the subset of service nodes storing one recipient's messages.
//! Swarms are cached in memory and mirrored to the database under the
//! recipient key; a swarm never serves any other recipient. A cached swarm
//! smaller than [`MIN_SWARM`](crate::MIN_SWARM) is refetched from a random
//! pool member.

use std::collections::HashSet;

use tracing::{debug, info};
use veil_db::queries;
use veil_types::ServiceNode;

use crate::pool::{DirectoryTransport, SnodeDirectory};
use crate::{Result, SnodeError, MIN_SWARM};

impl SnodeDirectory {
    /// The swarm for `recipient`, fetched from the network when the cached
    /// set is unusable.
    pub async fn get_swarm<T: DirectoryTransport>(
        &self,
        transport: &T,
        recipient: &str,
    ) -> Result<HashSet<ServiceNode>> {
        if let Some(swarm) = self.cached_swarm(recipient) {
            return Ok(swarm);
        }

        // Fall back to the persisted copy before going to the network.
        let persisted: HashSet<ServiceNode> = {
            let conn = self.db.lock().await;
            queries::swarms::load(&conn, recipient)?.into_iter().collect()
        };
        if persisted.len() >= MIN_SWARM {
            let mut state = self.state_lock();
            state.swarms.insert(recipient.to_string(), persisted.clone());
            return Ok(persisted);
        }

        self.fetch_swarm(transport, recipient).await
    }

    fn cached_swarm(&self, recipient: &str) -> Option<HashSet<ServiceNode>> {
        let state = self.state_lock();
        state
            .swarms
            .get(recipient)
            .filter(|swarm| swarm.len() >= MIN_SWARM)
            .cloned()
    }

    async fn fetch_swarm<T: DirectoryTransport>(
        &self,
        transport: &T,
        recipient: &str,
    ) -> Result<HashSet<ServiceNode>> {
        let source = self
            .random_node(&HashSet::new())
            .ok_or(SnodeError::InsufficientSnodes { need: 1, have: 0 })?;

        debug!(node = %source, recipient, "Fetching swarm");
        let nodes = match transport.get_swarm(&source, recipient).await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.record_failure(&source).await?;
                return Err(SnodeError::Transport(e));
            }
        };

        let swarm: HashSet<ServiceNode> = nodes.into_iter().collect();
        if swarm.is_empty() {
            return Err(SnodeError::InvalidResponse(format!(
                "empty swarm for {recipient}"
            )));
        }

        self.store_swarm(recipient, &swarm).await?;
        info!(recipient, members = swarm.len(), "Swarm resolved");
        Ok(swarm)
    }

    /// Replace the cached and persisted swarm for a recipient. Also used when
    /// a 421 response delivers the authoritative member list.
    pub async fn store_swarm(
        &self,
        recipient: &str,
        swarm: &HashSet<ServiceNode>,
    ) -> Result<()> {
        let ordered: Vec<ServiceNode> = swarm.iter().cloned().collect();
        {
            let mut conn = self.db.lock().await;
            queries::swarms::replace(&mut conn, recipient, &ordered)?;
        }
        let mut state = self.state_lock();
        state.swarms.insert(recipient.to_string(), swarm.clone());
        Ok(())
    }

    /// Forget the cached swarm for a recipient entirely (421 with no
    /// replacement list).
    pub async fn invalidate_swarm(&self, recipient: &str) -> Result<()> {
        {
            let mut conn = self.db.lock().await;
            queries::swarms::replace(&mut conn, recipient, &[])?;
        }
        let mut state = self.state_lock();
        state.swarms.remove(recipient);
        Ok(())
    }

    /// Remove one node from one recipient's swarm.
    pub async fn drop_from_swarm(&self, recipient: &str, node: &ServiceNode) -> Result<()> {
        {
            let conn = self.db.lock().await;
            queries::swarms::delete_node(&conn, recipient, node)?;
        }
        let mut state = self.state_lock();
        if let Some(swarm) = state.swarms.get_mut(recipient) {
            swarm.remove(node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veil_types::Network;

    fn node(ip: &str) -> ServiceNode {
        ServiceNode {
            ip: ip.to_string(),
            port: 22021,
            ed25519_pub_hex: hex::encode([7u8; 32]),
            x25519_pub_hex: hex::encode([8u8; 32]),
        }
    }

    fn nodes(count: usize, prefix: &str) -> Vec<ServiceNode> {
        (0..count)
            .map(|i| node(&format!("{prefix}.{i}")))
            .collect()
    }

    struct FakeTransport {
        swarm_response: Vec<ServiceNode>,
        swarm_calls: AtomicUsize,
    }

    impl DirectoryTransport for FakeTransport {
        async fn get_service_nodes(
            &self,
            _node: &ServiceNode,
            _limit: usize,
        ) -> std::result::Result<Vec<ServiceNode>, String> {
            Ok(Vec::new())
        }

        async fn get_swarm(
            &self,
            _node: &ServiceNode,
            _recipient: &str,
        ) -> std::result::Result<Vec<ServiceNode>, String> {
            self.swarm_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.swarm_response.clone())
        }
    }

    async fn directory() -> SnodeDirectory {
        let db = veil_db::into_shared(veil_db::open_memory().expect("open"));
        {
            let mut conn = db.lock().await;
            queries::pool::replace(&mut conn, &nodes(20, "10.0.0"), i64::MAX / 2)
                .expect("persist pool");
        }
        SnodeDirectory::load(db, Network::Mainnet, reqwest::Client::new())
            .await
            .expect("load")
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let directory = directory().await;
        let transport = FakeTransport {
            swarm_response: nodes(7, "10.1.0"),
            swarm_calls: AtomicUsize::new(0),
        };

        let swarm = directory
            .get_swarm(&transport, "05abc")
            .await
            .expect("swarm");
        assert_eq!(swarm.len(), 7);

        // Second call is served from cache.
        let again = directory
            .get_swarm(&transport, "05abc")
            .await
            .expect("swarm");
        assert_eq!(again.len(), 7);
        assert_eq!(transport.swarm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_swarm_persisted_per_recipient() {
        let directory = directory().await;
        let transport = FakeTransport {
            swarm_response: nodes(5, "10.1.0"),
            swarm_calls: AtomicUsize::new(0),
        };

        directory
            .get_swarm(&transport, "05abc")
            .await
            .expect("swarm");

        let conn = directory.db.lock().await;
        assert_eq!(queries::swarms::load(&conn, "05abc").expect("load").len(), 5);
        assert!(queries::swarms::load(&conn, "05def").expect("load").is_empty());
    }

    #[tokio::test]
    async fn test_undersized_swarm_refetched() {
        let directory = directory().await;
        // Seed the cache with a swarm below MIN_SWARM.
        directory
            .store_swarm("05abc", &nodes(2, "10.1.0").into_iter().collect())
            .await
            .expect("store");

        let transport = FakeTransport {
            swarm_response: nodes(6, "10.2.0"),
            swarm_calls: AtomicUsize::new(0),
        };
        let swarm = directory
            .get_swarm(&transport, "05abc")
            .await
            .expect("swarm");
        assert_eq!(swarm.len(), 6);
        assert_eq!(transport.swarm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_from_swarm() {
        let directory = directory().await;
        directory
            .store_swarm("05abc", &nodes(5, "10.1.0").into_iter().collect())
            .await
            .expect("store");

        directory
            .drop_from_swarm("05abc", &node("10.1.0.2"))
            .await
            .expect("drop");

        let state = directory.state_lock();
        let swarm = state.swarms.get("05abc").expect("cached");
        assert_eq!(swarm.len(), 4);
        assert!(!swarm.contains(&node("10.1.0.2")));
    }

    #[tokio::test]
    async fn test_drop_node_leaves_no_swarm_member() {
        let directory = directory().await;
        directory
            .store_swarm("05abc", &nodes(5, "10.1.0").into_iter().collect())
            .await
            .expect("store");
        directory
            .store_swarm("05def", &nodes(5, "10.1.0").into_iter().collect())
            .await
            .expect("store");

        directory.drop_node(&node("10.1.0.3")).await.expect("drop");

        let state = directory.state_lock();
        for swarm in state.swarms.values() {
            assert!(!swarm.contains(&node("10.1.0.3")));
        }
    }
}
