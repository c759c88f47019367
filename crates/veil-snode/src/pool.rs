//! The global service-node pool.
//!
//! [`SnodeDirectory`] owns every shared discovery cache: the pool, the
//! per-recipient swarms, and the node failure counters. Reads hit memory;
//! every mutation is committed to the database before the in-memory caches
//! change.
//!
//! ## Refresh rules
//!
//! `get_pool` returns the cache when it holds at least [`MIN_POOL`] nodes and
//! was refreshed within [`POOL_TTL_SECS`]. Otherwise:
//!
//! - below [`MIN_POOL`] nodes the pool is rebuilt from a seed node;
//! - otherwise three random pool members are asked for their own view, the
//!   three views are intersected, and the intersection (which must exceed
//!   [`MIN_POOL_INTERSECTION`] nodes) becomes the new pool, capped at
//!   [`POOL_CAP`] entries.
//!
//! A single refresh is in flight at a time; concurrent callers block on the
//! same refresh and observe its result.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use rand::seq::IteratorRandom;
use tracing::{debug, info, warn};
use veil_db::{queries, SharedDb};
use veil_types::{Network, ServiceNode};

use crate::{
    seed, Result, SnodeError, MIN_POOL, MIN_POOL_INTERSECTION, NODE_FAIL_THRESHOLD, POOL_CAP,
    POOL_TTL_SECS,
};

/// Network seam for requests the directory routes through the onion layer.
///
/// Implementors provide the actual network I/O; the directory only
/// orchestrates. Tests substitute an in-process fake.
pub trait DirectoryTransport: Send + Sync {
    /// Ask `node` for its view of the service-node pool.
    fn get_service_nodes(
        &self,
        node: &ServiceNode,
        limit: usize,
    ) -> impl Future<Output = std::result::Result<Vec<ServiceNode>, String>> + Send;

    /// Ask `node` for the swarm responsible for `recipient`.
    fn get_swarm(
        &self,
        node: &ServiceNode,
        recipient: &str,
    ) -> impl Future<Output = std::result::Result<Vec<ServiceNode>, String>> + Send;
}

/// A [`DirectoryTransport`] for callers that can only reach seed nodes.
///
/// The seed path of a refresh never touches the transport, so this is valid
/// whenever the pool is below [`MIN_POOL`]; a random-node refresh through it
/// fails with `PoolUpdatingFailed`.
pub struct NoTransport;

impl DirectoryTransport for NoTransport {
    async fn get_service_nodes(
        &self,
        _node: &ServiceNode,
        _limit: usize,
    ) -> std::result::Result<Vec<ServiceNode>, String> {
        Err("onion transport unavailable".to_string())
    }

    async fn get_swarm(
        &self,
        _node: &ServiceNode,
        _recipient: &str,
    ) -> std::result::Result<Vec<ServiceNode>, String> {
        Err("onion transport unavailable".to_string())
    }
}

pub(crate) struct DirectoryState {
    pub(crate) pool: HashSet<ServiceNode>,
    pub(crate) refreshed_at: i64,
    pub(crate) swarms: HashMap<String, HashSet<ServiceNode>>,
    pub(crate) node_failures: HashMap<ServiceNode, u32>,
}

/// Shared service-node discovery state.
pub struct SnodeDirectory {
    pub(crate) db: SharedDb,
    network: Network,
    http: reqwest::Client,
    pub(crate) state: std::sync::Mutex<DirectoryState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl SnodeDirectory {
    /// Create a directory, rehydrating the pool and refresh timestamp from
    /// the database.
    pub async fn load(db: SharedDb, network: Network, http: reqwest::Client) -> Result<Self> {
        let (pool, refreshed_at) = {
            let conn = db.lock().await;
            let pool: HashSet<ServiceNode> =
                queries::pool::load(&conn)?.into_iter().collect();
            let refreshed_at = queries::pool::refreshed_at(&conn)?;
            (pool, refreshed_at)
        };
        info!(pool_size = pool.len(), "Loaded service-node pool");
        Ok(Self {
            db,
            network,
            http,
            state: std::sync::Mutex::new(DirectoryState {
                pool,
                refreshed_at,
                swarms: HashMap::new(),
                node_failures: HashMap::new(),
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Current pool snapshot without triggering a refresh.
    pub fn pool_snapshot(&self) -> HashSet<ServiceNode> {
        self.state_lock().pool.clone()
    }

    /// The cached pool, refreshed first when undersized or stale.
    pub async fn get_pool<T: DirectoryTransport>(
        &self,
        transport: &T,
    ) -> Result<HashSet<ServiceNode>> {
        if let Some(pool) = self.fresh_pool() {
            return Ok(pool);
        }
        self.refresh(transport).await
    }

    fn fresh_pool(&self) -> Option<HashSet<ServiceNode>> {
        let state = self.state_lock();
        let age = unix_now() - state.refreshed_at;
        if state.pool.len() >= MIN_POOL && age < POOL_TTL_SECS {
            Some(state.pool.clone())
        } else {
            None
        }
    }

    /// Refresh the pool. Only one refresh runs at a time; latecomers re-check
    /// the cache after acquiring the flight lock and skip the network when a
    /// concurrent refresh already completed.
    pub async fn refresh<T: DirectoryTransport>(
        &self,
        transport: &T,
    ) -> Result<HashSet<ServiceNode>> {
        let _flight = self.refresh_lock.lock().await;
        if let Some(pool) = self.fresh_pool() {
            return Ok(pool);
        }

        let current: Vec<ServiceNode> = {
            let state = self.state_lock();
            state.pool.iter().cloned().collect()
        };

        let new_pool = if current.len() < MIN_POOL {
            info!(pool_size = current.len(), "Pool undersized, contacting seed node");
            seed::fetch_service_nodes(&self.http, self.network).await?
        } else {
            self.refresh_from_random_nodes(transport, &current).await?
        };

        let mut capped: Vec<ServiceNode> = new_pool;
        capped.truncate(POOL_CAP);

        let refreshed_at = unix_now();
        {
            let mut conn = self.db.lock().await;
            queries::pool::replace(&mut conn, &capped, refreshed_at)?;
        }
        let pool: HashSet<ServiceNode> = capped.into_iter().collect();
        {
            let mut state = self.state_lock();
            state.pool = pool.clone();
            state.refreshed_at = refreshed_at;
        }
        info!(pool_size = pool.len(), "Service-node pool refreshed");
        Ok(pool)
    }

    /// Query three random pool members in parallel and intersect their views.
    async fn refresh_from_random_nodes<T: DirectoryTransport>(
        &self,
        transport: &T,
        current: &[ServiceNode],
    ) -> Result<Vec<ServiceNode>> {
        let sources: Vec<ServiceNode> = {
            let mut rng = rand::thread_rng();
            current.iter().cloned().choose_multiple(&mut rng, 3)
        };
        if sources.len() < 3 {
            return Err(SnodeError::InsufficientSnodes {
                need: 3,
                have: sources.len(),
            });
        }

        let (a, b, c) = tokio::join!(
            transport.get_service_nodes(&sources[0], POOL_CAP),
            transport.get_service_nodes(&sources[1], POOL_CAP),
            transport.get_service_nodes(&sources[2], POOL_CAP),
        );

        let mut views = Vec::with_capacity(3);
        for (source, result) in sources.iter().zip([a, b, c]) {
            match result {
                Ok(nodes) => views.push(nodes.into_iter().collect::<HashSet<_>>()),
                Err(e) => {
                    warn!(node = %source, error = %e, "Pool view request failed");
                    self.record_failure(source).await?;
                    return Err(SnodeError::PoolUpdatingFailed(e));
                }
            }
        }

        let intersection: Vec<ServiceNode> = views[0]
            .iter()
            .filter(|node| views[1].contains(*node) && views[2].contains(*node))
            .cloned()
            .collect();

        if intersection.len() <= MIN_POOL_INTERSECTION {
            return Err(SnodeError::InconsistentPools(intersection.len()));
        }
        debug!(agreed = intersection.len(), "Random-node pool views intersected");
        Ok(intersection)
    }

    /// A random pool member, excluding the given nodes.
    pub fn random_node(&self, excluding: &HashSet<ServiceNode>) -> Option<ServiceNode> {
        let state = self.state_lock();
        let mut rng = rand::thread_rng();
        state
            .pool
            .iter()
            .filter(|node| !excluding.contains(*node))
            .choose(&mut rng)
            .cloned()
    }

    /// Record one failure against a node. At [`NODE_FAIL_THRESHOLD`] the node
    /// is dropped from the pool and every swarm; returns whether it was
    /// dropped.
    pub async fn record_failure(&self, node: &ServiceNode) -> Result<bool> {
        let should_drop = {
            let mut state = self.state_lock();
            let count = state.node_failures.entry(node.clone()).or_insert(0);
            *count += 1;
            debug!(node = %node, failures = *count, "Recorded snode failure");
            *count >= NODE_FAIL_THRESHOLD
        };
        if should_drop {
            self.drop_node(node).await?;
        }
        Ok(should_drop)
    }

    /// Remove a node from the pool and every swarm, durably first.
    pub async fn drop_node(&self, node: &ServiceNode) -> Result<()> {
        {
            let conn = self.db.lock().await;
            queries::pool::delete_node(&conn, node)?;
            queries::swarms::delete_node_everywhere(&conn, node)?;
        }
        let mut state = self.state_lock();
        state.pool.remove(node);
        for swarm in state.swarms.values_mut() {
            swarm.remove(node);
        }
        state.node_failures.remove(node);
        info!(node = %node, "Dropped failing service node");
        Ok(())
    }

    /// Empty the pool, durably first.
    pub async fn clear_pool(&self) -> Result<()> {
        {
            let conn = self.db.lock().await;
            queries::pool::clear(&conn)?;
        }
        let mut state = self.state_lock();
        state.pool.clear();
        state.refreshed_at = 0;
        Ok(())
    }

    pub(crate) fn state_lock(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
