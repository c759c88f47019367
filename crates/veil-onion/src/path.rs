//! Onion path construction and rotation.
//!
//! The client keeps [`TARGET_PATHS`](crate::TARGET_PATHS) paths of exactly
//! [`PATH_LEN`](crate::PATH_LEN) distinct nodes each. The first hop is the
//! *guard*: the only node that sees the client's IP, and therefore the only
//! node that is version-tested with a direct request before use. Non-guard
//! hops are never probed directly. No two paths share a guard.
//!
//! Failure handling: a path accumulating
//! [`PATH_FAIL_THRESHOLD`](crate::PATH_FAIL_THRESHOLD) failures is torn
//! down, its guard leaves the guard set, and each hop is charged one
//! node-level failure. A node reaching its own threshold is swapped out of
//! every surviving path for a random unused pool node (untested; it becomes
//! a non-guard hop by construction).

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};
use veil_db::{queries, SharedDb};
use veil_snode::{NoTransport, SnodeDirectory, MIN_POOL};
use veil_types::ServiceNode;

use crate::{
    OnionError, Result, GUARD_TEST_RETRY_DELAY_MS, GUARD_TEST_TIMEOUT_SECS, MIN_NODE_VERSION,
    PATH_FAIL_THRESHOLD, PATH_LEN, TARGET_PATHS,
};

/// An ordered onion path; the guard is hop 0.
#[derive(Clone, Debug, PartialEq)]
pub struct OnionPath {
    hops: Vec<ServiceNode>,
}

impl OnionPath {
    /// Wrap a hop list. The list must hold exactly [`PATH_LEN`] nodes.
    pub fn new(hops: Vec<ServiceNode>) -> Result<Self> {
        if hops.len() != PATH_LEN {
            return Err(OnionError::InvalidResponse(format!(
                "path must have {PATH_LEN} hops, got {}",
                hops.len()
            )));
        }
        Ok(Self { hops })
    }

    /// The guard node.
    pub fn guard(&self) -> &ServiceNode {
        &self.hops[0]
    }

    /// All hops, guard first.
    pub fn hops(&self) -> &[ServiceNode] {
        &self.hops
    }

    /// Whether `node` is one of the hops.
    pub fn contains(&self, node: &ServiceNode) -> bool {
        self.hops.contains(node)
    }

    /// The hop whose Ed25519 key matches, if any.
    pub fn hop_by_ed25519(&self, ed25519_hex: &str) -> Option<&ServiceNode> {
        self.hops.iter().find(|hop| hop.ed25519_pub_hex == ed25519_hex)
    }

    /// Stable identity for failure counting.
    pub fn key(&self) -> String {
        self.hops
            .iter()
            .map(|hop| hop.to_string())
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Seam for the direct guard version probe, so path building is testable
/// without network I/O.
#[async_trait::async_trait]
pub trait GuardProbe: Send + Sync {
    /// Fetch the node's reported version, `Ok(None)` when the stats response
    /// carries no version field.
    async fn node_version(
        &self,
        node: &ServiceNode,
    ) -> std::result::Result<Option<String>, String>;
}

/// The production probe: `GET /get_stats/v1` with a short deadline.
pub struct HttpsGuardProbe {
    http: reqwest::Client,
}

impl HttpsGuardProbe {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl GuardProbe for HttpsGuardProbe {
    async fn node_version(
        &self,
        node: &ServiceNode,
    ) -> std::result::Result<Option<String>, String> {
        let response = self
            .http
            .get(node.stats_url())
            .timeout(std::time::Duration::from_secs(GUARD_TEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(body
            .get("version")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string()))
    }
}

/// Compare dotted version strings numerically, missing components are zero.
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let version = parse(version);
    let minimum = parse(minimum);
    let len = version.len().max(minimum.len());
    for i in 0..len {
        let v = version.get(i).copied().unwrap_or(0);
        let m = minimum.get(i).copied().unwrap_or(0);
        if v != m {
            return v > m;
        }
    }
    true
}

struct PathState {
    paths: Vec<OnionPath>,
    path_failures: std::collections::HashMap<String, u32>,
}

/// Builds, caches, and rotates onion paths.
pub struct PathManager {
    db: SharedDb,
    directory: Arc<SnodeDirectory>,
    probe: Arc<dyn GuardProbe>,
    state: std::sync::Mutex<PathState>,
    build_lock: tokio::sync::Mutex<()>,
}

impl PathManager {
    /// Create a manager, rehydrating persisted paths.
    pub async fn load(
        db: SharedDb,
        directory: Arc<SnodeDirectory>,
        probe: Arc<dyn GuardProbe>,
    ) -> Result<Arc<Self>> {
        let persisted = {
            let conn = db.lock().await;
            queries::paths::load(&conn)?
        };
        let paths: Vec<OnionPath> = persisted
            .into_iter()
            .filter_map(|hops| OnionPath::new(hops).ok())
            .collect();
        info!(paths = paths.len(), "Loaded onion paths");
        Ok(Arc::new(Self {
            db,
            directory,
            probe,
            state: std::sync::Mutex::new(PathState {
                paths,
                path_failures: std::collections::HashMap::new(),
            }),
            build_lock: tokio::sync::Mutex::new(()),
        }))
    }

    /// Current paths snapshot.
    pub fn paths_snapshot(&self) -> Vec<OnionPath> {
        self.state_lock().paths.clone()
    }

    /// A path for the next request, never containing `excluding`.
    ///
    /// With a full cache this is a random pick. With a partial cache a
    /// rebuild is kicked off in the background and an existing path is
    /// returned when one satisfies the exclusion; an empty cache builds
    /// synchronously.
    pub async fn get_path(
        self: Arc<Self>,
        excluding: Option<&ServiceNode>,
    ) -> Result<OnionPath> {
        if self.directory.pool_snapshot().len() < MIN_POOL {
            if let Err(e) = self.directory.get_pool(&NoTransport).await {
                warn!(error = %e, "Pool bootstrap failed; building from cached pool");
            }
        }

        let snapshot = self.paths_snapshot();
        let satisfying: Vec<OnionPath> = snapshot
            .iter()
            .filter(|path| excluding.map_or(true, |node| !path.contains(node)))
            .cloned()
            .collect();

        if snapshot.len() >= TARGET_PATHS {
            if let Some(path) = choose(&satisfying) {
                return Ok(path);
            }
            // Every cached path contains the excluded node; drop those and
            // rebuild from the usable subset.
            {
                let mut state = self.state_lock();
                state
                    .paths
                    .retain(|path| excluding.map_or(true, |node| !path.contains(node)));
            }
            let rebuilt = self.build_paths(satisfying).await?;
            return pick_excluding(&rebuilt, excluding);
        }

        if !snapshot.is_empty() {
            let manager = Arc::clone(&self);
            let reusable = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.build_paths(reusable).await {
                    warn!(error = %e, "Background path build failed");
                }
            });
            if let Some(path) = choose(&satisfying) {
                return Ok(path);
            }
        }

        let built = self.build_paths(satisfying).await?;
        pick_excluding(&built, excluding)
    }

    /// Build up to [`TARGET_PATHS`] paths, reusing the given still-valid
    /// paths. One build runs at a time; latecomers observe its result.
    pub async fn build_paths(&self, reusable: Vec<OnionPath>) -> Result<Vec<OnionPath>> {
        let _flight = self.build_lock.lock().await;
        {
            let state = self.state_lock();
            if state.paths.len() >= TARGET_PATHS {
                return Ok(state.paths.clone());
            }
        }

        let pool: Vec<ServiceNode> = self.directory.pool_snapshot().into_iter().collect();

        let reusable_guards: HashSet<ServiceNode> =
            reusable.iter().map(|path| path.guard().clone()).collect();
        let reusable_hops: HashSet<ServiceNode> = reusable
            .iter()
            .flat_map(|path| path.hops().iter().cloned())
            .collect();

        let needed_guards = TARGET_PATHS - reusable_guards.len();
        if needed_guards == 0 {
            self.store_paths(reusable.clone()).await?;
            return Ok(reusable);
        }

        // Test guard candidates until enough pass the version check.
        let mut candidates: Vec<ServiceNode> = pool
            .iter()
            .filter(|node| !reusable_hops.contains(*node))
            .cloned()
            .collect();
        {
            let mut rng = rand::thread_rng();
            candidates.shuffle(&mut rng);
        }

        let mut guards: Vec<ServiceNode> = Vec::with_capacity(needed_guards);
        let mut rejected: HashSet<ServiceNode> = HashSet::new();
        for candidate in &candidates {
            if guards.len() == needed_guards {
                break;
            }
            match self.test_guard(candidate).await {
                Ok(()) => {
                    debug!(node = %candidate, "Guard candidate accepted");
                    guards.push(candidate.clone());
                }
                Err(e) => {
                    debug!(node = %candidate, error = %e, "Guard candidate rejected");
                    rejected.insert(candidate.clone());
                    tokio::time::sleep(std::time::Duration::from_millis(
                        GUARD_TEST_RETRY_DELAY_MS,
                    ))
                    .await;
                }
            }
        }
        if guards.len() < needed_guards {
            return Err(OnionError::InsufficientSnodes {
                need: needed_guards,
                have: guards.len(),
            });
        }

        // Remaining nodes for non-guard hops: the pool minus every guard and
        // every hop already committed to a reusable path.
        let all_guards: HashSet<ServiceNode> = reusable_guards
            .iter()
            .chain(guards.iter())
            .cloned()
            .collect();
        let mut remaining: Vec<ServiceNode> = pool
            .iter()
            .filter(|node| !all_guards.contains(*node) && !reusable_hops.contains(*node))
            .cloned()
            .collect();

        let required = needed_guards * (PATH_LEN - 1);
        if remaining.len() < required {
            return Err(OnionError::InsufficientSnodes {
                need: required,
                have: remaining.len(),
            });
        }
        {
            let mut rng = rand::thread_rng();
            remaining.shuffle(&mut rng);
        }

        let mut paths = reusable;
        for guard in guards {
            let mut hops = vec![guard];
            hops.extend(remaining.drain(..PATH_LEN - 1));
            paths.push(OnionPath::new(hops)?);
        }

        self.store_paths(paths.clone()).await?;
        info!(paths = paths.len(), "Onion paths built");
        Ok(paths)
    }

    /// Version-test a guard candidate with a direct stats request.
    pub async fn test_guard(&self, node: &ServiceNode) -> Result<()> {
        match self.probe.node_version(node).await {
            Ok(Some(version)) => {
                if version_at_least(&version, MIN_NODE_VERSION) {
                    Ok(())
                } else {
                    Err(OnionError::UnsupportedSnodeVersion(version))
                }
            }
            Ok(None) => Err(OnionError::MissingSnodeVersion),
            Err(e) => Err(OnionError::HttpRequestFailed { status: 0, body: e }),
        }
    }

    /// Record one failure against a path. At the threshold the path is torn
    /// down and each hop is charged a node-level failure.
    pub async fn record_failure(&self, path: &OnionPath) -> Result<()> {
        let should_drop = {
            let mut state = self.state_lock();
            let count = state.path_failures.entry(path.key()).or_insert(0);
            *count += 1;
            debug!(path = %path.key(), failures = *count, "Recorded path failure");
            *count >= PATH_FAIL_THRESHOLD
        };
        if !should_drop {
            return Ok(());
        }

        info!(path = %path.key(), "Dropping failed path");
        let remaining: Vec<OnionPath> = {
            let mut state = self.state_lock();
            state.path_failures.remove(&path.key());
            state.paths.retain(|p| p.key() != path.key());
            state.paths.clone()
        };
        self.persist(&remaining).await?;

        for hop in path.hops() {
            if self.directory.record_failure(hop).await? {
                self.replace_node_in_paths(hop).await?;
            }
        }
        Ok(())
    }

    /// Charge a single hop with a node failure (the transport identified the
    /// culprit); swap it out of every path if it got dropped.
    pub async fn record_node_failure(&self, node: &ServiceNode) -> Result<()> {
        if self.directory.record_failure(node).await? {
            self.replace_node_in_paths(node).await?;
        }
        Ok(())
    }

    /// Replace a dropped node in every path with a random unused pool node.
    /// The replacement is not version-tested; it never becomes a guard here.
    async fn replace_node_in_paths(&self, node: &ServiceNode) -> Result<()> {
        let paths = {
            let state = self.state_lock();
            state.paths.clone()
        };
        if !paths.iter().any(|path| path.contains(node)) {
            return Ok(());
        }

        let in_use: HashSet<ServiceNode> = paths
            .iter()
            .flat_map(|path| path.hops().iter().cloned())
            .collect();

        let mut updated = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.contains(node) {
                updated.push(path);
                continue;
            }
            match self.directory.random_node(&in_use) {
                Some(replacement) => {
                    debug!(old = %node, new = %replacement, "Replacing dropped hop");
                    let hops: Vec<ServiceNode> = path
                        .hops()
                        .iter()
                        .map(|hop| {
                            if hop == node {
                                replacement.clone()
                            } else {
                                hop.clone()
                            }
                        })
                        .collect();
                    updated.push(OnionPath::new(hops)?);
                }
                None => {
                    // No spare node; drop the path instead.
                    warn!(path = %path.key(), "No replacement node, dropping path");
                }
            }
        }

        {
            let mut state = self.state_lock();
            state.paths = updated.clone();
        }
        self.persist(&updated).await
    }

    async fn store_paths(&self, paths: Vec<OnionPath>) -> Result<()> {
        self.persist(&paths).await?;
        let mut state = self.state_lock();
        let live: HashSet<String> = paths.iter().map(|path| path.key()).collect();
        state.path_failures.retain(|key, _| live.contains(key));
        state.paths = paths;
        Ok(())
    }

    async fn persist(&self, paths: &[OnionPath]) -> Result<()> {
        let rows: Vec<Vec<ServiceNode>> =
            paths.iter().map(|path| path.hops().to_vec()).collect();
        let mut conn = self.db.lock().await;
        queries::paths::replace(&mut conn, &rows)?;
        Ok(())
    }

    fn state_lock(&self) -> std::sync::MutexGuard<'_, PathState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn choose(paths: &[OnionPath]) -> Option<OnionPath> {
    let mut rng = rand::thread_rng();
    paths.choose(&mut rng).cloned()
}

fn pick_excluding(paths: &[OnionPath], excluding: Option<&ServiceNode>) -> Result<OnionPath> {
    let satisfying: Vec<OnionPath> = paths
        .iter()
        .filter(|path| excluding.map_or(true, |node| !path.contains(node)))
        .cloned()
        .collect();
    choose(&satisfying).ok_or(OnionError::InsufficientSnodes { need: 1, have: 0 })
}
