//! Hierarchy synchronizer: full build plus incremental reconciliation
//!
//! Builds the N-level tree from flat leaf records whose attributes name
//! their ancestors, then listens forever on the store's change log and a
//! periodic refresh timer. Reconciliation runs strictly bottom-up and each
//! level commits before the next level reads its results, so peak memory
//! holds one leaf chunk and one level's grouping at a time.

use crate::config::Settings;
use crate::hierarchy::container::ContainerIndex;
use crate::shutdown::StopSignal;
use crate::store::{
    container_root_name, AssetGraphStore, ChangeCursor, Node, NodeId, StoreError, HIERARCHY_ROOT,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    ContainersBuilt,
    FullyBuilt,
    Listening,
    Reconciling,
    Stopped,
}

pub struct HierarchySynchronizer {
    store: Arc<dyn AssetGraphStore>,
    settings: Settings,
    // index 0 is the leaf level and only marks its position; it refuses
    // get-or-create
    containers: Vec<Arc<ContainerIndex>>,
    // one top-level lock: the change-event path and the timer path both take
    // it, so reconciliation never runs concurrently with itself
    cursor: tokio::sync::Mutex<ChangeCursor>,
    state: std::sync::Mutex<SyncState>,
    stop: StopSignal,
}

impl HierarchySynchronizer {
    /// Validate the target hierarchy and prime the change cursor
    ///
    /// Missing leaf container or templates are configuration errors: the
    /// caller reports them and exits rather than building a partial tree.
    pub async fn new(
        store: Arc<dyn AssetGraphStore>,
        settings: Settings,
        stop: StopSignal,
    ) -> Result<Self, StoreError> {
        let leaf = settings.leaf_template();
        if !store.has_template(leaf) {
            return Err(StoreError::InvalidOperation(format!(
                "cannot find the leaf template {} in the target database",
                leaf
            )));
        }
        if store
            .find_container_root(&container_root_name(leaf))
            .await?
            .is_none()
        {
            return Err(StoreError::InvalidOperation(format!(
                "cannot find the leaf container {} in the target database",
                container_root_name(leaf)
            )));
        }

        // Start monitoring changes from the current end of the log
        let (_, cursor) = store.find_changes(0).await?;

        Ok(Self {
            store,
            settings,
            containers: Vec::new(),
            cursor: tokio::sync::Mutex::new(cursor),
            state: std::sync::Mutex::new(SyncState::Uninitialized),
            stop,
        })
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SyncState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Ensure each level's container root exists and load its index
    ///
    /// Commits once at the end so the roots persist as a single batch.
    pub async fn build_containers(&mut self) -> Result<(), StoreError> {
        if !self.containers.is_empty() {
            return Err(StoreError::InvalidOperation(
                "containers are already built".to_string(),
            ));
        }

        let leaf = self.settings.leaf_template().to_string();
        let leaf_root = self
            .store
            .find_container_root(&container_root_name(&leaf))
            .await?
            .ok_or_else(|| StoreError::NotFound(container_root_name(&leaf)))?;
        self.containers.push(Arc::new(
            ContainerIndex::build(self.store.clone(), &leaf, leaf_root, true).await?,
        ));

        let top_index = self.settings.levels.len() - 1;
        for (i, level) in self.settings.levels.iter().enumerate().skip(1) {
            if !self.store.has_template(level) {
                return Err(StoreError::InvalidOperation(format!(
                    "cannot find the expected template {} in the target database",
                    level
                )));
            }

            // The top level gets a well-known name so operators can find the
            // entry point of the complete hierarchy
            let root_name = if i == top_index {
                HIERARCHY_ROOT.to_string()
            } else {
                container_root_name(level)
            };
            let root = self.store.ensure_container_root(&root_name).await?;
            self.containers.push(Arc::new(
                ContainerIndex::build(self.store.clone(), level, root, false).await?,
            ));
        }

        self.store.commit().await?;
        self.set_state(SyncState::ContainersBuilt);
        log::info!(
            "built {} container indexes for hierarchy {:?}",
            self.containers.len(),
            self.settings.levels
        );
        Ok(())
    }

    /// Build the entire hierarchy by paging through all leaf nodes
    pub async fn build_hierarchy(&self) -> Result<(), StoreError> {
        if self.containers.is_empty() {
            return Err(StoreError::InvalidOperation(
                "build_containers must run first".to_string(),
            ));
        }

        let leaf = self.settings.leaf_template().to_string();
        let chunk = self.settings.chunk_size;
        let mut start = 0;

        loop {
            if self.stop.is_stopped() {
                log::info!("stop requested, abandoning full build at index {}", start);
                break;
            }

            let (page, total) = self
                .store
                .find_nodes_by_template(&leaf, start, chunk)
                .await?;
            if page.is_empty() {
                break;
            }

            log::info!(
                "start_index={} | found a chunk of {} leaf nodes",
                start,
                page.len()
            );
            let count = page.len();
            self.reconcile_batch(page).await?;
            log::info!(
                "start_index={} | finished hierarchy building for {} leaf nodes",
                start,
                count
            );

            start += count;
            // The total may grow while we scan; re-check it every page
            if start >= total {
                break;
            }
        }

        self.set_state(SyncState::FullyBuilt);
        log::info!("finished hierarchy building for a total of {} leaf nodes", start);
        Ok(())
    }

    /// Reconcile one batch of leaf nodes against every level, bottom-up
    async fn reconcile_batch(&self, mut batch: Vec<Node>) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        // The key attribute for each level shares the level template's name
        let key_attributes: Vec<String> = self.settings.levels[1..].to_vec();
        self.store
            .load_attributes(&mut batch, &key_attributes)
            .await?;

        for level_idx in 1..self.settings.levels.len() {
            let container = &self.containers[level_idx];
            let lower = &self.containers[level_idx - 1];
            let level_name = &self.settings.levels[level_idx];
            let lower_name = &self.settings.levels[level_idx - 1];

            // Group the batch by the intended parent key, dropping blanks
            let mut groups: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
            for node in &batch {
                if let Some(key) = node.key_for(level_name) {
                    if !key.trim().is_empty() {
                        groups.entry(key).or_default().push(node);
                    }
                }
            }

            let mut to_resolve: Vec<NodeId> = Vec::new();
            for (key, members) in &groups {
                let (parent, _) = container.get_or_create(key).await?;
                if parent.has_unresolved_binding() {
                    to_resolve.push(parent.id);
                }

                // Immediate children: the batch's leaves at the first level,
                // the distinct lower-level parents above that
                let children: Vec<NodeId> = if level_idx == 1 {
                    members.iter().map(|n| n.id).collect()
                } else {
                    let keys: BTreeSet<String> = members
                        .iter()
                        .filter_map(|n| n.key_for(lower_name))
                        .filter(|k| !k.trim().is_empty())
                        .collect();
                    let mut ids = Vec::with_capacity(keys.len());
                    for lower_key in keys {
                        let (child, _) = lower.get_or_create(&lower_key).await?;
                        if child.has_unresolved_binding() {
                            to_resolve.push(child.id);
                        }
                        ids.push(child.id);
                    }
                    ids
                };

                for child in children {
                    self.repair_parent(parent.id, child).await?;
                }
            }

            if !to_resolve.is_empty() {
                to_resolve.sort_unstable();
                to_resolve.dedup();
                self.store.resolve_bindings(&to_resolve).await?;
            }

            // Commit this level so the next one observes committed parents
            self.store.commit().await?;
            log::debug!("finished building hierarchy at level {}", level_name);
        }

        Ok(())
    }

    /// Bring one child's derived-relationship parent in line with `target`
    ///
    /// 0 parents: attach. 1 matching parent: no-op. 1 different parent:
    /// detach and attach. More than one parent: remove every non-target
    /// parent and attach the target if missing. The extras are dropped
    /// without confirming which was semantically right; only the computed
    /// target survives.
    async fn repair_parent(&self, target: NodeId, child: NodeId) -> Result<(), StoreError> {
        let parents = self.store.get_parents(child).await?;
        match parents.len() {
            0 => self.store.add_child(target, child).await?,
            1 => {
                if parents[0].id != target {
                    self.store.remove_child(parents[0].id, child).await?;
                    self.store.add_child(target, child).await?;
                }
            }
            _ => {
                log::warn!(
                    "node {} had {} derived-relationship parents; removing invalid parents",
                    child,
                    parents.len()
                );
                let mut has_target = false;
                for parent in &parents {
                    if parent.id == target {
                        has_target = true;
                    } else {
                        self.store.remove_child(parent.id, child).await?;
                    }
                }
                if !has_target {
                    self.store.add_child(target, child).await?;
                }
            }
        }
        Ok(())
    }

    /// Drain the change log and reconcile any changed leaf nodes
    ///
    /// Both the notification path and the timer path funnel through the
    /// cursor lock, so event-driven and timer-driven reconciliation never
    /// overlap.
    pub async fn poll_changes(&self) -> Result<(), StoreError> {
        let mut cursor = self.cursor.lock().await;
        let (items, new_cursor) = self.store.find_changes(*cursor).await?;
        *cursor = new_cursor;
        if items.is_empty() {
            return Ok(());
        }

        let was_listening = self.state() == SyncState::Listening;
        if was_listening {
            self.set_state(SyncState::Reconciling);
        }

        // Refresh changed objects and keep only leaf-template nodes
        let leaf = self.settings.leaf_template();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut changed: Vec<Node> = Vec::new();
        for item in items {
            if !item.base_template.eq_ignore_ascii_case(leaf) || !seen.insert(item.node) {
                continue;
            }
            match self.store.get_node(item.node).await {
                Ok(node) => {
                    log::info!("change in leaf node {} detected", node.name);
                    changed.push(node);
                }
                Err(e) => log::warn!("changed node {} could not be refreshed: {}", item.node, e),
            }
        }

        let result = self.reconcile_batch(changed).await;
        if was_listening {
            self.set_state(SyncState::Listening);
        }
        result
    }

    /// Full build, then react to change notifications and the refresh timer
    /// until the shared stop signal is set
    pub async fn run(&mut self) -> Result<(), StoreError> {
        self.build_containers().await?;
        self.build_hierarchy().await?;

        self.set_state(SyncState::Listening);
        let notify = self.store.change_notifier();
        let mut timer = tokio::time::interval(self.settings.refresh_interval);
        // Non-overlapping: the timer does not try to catch up on ticks that
        // fired while a previous reconciliation was still running
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await;

        loop {
            if self.stop.is_stopped() {
                break;
            }
            tokio::select! {
                _ = notify.notified() => {
                    if let Err(e) = self.poll_changes().await {
                        log::warn!("change-driven reconciliation failed: {}", e);
                    }
                }
                _ = timer.tick() => {
                    log::debug!("refreshing target database for changes");
                    if let Err(e) = self.poll_changes().await {
                        log::warn!("timer-driven reconciliation failed: {}", e);
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop listening. Safe to call from any state, repeatedly.
    pub fn shutdown(&self) {
        self.stop.stop();
        self.set_state(SyncState::Stopped);
    }
}
