//! Per-level container index: get-or-create arena over one hierarchy level
//!
//! Each non-leaf level has a container root node at the database root; this
//! index pre-loads the root's existing children into a name-to-node map and
//! serves idempotent get-or-create lookups from then on. The raw map is never
//! exposed; all access goes through `get_or_create` under the per-index lock.

use crate::store::{AssetGraphStore, Node, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ContainerIndex {
    template: String,
    container: Node,
    is_leaf: bool,
    store: Arc<dyn AssetGraphStore>,
    // tokio mutex: held across the create await so concurrent callers can
    // never materialize the same key twice
    nodes: Mutex<HashMap<String, Node>>,
}

impl ContainerIndex {
    /// Build an index for one level, pre-loading existing children
    ///
    /// The leaf level is queried directly from the store by the synchronizer,
    /// so its index skips the preload and refuses get-or-create.
    pub async fn build(
        store: Arc<dyn AssetGraphStore>,
        template: &str,
        container: Node,
        is_leaf: bool,
    ) -> Result<Self, StoreError> {
        let mut nodes = HashMap::new();
        if !is_leaf {
            for child in store.children_of(container.id).await? {
                nodes.insert(child.name.clone(), child);
            }
        }

        Ok(Self {
            template: template.to_string(),
            container,
            is_leaf,
            store,
            nodes: Mutex::new(nodes),
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn container(&self) -> &Node {
        &self.container
    }

    /// Node name derived from a parent key: numeric keys are zero-padded so
    /// names sort naturally, anything else is appended as-is.
    fn node_name_for_key(&self, key: &str) -> String {
        match key.trim().parse::<i64>() {
            Ok(n) => format!("{}{:08}", self.template, n),
            Err(_) => format!("{}{}", self.template, key.trim()),
        }
    }

    /// Return the node for `key`, creating and registering it if absent
    ///
    /// The boolean reports whether the node was created by this call, so the
    /// caller can queue newly created nodes for point-binding resolution.
    pub async fn get_or_create(&self, key: &str) -> Result<(Node, bool), StoreError> {
        if self.is_leaf {
            return Err(StoreError::InvalidOperation(
                "get_or_create is not designed for the leaf level".to_string(),
            ));
        }

        let name = self.node_name_for_key(key);
        let mut nodes = self.nodes.lock().await;
        if let Some(existing) = nodes.get(&name) {
            return Ok((existing.clone(), false));
        }

        let created = self
            .store
            .create_node(self.container.id, &name, &self.template)
            .await?;
        nodes.insert(name, created.clone());
        Ok((created, true))
    }
}
