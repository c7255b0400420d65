//! Asset graph store interface and in-memory implementation
//!
//! The graph store holds nodes under named container roots, keyed node
//! templates, and the weak (derived) parent-child relationship the
//! synchronizer maintains. Structural mutations accumulate as pending work
//! until `commit()` checkpoints them; the synchronizer commits once per
//! hierarchy level so higher levels always observe committed lower-level
//! parents.

use crate::store::types::{
    AttributeValue, ChangeCursor, ChangedItem, IntervalRecord, Node, NodeId, StoreError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Node template definition: derivation base plus default attributes
#[derive(Debug, Clone)]
pub struct TemplateDef {
    pub name: String,
    pub base: Option<String>,
    pub attributes: Vec<(String, AttributeValue)>,
}

#[async_trait]
pub trait AssetGraphStore: Send + Sync {
    /// Paged, name-ascending scan of nodes instantiated from `template`
    /// (including derived templates). Returns the page and the total count,
    /// which may grow between pages while a scan is in flight.
    async fn find_nodes_by_template(
        &self,
        template: &str,
        start: usize,
        max: usize,
    ) -> Result<(Vec<Node>, usize), StoreError>;

    /// Bulk-refresh the listed attributes on the given node copies
    async fn load_attributes(
        &self,
        nodes: &mut [Node],
        attributes: &[String],
    ) -> Result<(), StoreError>;

    async fn get_node(&self, id: NodeId) -> Result<Node, StoreError>;

    fn has_template(&self, template: &str) -> bool;

    /// Get or create a container root node at the database root
    async fn ensure_container_root(&self, name: &str) -> Result<Node, StoreError>;

    /// Find an existing container root without creating it
    async fn find_container_root(&self, name: &str) -> Result<Option<Node>, StoreError>;

    /// Create a node from `template` under a container root
    async fn create_node(
        &self,
        container: NodeId,
        name: &str,
        template: &str,
    ) -> Result<Node, StoreError>;

    /// Immediate owned children of a container root, name ascending
    async fn children_of(&self, container: NodeId) -> Result<Vec<Node>, StoreError>;

    /// Weak (derived relationship) children of a parent, name ascending
    async fn weak_children(&self, parent: NodeId) -> Result<Vec<Node>, StoreError>;

    /// Weak (derived relationship) parents of a child, name ascending
    async fn get_parents(&self, child: NodeId) -> Result<Vec<Node>, StoreError>;

    async fn add_child(&self, parent: NodeId, child: NodeId) -> Result<(), StoreError>;

    async fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), StoreError>;

    /// Resolve template-default series bindings on the given nodes
    async fn resolve_bindings(&self, nodes: &[NodeId]) -> Result<(), StoreError>;

    /// Changes recorded after `cursor`, plus the new cursor position
    async fn find_changes(
        &self,
        cursor: ChangeCursor,
    ) -> Result<(Vec<ChangedItem>, ChangeCursor), StoreError>;

    /// Wakeup handle signalled whenever the change log grows
    fn change_notifier(&self) -> Arc<Notify>;

    /// Persist an interval record immediately (checked in, not pending)
    async fn create_interval(&self, record: IntervalRecord) -> Result<(), StoreError>;

    /// Checkpoint pending structural mutations
    async fn commit(&self) -> Result<(), StoreError>;
}

/// Collect every node of a template by paging through the store
///
/// The loop bound is the store-reported total, re-checked each page since
/// the count may grow during the scan.
pub async fn find_all_nodes(
    store: &dyn AssetGraphStore,
    template: &str,
    page_size: usize,
) -> Result<Vec<Node>, StoreError> {
    let mut results = Vec::new();
    let mut start = 0;

    loop {
        let (page, total) = store
            .find_nodes_by_template(template, start, page_size)
            .await?;
        if page.is_empty() {
            break;
        }
        start += page.len();
        results.extend(page);
        if start >= total {
            break;
        }
    }

    Ok(results)
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    templates: HashMap<String, TemplateDef>,
    roots: HashMap<String, NodeId>,
    owned_children: HashMap<NodeId, Vec<NodeId>>,
    weak_parents: HashMap<NodeId, Vec<NodeId>>,
    weak_children: HashMap<NodeId, Vec<NodeId>>,
    change_log: Vec<ChangedItem>,
    intervals: Vec<IntervalRecord>,
    next_id: NodeId,
    pending_mutations: usize,
    committed_mutations: usize,
}

impl GraphState {
    fn base_template_of(&self, template: &str) -> String {
        let mut current = template;
        while let Some(def) = self.templates.get(current) {
            match &def.base {
                Some(base) => current = base,
                None => break,
            }
        }
        current.to_string()
    }

    fn sorted_by_name(&self, ids: &[NodeId]) -> Vec<Node> {
        let mut nodes: Vec<Node> = ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    fn alloc_node(&mut self, name: &str, template: &str, attributes: Vec<(String, AttributeValue)>) -> Node {
        self.next_id += 1;
        let node = Node {
            id: self.next_id,
            name: name.to_string(),
            template: template.to_string(),
            base_template: self.base_template_of(template),
            attributes: attributes.into_iter().collect(),
        };
        self.nodes.insert(node.id, node.clone());
        node
    }
}

/// In-memory graph store
///
/// Stands in for the external asset store in the binaries' demo wiring and
/// in tests. Mutation accounting (`structural_mutations`) exists so tests
/// can assert reconciliation idempotence.
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
    notifier: Arc<Notify>,
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            notifier: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GraphState> {
        // Lock poisoning only happens after a panic elsewhere; propagating it
        // here would just mask that failure.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_template(&self, def: TemplateDef) {
        self.lock().templates.insert(def.name.clone(), def);
    }

    /// Create a leaf node under its `<Base>Elements` container root and log
    /// the change. Test/provisioning helper, not part of the trait.
    pub fn seed_leaf(
        &self,
        name: &str,
        template: &str,
        attributes: Vec<(String, AttributeValue)>,
    ) -> NodeId {
        let id = {
            let mut state = self.lock();
            let base = state.base_template_of(template);
            let root_name = crate::store::types::container_root_name(&base);
            let root_id = match state.roots.get(&root_name) {
                Some(id) => *id,
                None => {
                    let root = state.alloc_node(&root_name, "Container", Vec::new());
                    state.roots.insert(root_name.clone(), root.id);
                    root.id
                }
            };

            let node = state.alloc_node(name, template, attributes);
            state.owned_children.entry(root_id).or_default().push(node.id);
            state.change_log.push(ChangedItem {
                node: node.id,
                base_template: node.base_template.clone(),
            });
            node.id
        };

        self.notifier.notify_one();
        id
    }

    /// Rewrite a leaf's parent-key attribute and log the change
    pub fn update_attribute(&self, node: NodeId, attribute: &str, value: AttributeValue) {
        {
            let mut state = self.lock();
            let item = match state.nodes.get_mut(&node) {
                Some(n) => {
                    n.attributes.insert(attribute.to_string(), value);
                    ChangedItem {
                        node: n.id,
                        base_template: n.base_template.clone(),
                    }
                }
                None => return,
            };
            state.change_log.push(item);
        }
        self.notifier.notify_one();
    }

    /// Total structural mutations performed so far (pending + committed)
    pub fn structural_mutations(&self) -> usize {
        let state = self.lock();
        state.pending_mutations + state.committed_mutations
    }

    pub fn interval_records(&self) -> Vec<IntervalRecord> {
        self.lock().intervals.clone()
    }
}

#[async_trait]
impl AssetGraphStore for MemoryGraphStore {
    async fn find_nodes_by_template(
        &self,
        template: &str,
        start: usize,
        max: usize,
    ) -> Result<(Vec<Node>, usize), StoreError> {
        let state = self.lock();
        let mut matches: Vec<&Node> = state
            .nodes
            .values()
            .filter(|n| n.template == template || n.base_template == template)
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        let total = matches.len();
        let page = matches
            .into_iter()
            .skip(start)
            .take(max)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn load_attributes(
        &self,
        nodes: &mut [Node],
        attributes: &[String],
    ) -> Result<(), StoreError> {
        let state = self.lock();
        for node in nodes.iter_mut() {
            let current = state
                .nodes
                .get(&node.id)
                .ok_or_else(|| StoreError::NotFound(format!("node {}", node.id)))?;
            for attr in attributes {
                match current.attributes.get(attr) {
                    Some(value) => {
                        node.attributes.insert(attr.clone(), value.clone());
                    }
                    None => {
                        node.attributes.remove(attr);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get_node(&self, id: NodeId) -> Result<Node, StoreError> {
        self.lock()
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("node {}", id)))
    }

    fn has_template(&self, template: &str) -> bool {
        self.lock().templates.contains_key(template)
    }

    async fn ensure_container_root(&self, name: &str) -> Result<Node, StoreError> {
        let mut state = self.lock();
        if let Some(id) = state.roots.get(name) {
            let id = *id;
            return state
                .nodes
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("container root {}", name)));
        }

        let root = state.alloc_node(name, "Container", Vec::new());
        state.roots.insert(name.to_string(), root.id);
        state.pending_mutations += 1;
        Ok(root)
    }

    async fn find_container_root(&self, name: &str) -> Result<Option<Node>, StoreError> {
        let state = self.lock();
        Ok(state
            .roots
            .get(name)
            .and_then(|id| state.nodes.get(id))
            .cloned())
    }

    async fn create_node(
        &self,
        container: NodeId,
        name: &str,
        template: &str,
    ) -> Result<Node, StoreError> {
        let node = {
            let mut state = self.lock();
            let defaults = state
                .templates
                .get(template)
                .ok_or_else(|| StoreError::NotFound(format!("template {}", template)))?
                .attributes
                .clone();

            let duplicate = state
                .nodes
                .values()
                .any(|n| n.template == template && n.name == name);
            if duplicate {
                return Err(StoreError::InvalidOperation(format!(
                    "node {} already exists in template {}",
                    name, template
                )));
            }

            let node = state.alloc_node(name, template, defaults);
            state
                .owned_children
                .entry(container)
                .or_default()
                .push(node.id);
            state.pending_mutations += 1;
            let item = ChangedItem {
                node: node.id,
                base_template: node.base_template.clone(),
            };
            state.change_log.push(item);
            node
        };

        self.notifier.notify_one();
        Ok(node)
    }

    async fn children_of(&self, container: NodeId) -> Result<Vec<Node>, StoreError> {
        let state = self.lock();
        let ids = state
            .owned_children
            .get(&container)
            .cloned()
            .unwrap_or_default();
        Ok(state.sorted_by_name(&ids))
    }

    async fn weak_children(&self, parent: NodeId) -> Result<Vec<Node>, StoreError> {
        let state = self.lock();
        let ids = state.weak_children.get(&parent).cloned().unwrap_or_default();
        Ok(state.sorted_by_name(&ids))
    }

    async fn get_parents(&self, child: NodeId) -> Result<Vec<Node>, StoreError> {
        let state = self.lock();
        let ids = state.weak_parents.get(&child).cloned().unwrap_or_default();
        Ok(state.sorted_by_name(&ids))
    }

    async fn add_child(&self, parent: NodeId, child: NodeId) -> Result<(), StoreError> {
        let mut state = self.lock();
        let children = state.weak_children.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
        let parents = state.weak_parents.entry(child).or_default();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
        state.pending_mutations += 1;
        Ok(())
    }

    async fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(children) = state.weak_children.get_mut(&parent) {
            children.retain(|id| *id != child);
        }
        if let Some(parents) = state.weak_parents.get_mut(&child) {
            parents.retain(|id| *id != parent);
        }
        state.pending_mutations += 1;
        Ok(())
    }

    async fn resolve_bindings(&self, nodes: &[NodeId]) -> Result<(), StoreError> {
        let mut state = self.lock();
        for id in nodes {
            let node = state
                .nodes
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("node {}", id)))?;
            let name = node.name.clone();
            let mut touched = false;
            for (attr, value) in node.attributes.iter_mut() {
                if let AttributeValue::Series(binding) = value {
                    if !binding.resolved {
                        binding.config = format!("{}.{}", name, attr);
                        binding.resolved = true;
                        touched = true;
                    }
                }
            }
            if touched {
                state.pending_mutations += 1;
            }
        }
        Ok(())
    }

    async fn find_changes(
        &self,
        cursor: ChangeCursor,
    ) -> Result<(Vec<ChangedItem>, ChangeCursor), StoreError> {
        let state = self.lock();
        let start = (cursor as usize).min(state.change_log.len());
        let items = state.change_log[start..].to_vec();
        Ok((items, state.change_log.len() as ChangeCursor))
    }

    fn change_notifier(&self) -> Arc<Notify> {
        self.notifier.clone()
    }

    async fn create_interval(&self, record: IntervalRecord) -> Result<(), StoreError> {
        self.lock().intervals.push(record);
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.committed_mutations += state.pending_mutations;
        state.pending_mutations = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{SeriesBinding, LEAF_VALUE};

    fn leaf_template() -> TemplateDef {
        TemplateDef {
            name: "Leaf".to_string(),
            base: None,
            attributes: vec![(
                LEAF_VALUE.to_string(),
                AttributeValue::Series(SeriesBinding::template_default("%Node%.Value")),
            )],
        }
    }

    #[tokio::test]
    async fn test_paged_scan_reports_growing_total() {
        let store = MemoryGraphStore::new();
        store.register_template(leaf_template());
        for i in 0..5 {
            store.seed_leaf(&format!("Leaf{:03}", i), "Leaf", Vec::new());
        }

        let (page, total) = store.find_nodes_by_template("Leaf", 0, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);
        assert_eq!(page[0].name, "Leaf000");

        // A node created mid-scan shows up in the re-checked total
        store.seed_leaf("Leaf900", "Leaf", Vec::new());
        let (_, total) = store.find_nodes_by_template("Leaf", 2, 2).await.unwrap();
        assert_eq!(total, 6);

        let all = find_all_nodes(&store, "Leaf", 2).await.unwrap();
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn test_derived_templates_match_base_scan() {
        let store = MemoryGraphStore::new();
        store.register_template(leaf_template());
        store.register_template(TemplateDef {
            name: "Leaf_Sin".to_string(),
            base: Some("Leaf".to_string()),
            attributes: Vec::new(),
        });
        store.seed_leaf("A", "Leaf_Sin", Vec::new());

        let (page, _) = store.find_nodes_by_template("Leaf", 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].base_template, "Leaf");
    }

    #[tokio::test]
    async fn test_weak_edges_and_commit_accounting() {
        let store = MemoryGraphStore::new();
        store.register_template(leaf_template());
        let child = store.seed_leaf("Child", "Leaf", Vec::new());
        let root = store.ensure_container_root("BranchElements").await.unwrap();
        store.register_template(TemplateDef {
            name: "Branch".to_string(),
            base: None,
            attributes: Vec::new(),
        });
        let parent = store.create_node(root.id, "Branch01", "Branch").await.unwrap();

        store.add_child(parent.id, child).await.unwrap();
        let parents = store.get_parents(child).await.unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, parent.id);

        let before = store.structural_mutations();
        store.commit().await.unwrap();
        assert_eq!(store.structural_mutations(), before);

        store.remove_child(parent.id, child).await.unwrap();
        assert!(store.get_parents(child).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_log_cursor_advances() {
        let store = MemoryGraphStore::new();
        store.register_template(leaf_template());
        let (items, cursor) = store.find_changes(0).await.unwrap();
        assert!(items.is_empty());

        store.seed_leaf("L1", "Leaf", Vec::new());
        let (items, cursor) = store.find_changes(cursor).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].base_template, "Leaf");

        let (items, _) = store.find_changes(cursor).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_bindings_marks_template_defaults() {
        let store = MemoryGraphStore::new();
        store.register_template(leaf_template());
        let id = store.seed_leaf(
            "L1",
            "Leaf",
            vec![(
                LEAF_VALUE.to_string(),
                AttributeValue::Series(SeriesBinding::template_default("%Node%.Value")),
            )],
        );

        store.resolve_bindings(&[id]).await.unwrap();
        let node = store.get_node(id).await.unwrap();
        assert!(!node.has_unresolved_binding());
        match node.attributes.get(LEAF_VALUE) {
            Some(AttributeValue::Series(binding)) => assert_eq!(binding.config, "L1.Value"),
            other => panic!("unexpected attribute: {:?}", other),
        }
    }
}
