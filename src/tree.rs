//! The nested address tree and the builder that folds records into it.
//!
//! The builder moves through `Empty → Building` as records arrive and
//! [`TreeBuilder::finish`] consumes it into a read-only [`AddressTree`].

use std::collections::BTreeMap;

use log::debug;

use crate::address::{add, advance};
use crate::classify::Placement;
use crate::error::{Diagnostics, RowParseError, Warning};
use crate::records::ParameterRecord;

/// A node of the address tree: either a branch of children keyed by the
/// next address byte, or a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum AddressNode {
    Branch {
        label: Option<String>,
        children: BTreeMap<u32, AddressNode>,
    },
    Leaf(ParameterRecord),
}

impl AddressNode {
    fn branch() -> Self {
        AddressNode::Branch {
            label: None,
            children: BTreeMap::new(),
        }
    }

    fn describe(&self) -> String {
        match self {
            AddressNode::Leaf(record) => record.name.clone(),
            AddressNode::Branch { label, children } => match label {
                Some(label) => format!("{} ({} entries)", label, children.len()),
                None => format!("block of {} entries", children.len()),
            },
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            AddressNode::Branch { label, .. } => label.as_deref(),
            AddressNode::Leaf(_) => None,
        }
    }

    /// Node at `path` below this one
    pub fn get(&self, path: &[u32]) -> Option<&AddressNode> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        match self {
            AddressNode::Branch { children, .. } => children.get(first)?.get(rest),
            AddressNode::Leaf(_) => None,
        }
    }

    fn collect_leaves<'a>(&'a self, path: &mut Vec<u32>, out: &mut Vec<(Vec<u32>, &'a ParameterRecord)>) {
        match self {
            AddressNode::Leaf(record) => out.push((path.clone(), record)),
            AddressNode::Branch { children, .. } => {
                for (offset, child) in children {
                    path.push(*offset);
                    child.collect_leaves(path, out);
                    path.pop();
                }
            }
        }
    }
}

/// Finished tree for one model
#[derive(Debug, Clone, PartialEq)]
pub struct AddressTree {
    pub model: String,
    /// Always a branch
    pub root: AddressNode,
}

impl AddressTree {
    pub fn get(&self, path: &[u32]) -> Option<&AddressNode> {
        self.root.get(path)
    }

    /// Parameter at a full address
    pub fn leaf(&self, path: &[u32]) -> Option<&ParameterRecord> {
        match self.get(path)? {
            AddressNode::Leaf(record) => Some(record),
            AddressNode::Branch { .. } => None,
        }
    }

    /// Every parameter with its full address, in ascending address order.
    pub fn leaves(&self) -> Vec<(Vec<u32>, &ParameterRecord)> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }
}

/// How the records of the next table are placed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableContext {
    /// Caption label applied to the table's shared branch
    pub label: Option<String>,
    /// Base address for offset placement; the running offset when absent
    pub base: Option<Vec<u32>>,
    /// Carry on the previous table (same base, same label)
    pub continuation: bool,
    /// The base is a block reference whose placeholder leaf gives way to the
    /// table's parameters
    pub mount: bool,
}

#[derive(Debug, Clone)]
struct OpenTable {
    label: Option<String>,
    base: Option<Vec<u32>>,
    paths: Vec<Vec<u32>>,
}

#[derive(Debug)]
struct Building {
    root: AddressNode,
    /// Byte after the last folded record
    cursor: Option<Vec<u32>>,
    last_resolved: Option<Vec<u32>>,
    table: Option<OpenTable>,
    /// Table closed most recently, kept for continuations
    closed: Option<OpenTable>,
    folded: usize,
}

impl Building {
    fn new() -> Self {
        Self {
            root: AddressNode::branch(),
            cursor: None,
            last_resolved: None,
            table: None,
            closed: None,
            folded: 0,
        }
    }
}

#[derive(Debug)]
enum BuilderState {
    Empty,
    Building(Building),
}

/// Folds parameter records into an [`AddressTree`].
#[derive(Debug)]
pub struct TreeBuilder {
    model: String,
    state: BuilderState,
}

impl TreeBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: BuilderState::Empty,
        }
    }

    fn building(&mut self) -> &mut Building {
        if let BuilderState::Empty = self.state {
            self.state = BuilderState::Building(Building::new());
        }
        match &mut self.state {
            BuilderState::Building(building) => building,
            BuilderState::Empty => unreachable!("state set to Building above"),
        }
    }

    /// Number of records folded so far
    pub fn folded(&self) -> usize {
        match &self.state {
            BuilderState::Empty => 0,
            BuilderState::Building(b) => b.folded,
        }
    }

    /// Start placing the records of a new table. An open table is closed first.
    pub fn begin_table(&mut self, context: TableContext) {
        self.end_table();
        let building = self.building();

        if context.continuation {
            if let Some(previous) = building.closed.take() {
                building.table = Some(previous);
                return;
            }
        }

        let base = context.base.or_else(|| building.cursor.clone());
        if context.mount {
            if let Some(base) = &base {
                remove_placeholder(&mut building.root, base);
            }
        }
        building.table = Some(OpenTable {
            label: context.label,
            base,
            paths: Vec::new(),
        });
    }

    /// Close the open table, labelling the deepest branch all its records share.
    pub fn end_table(&mut self) {
        let BuilderState::Building(building) = &mut self.state else {
            return;
        };
        let Some(table) = building.table.take() else {
            return;
        };

        if let Some(label) = &table.label {
            if let Some(prefix) = shared_branch(&table.paths) {
                if let Some(AddressNode::Branch { label: slot, .. }) = node_mut(&mut building.root, &prefix) {
                    *slot = Some(label.clone());
                }
            }
        }
        building.closed = Some(table);
    }

    /// Resolve a record's address and place it in the tree. Returns the
    /// resolved address.
    pub fn fold(
        &mut self,
        record: ParameterRecord,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<u32>, RowParseError> {
        let building = self.building();
        let resolved = match record.placement {
            Placement::Absolute => record.address.clone(),
            Placement::Offset => match building.table.as_ref().and_then(|t| t.base.as_ref()) {
                Some(base) => add(base, &record.address),
                None => record.address.clone(),
            },
            Placement::Delta => {
                let previous = building
                    .last_resolved
                    .clone()
                    .or_else(|| building.table.as_ref().and_then(|t| t.base.clone()))
                    .ok_or_else(|| RowParseError::Unresolvable(crate::error::format_address(&record.address)))?;
                add(&previous, &record.address)
            }
        };

        building.cursor = Some(advance(&resolved, u64::from(record.size_bytes)));
        building.last_resolved = Some(resolved.clone());
        if let Some(table) = building.table.as_mut() {
            table.paths.push(resolved.clone());
        }
        building.folded += 1;
        insert(&mut building.root, &resolved, record, diagnostics);
        Ok(resolved)
    }

    /// Consume the builder into the finished tree.
    pub fn finish(mut self) -> AddressTree {
        self.end_table();
        let root = match self.state {
            BuilderState::Empty => AddressNode::branch(),
            BuilderState::Building(building) => {
                debug!("address tree finished with {} records folded", building.folded);
                building.root
            }
        };
        AddressTree {
            model: self.model,
            root,
        }
    }
}

/// Longest common prefix of the paths, stopping short of any full path so
/// that it names a branch.
fn shared_branch(paths: &[Vec<u32>]) -> Option<Vec<u32>> {
    let first = paths.first()?;
    let mut len = paths.iter().map(Vec::len).min()?.saturating_sub(1);
    for path in &paths[1..] {
        len = len.min(first.iter().zip(path).take_while(|(a, b)| a == b).count());
    }
    (len > 0).then(|| first[..len].to_vec())
}

fn node_mut<'a>(node: &'a mut AddressNode, path: &[u32]) -> Option<&'a mut AddressNode> {
    let Some((first, rest)) = path.split_first() else {
        return Some(node);
    };
    match node {
        AddressNode::Branch { children, .. } => node_mut(children.get_mut(first)?, rest),
        AddressNode::Leaf(_) => None,
    }
}

/// Drop the reference leaf at a block's base address.
fn remove_placeholder(root: &mut AddressNode, base: &[u32]) {
    let Some((last, parent)) = base.split_last() else {
        return;
    };
    if let Some(AddressNode::Branch { children, .. }) = node_mut(root, parent) {
        if let Some(AddressNode::Leaf(record)) = children.get(last) {
            debug!("mounting block over reference {:?}", record.name);
            children.remove(last);
        }
    }
}

fn insert(root: &mut AddressNode, path: &[u32], record: ParameterRecord, diagnostics: &mut Diagnostics) {
    if let AddressNode::Branch { children, .. } = root {
        if !path.is_empty() {
            insert_into(children, path, 0, record, diagnostics);
        }
    }
}

/// Place `record` at `path[depth..]` below `children`, replacing whatever is
/// in the way with a conflict warning.
fn insert_into(
    children: &mut BTreeMap<u32, AddressNode>,
    path: &[u32],
    depth: usize,
    record: ParameterRecord,
    diagnostics: &mut Diagnostics,
) {
    let component = path[depth];
    if depth + 1 == path.len() {
        if let Some(previous) = children.get(&component) {
            diagnostics.push(Warning::AddressConflict {
                address: path.to_vec(),
                previous: previous.describe(),
                replacement: record.name.clone(),
            });
        }
        children.insert(component, AddressNode::Leaf(record));
        return;
    }

    let child = children.entry(component).or_insert_with(AddressNode::branch);
    if let AddressNode::Leaf(previous) = child {
        diagnostics.push(Warning::AddressConflict {
            address: path[..=depth].to_vec(),
            previous: previous.name.clone(),
            replacement: record.name.clone(),
        });
        *child = AddressNode::branch();
    }
    if let AddressNode::Branch { children, .. } = child {
        insert_into(children, path, depth + 1, record, diagnostics);
    }
}
