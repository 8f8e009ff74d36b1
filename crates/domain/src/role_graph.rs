use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::{GroupingRule, Subject};

/// Upper bound on nodes visited by a single traversal.
pub const MAX_TRAVERSAL_NODES: usize = 10_000;

/// Arena-backed adjacency structure over the grouping rules of one domain.
///
/// Nodes are typed subjects (users, groups, roles); edges run from member to
/// target. Forward edges drive reachability, reverse edges answer "who points
/// at this node".
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    nodes: Vec<Subject>,
    index: HashMap<Subject, usize>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl RoleGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from grouping rules.
    #[must_use]
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a GroupingRule>) -> Self {
        let mut graph = Self::new();
        for rule in rules {
            graph.insert_edge(rule.member(), rule.target());
        }
        graph
    }

    /// Inserts an edge, returning `false` when it already existed.
    pub fn insert_edge(&mut self, member: &Subject, target: &Subject) -> bool {
        let member_id = self.node_id(member);
        let target_id = self.node_id(target);

        if self.outgoing[member_id].contains(&target_id) {
            return false;
        }

        self.outgoing[member_id].push(target_id);
        self.incoming[target_id].push(member_id);
        true
    }

    fn node_id(&mut self, subject: &Subject) -> usize {
        if let Some(id) = self.index.get(subject) {
            return *id;
        }

        let id = self.nodes.len();
        self.nodes.push(subject.clone());
        self.index.insert(subject.clone(), id);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Returns whether the subject appears on either side of any edge.
    #[must_use]
    pub fn contains(&self, subject: &Subject) -> bool {
        self.index.contains_key(subject)
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.outgoing.iter().map(Vec::len).sum()
    }

    /// Returns the direct targets of a subject.
    pub fn targets<'a>(&'a self, subject: &Subject) -> impl Iterator<Item = &'a Subject> + use<'a> {
        let ids: &'a [usize] = match self.index.get(subject) {
            Some(id) => self.outgoing[*id].as_slice(),
            None => &[],
        };
        ids.iter().map(|id| &self.nodes[*id])
    }

    /// Returns the direct members of a subject.
    pub fn members<'a>(&'a self, subject: &Subject) -> impl Iterator<Item = &'a Subject> + use<'a> {
        let ids: &'a [usize] = match self.index.get(subject) {
            Some(id) => self.incoming[*id].as_slice(),
            None => &[],
        };
        ids.iter().map(|id| &self.nodes[*id])
    }

    /// Returns the direct parent of a role.
    #[must_use]
    pub fn parent_role(&self, role: &str) -> Option<&str> {
        self.targets(&Subject::Role(role.to_owned()))
            .find_map(Subject::as_role)
    }

    /// Returns every role name appearing in the graph.
    #[must_use]
    pub fn role_names(&self) -> BTreeSet<&str> {
        self.nodes.iter().filter_map(Subject::as_role).collect()
    }

    /// Returns every subject reachable from `start`, excluding `start`.
    #[must_use]
    pub fn reachable_from(&self, start: &Subject) -> BTreeSet<Subject> {
        traverse(start, |node| self.targets(node).cloned().collect::<Vec<_>>())
    }

    /// Returns the parent chain of a role, nearest parent first.
    #[must_use]
    pub fn ancestors(&self, role: &str) -> Vec<String> {
        ancestor_chain(role, |current| self.parent_role(current).map(str::to_owned))
    }

    /// Returns whether adding `child -> parent` would close a cycle.
    #[must_use]
    pub fn would_create_cycle(&self, child: &str, parent: &str) -> bool {
        would_create_cycle(child, parent, |current| {
            self.parent_role(current).map(str::to_owned)
        })
    }
}

/// Breadth-first traversal from `start` using a caller-supplied neighbor
/// function.
///
/// The visited set makes cyclic input terminate; the walk also stops after
/// [`MAX_TRAVERSAL_NODES`] nodes.
pub fn traverse<F, I>(start: &Subject, mut neighbors: F) -> BTreeSet<Subject>
where
    F: FnMut(&Subject) -> I,
    I: IntoIterator<Item = Subject>,
{
    let mut visited = HashSet::from([start.clone()]);
    let mut reached = BTreeSet::new();
    let mut frontier = VecDeque::from([start.clone()]);

    while let Some(node) = frontier.pop_front() {
        for next in neighbors(&node) {
            if visited.len() >= MAX_TRAVERSAL_NODES {
                return reached;
            }
            if visited.insert(next.clone()) {
                reached.insert(next.clone());
                frontier.push_back(next);
            }
        }
    }

    reached
}

/// Walks single-parent inheritance upward from `role`.
///
/// Stops at the first role without a parent or on any revisit.
pub fn ancestor_chain<F>(role: &str, mut parent_of: F) -> Vec<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::from([role.to_owned()]);
    let mut current = role.to_owned();

    while let Some(parent) = parent_of(current.as_str()) {
        if !seen.insert(parent.clone()) || chain.len() >= MAX_TRAVERSAL_NODES {
            break;
        }
        chain.push(parent.clone());
        current = parent;
    }

    chain
}

/// Returns whether making `child` inherit from `parent` would close a cycle.
pub fn would_create_cycle<F>(child: &str, parent: &str, parent_of: F) -> bool
where
    F: FnMut(&str) -> Option<String>,
{
    child == parent
        || ancestor_chain(parent, parent_of)
            .iter()
            .any(|ancestor| ancestor == child)
}
