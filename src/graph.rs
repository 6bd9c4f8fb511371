use by_address::ByThinAddress;
use smallvec::SmallVec;

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::panic::Location;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

use crate::ops::Op;
use crate::shape::Shape;

static NODE_NEXT_ID: AtomicU64 = AtomicU64::new(0);

pub type NodeRef = Arc<Node>;
pub type Operands = SmallVec<[NodeRef; 2]>;

/// A process-unique identifier for a [Node].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Debug provenance attached to a [Node]. Never affects shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The `/`-joined scope stack active when the node was built.
    pub scope: Option<String>,
    /// Where the primitive which built the node was called from.
    pub location: Option<&'static Location<'static>>,
}

/// One operation in a lazy graph.
///
/// Nodes are immutable once built. Operands are shared, so a sub-result may be used by any
/// number of later nodes, and since a node can only refer to nodes which already exist the
/// graph is acyclic.
pub struct Node {
    id: NodeId,
    op: Op,
    operands: Operands,
    shape: Shape,
    metadata: Metadata,
}

impl Node {
    /// Allocates a node. `shape` must already be inferred from `op` and `operands`.
    pub(crate) fn new(op: Op, operands: Operands, shape: Shape, metadata: Metadata) -> NodeRef {
        Arc::new(Node {
            id: NodeId(NODE_NEXT_ID.fetch_add(1, atomic::Ordering::Relaxed)),
            op,
            operands,
            shape,
            metadata,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn operands(&self) -> &[NodeRef] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> Option<&NodeRef> {
        self.operands.get(index)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Drop for Node {
    // Operands are released from a work list rather than recursively, so dropping the last
    // handle to a very deep graph can't overflow the stack.
    fn drop(&mut self) {
        let mut pending: Vec<NodeRef> = mem::take(&mut self.operands).into_vec();
        while let Some(operand) = pending.pop() {
            if let Some(mut node) = Arc::into_inner(operand) {
                pending.extend(mem::take(&mut node.operands));
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("op", &self.op.name())
            .field(
                "operands",
                &self.operands.iter().map(|o| o.id).collect::<Vec<_>>(),
            )
            .field("shape", &self.shape.to_string())
            .finish()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Returns every node reachable from `roots`, each exactly once, with operands ordered before
/// their users.
///
/// Roots are visited in order, so the result for `[a, b]` lists `a`'s subgraph first.
pub fn post_order(roots: &[NodeRef]) -> Vec<NodeRef> {
    let mut visited: HashSet<ByThinAddress<&Node>> = HashSet::new();
    let mut order = Vec::new();
    // Each entry is a node and the index of the next operand to visit.
    let mut stack: Vec<(&NodeRef, usize)> = Vec::new();

    for root in roots {
        if visited.contains(&ByThinAddress(&**root)) {
            continue;
        }
        stack.push((root, 0));
        while let Some((node, next_operand)) = stack.pop() {
            if let Some(operand) = node.operands.get(next_operand) {
                stack.push((node, next_operand + 1));
                if !visited.contains(&ByThinAddress(&**operand)) {
                    stack.push((operand, 0));
                }
            } else if visited.insert(ByThinAddress(&**node)) {
                order.push(Arc::clone(node));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Dtype;
    use crate::shape;
    use smallvec::smallvec;

    fn leaf() -> NodeRef {
        Node::new(
            Op::Eye {
                rows: 3,
                cols: 3,
                dtype: Dtype::Float32,
            },
            smallvec![],
            shape!(f32, [3, 3]),
            Metadata::default(),
        )
    }

    fn mul(a: &NodeRef, b: &NodeRef) -> NodeRef {
        Node::new(
            Op::Mul,
            smallvec![Arc::clone(a), Arc::clone(b)],
            shape!(f32, [3, 3]),
            Metadata::default(),
        )
    }

    #[test]
    fn test_post_order_visits_shared_nodes_once() {
        let a = leaf();
        let b = mul(&a, &a);
        let c = mul(&b, &a);
        let order = post_order(&[Arc::clone(&c)]);
        let ids = order.iter().map(|n| n.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
    }

    #[test]
    fn test_post_order_operands_precede_users() {
        let a = leaf();
        let b = leaf();
        let ab = mul(&a, &b);
        let ba = mul(&b, &a);
        let root = mul(&ab, &ba);
        let order = post_order(&[Arc::clone(&root), Arc::clone(&ab)]);
        assert_eq!(order.len(), 5);
        let position = |n: &NodeRef| order.iter().position(|o| o.id() == n.id()).unwrap();
        for node in &order {
            for operand in node.operands() {
                assert!(position(operand) < position(node));
            }
        }
        assert_eq!(order.last().unwrap().id(), root.id());
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = leaf();
        let b = leaf();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_dropping_deep_chain() {
        let a = leaf();
        let mut chain = mul(&a, &a);
        for _ in 0..100_000 {
            chain = mul(&chain, &a);
        }
        let weak = Arc::downgrade(&chain);
        drop(chain);
        assert!(weak.upgrade().is_none());
        assert_eq!(Arc::strong_count(&a), 1);
    }

    #[test]
    fn test_dropping_deep_chain_keeps_shared_suffix() {
        let a = leaf();
        let mut chain = mul(&a, &a);
        for _ in 0..50_000 {
            chain = mul(&chain, &a);
        }
        let middle = Arc::clone(&chain);
        for _ in 0..50_000 {
            chain = mul(&chain, &a);
        }
        drop(chain);
        assert_eq!(Arc::strong_count(&middle), 1);
        assert_eq!(post_order(&[Arc::clone(&middle)]).len(), 50_002);
        drop(middle);
        assert_eq!(Arc::strong_count(&a), 1);
    }

    #[test]
    fn test_shared_operands_outlive_handles() {
        let a = leaf();
        let b = mul(&a, &a);
        let weak = Arc::downgrade(&a);
        drop(a);
        assert!(weak.upgrade().is_some());
        drop(b);
        assert!(weak.upgrade().is_none());
    }
}
