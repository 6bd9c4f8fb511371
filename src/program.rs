//! Lowering of a finished lazy graph into the form handed to a backend.

use log::debug;

use std::sync::Arc;

use crate::graph::{post_order, NodeRef};
use crate::ops::{Op, OpError};
use crate::shape::{ProgramShape, Shape};
use crate::tensor::LazyTensor;
use crate::utils::ascii_name;

/// A graph flattened into execution order.
///
/// Every `device_data` leaf is a parameter. The result is the shape of the single root, or a
/// tuple of the root shapes if there are several.
#[derive(Debug)]
pub struct Program {
    nodes: Vec<NodeRef>,
    parameters: Vec<NodeRef>,
    roots: Vec<NodeRef>,
    shape: ProgramShape,
}

/// Flattens the graphs ending at `roots`, which must all belong to one context.
pub fn lower(roots: &[LazyTensor]) -> Result<Program, OpError> {
    let Some((first, rest)) = roots.split_first() else {
        return Err(OpError::invalid_argument("lower", "expects at least one root"));
    };
    if rest
        .iter()
        .any(|r| !Arc::ptr_eq(r.context(), first.context()))
    {
        return Err(OpError::ContextMismatch { op: "lower" });
    }

    let roots = roots.iter().map(|r| Arc::clone(r.node())).collect::<Vec<_>>();
    let nodes = post_order(&roots);
    let parameters = nodes
        .iter()
        .filter(|n| matches!(n.op(), Op::DeviceData(_)))
        .cloned()
        .collect::<Vec<_>>();

    let result = match roots.as_slice() {
        [root] => root.shape().clone(),
        _ => Shape::tuple(roots.iter().map(|r| r.shape().clone()).collect::<Vec<_>>()),
    };
    let shape = ProgramShape::try_new(
        parameters.iter().map(|p| p.shape().clone()).collect(),
        (0..parameters.len()).map(ascii_name).collect(),
        result,
    )?;
    debug!(
        "Lowered {} nodes with {} parameters: {}",
        nodes.len(),
        parameters.len(),
        shape
    );
    Ok(Program {
        nodes,
        parameters,
        roots,
        shape,
    })
}

impl Program {
    /// All nodes, with operands before their users.
    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn parameters(&self) -> &[NodeRef] {
        &self.parameters
    }

    pub fn roots(&self) -> &[NodeRef] {
        &self.roots
    }

    pub fn program_shape(&self) -> &ProgramShape {
        &self.shape
    }

    /// The position of `node` among the parameters, if it is one.
    pub fn parameter_index(&self, node: &NodeRef) -> Option<usize> {
        self.parameters.iter().position(|p| Arc::ptr_eq(p, node))
    }
}
