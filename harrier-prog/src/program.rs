//! Arena-backed program representation.

use crate::arg::{ArgNode, CsumChunk};
use std::collections::HashSet;

/// Stable index of a node inside a [`Program`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgId(pub u32);

impl ArgId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One syscall invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Index into the target's syscall table.
    pub num: u64,
    /// Top-level arguments, in ABI order.
    pub args: Vec<ArgId>,
    /// The call's `Return` node.
    pub ret: ArgId,
}

/// An ordered sequence of calls over a shared argument arena.
///
/// Cross-references (`Result` referents, checksum chunks) point backwards
/// by arena index, which keeps the graph acyclic without reference
/// counting. The arena owns every node; calls and other nodes only hold
/// indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub(crate) args: Vec<ArgNode>,
    pub(crate) calls: Vec<Call>,
}

impl Program {
    /// The calls in execution order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Resolves an arena index.
    ///
    /// # Panics
    ///
    /// Panics on an index from another program's arena.
    pub fn arg(&self, id: ArgId) -> &ArgNode {
        &self.args[id.index()]
    }

    /// Ids of nodes referenced by some `Result` node, the set whose
    /// values must survive execution. Return placeholders are included.
    pub fn used_args(&self) -> HashSet<ArgId> {
        let mut used = HashSet::new();
        for node in &self.args {
            if let ArgNode::Result {
                referent: Some(id), ..
            } = node
            {
                used.insert(*id);
            }
        }
        used
    }

    /// Ids referenced by data chunks of checksum nodes reachable from
    /// `roots`; their physical addresses feed checksum computation.
    pub(crate) fn csum_targets(&self, roots: &[ArgId]) -> HashSet<ArgId> {
        let mut targets = HashSet::new();
        for &root in roots {
            self.each_sub_arg(root, &mut |node: &ArgNode| {
                if let ArgNode::Csum { chunks, .. } = node {
                    for chunk in chunks {
                        if let CsumChunk::Data { arg, .. } = chunk {
                            targets.insert(*arg);
                        }
                    }
                }
            });
        }
        targets
    }

    /// Depth-first walk over `root` and everything reachable from it,
    /// pointees included.
    pub(crate) fn each_sub_arg(&self, root: ArgId, f: &mut impl FnMut(&ArgNode)) {
        let node = self.arg(root);
        f(node);
        match node {
            ArgNode::Group { fields, .. } => {
                for field in fields {
                    self.each_sub_arg(field.arg, f);
                }
            }
            ArgNode::Union { option, .. } => self.each_sub_arg(*option, f),
            ArgNode::Pointer {
                pointee: Some(p), ..
            } => self.each_sub_arg(*p, f),
            _ => {}
        }
    }
}
