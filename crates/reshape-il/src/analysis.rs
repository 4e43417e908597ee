//! Derived analyses. None of these are stored in the program model; they are rebuilt from a
//! forward pass whenever the program changes.

use std::collections::HashMap;

use crate::{Function, Id, Program};

/// Block identifiers in reverse post-order from the entry block.
///
/// Successors are visited in terminator order, so a function already laid out in dominance order
/// maps onto itself. Unreachable blocks are not included.
pub fn reverse_post_order(function: &Function) -> Vec<Id> {
    let blocks = function.blocks();
    if blocks.is_empty() {
        return Vec::new();
    }

    let index_of: HashMap<Id, usize> = blocks.iter().enumerate().map(|(i, b)| (b.id(), i)).collect();
    let successors: Vec<Vec<usize>> = blocks
        .iter()
        .map(|b| {
            b.successors()
                .into_iter()
                .filter_map(|id| index_of.get(&id).copied())
                .collect()
        })
        .collect();

    let mut visited = vec![false; blocks.len()];
    let mut post_order = Vec::with_capacity(blocks.len());
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    visited[0] = true;

    while let Some((node, next)) = stack.last_mut() {
        if let Some(&succ) = successors[*node].get(*next) {
            *next += 1;
            if !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            post_order.push(*node);
            stack.pop();
        }
    }

    post_order.iter().rev().map(|&i| blocks[i].id()).collect()
}

/// Immediate dominators of the reachable blocks of one function.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: Option<Id>,
    idom: HashMap<Id, Id>,
}

impl DominatorTree {
    pub fn compute(function: &Function) -> Self {
        let order = reverse_post_order(function);
        let Some(&entry) = order.first() else {
            return Self {
                entry: None,
                idom: HashMap::new(),
            };
        };

        let rpo_index: HashMap<Id, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut predecessors: HashMap<Id, Vec<Id>> = HashMap::new();
        for block in function.blocks() {
            if !rpo_index.contains_key(&block.id()) {
                continue;
            }
            for succ in block.successors() {
                predecessors.entry(succ).or_default().push(block.id());
            }
        }

        let mut idom: HashMap<Id, Id> = HashMap::new();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().skip(1) {
                let mut new_idom: Option<Id> = None;
                for &pred in predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_index, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self {
            entry: Some(entry),
            idom,
        }
    }

    pub fn immediate_dominator(&self, block: Id) -> Option<Id> {
        if Some(block) == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// `a` dominates `b` (every block dominates itself).
    pub fn dominates(&self, a: Id, b: Id) -> bool {
        if !self.idom.contains_key(&b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }
}

fn intersect(idom: &HashMap<Id, Id>, rpo: &HashMap<Id, usize>, mut a: Id, mut b: Id) -> Id {
    while a != b {
        while rpo[&a] > rpo[&b] {
            a = idom[&a];
        }
        while rpo[&b] > rpo[&a] {
            b = idom[&b];
        }
    }
    a
}

/// One use of a value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UseSite {
    pub function: Id,
    pub block: Id,
    pub index: usize,
}

/// Value → users map, valid for the program revision it was computed at.
#[derive(Debug, Clone, Default)]
pub struct UserAnalysis {
    users: HashMap<Id, Vec<UseSite>>,
    revision: u64,
}

impl UserAnalysis {
    pub fn compute(program: &Program) -> Self {
        let mut users: HashMap<Id, Vec<UseSite>> = HashMap::new();
        for function in program.functions() {
            for block in function.blocks() {
                for (index, instruction) in block.instructions().iter().enumerate() {
                    instruction.for_each_operand(|id| {
                        users.entry(id).or_default().push(UseSite {
                            function: function.id(),
                            block: block.id(),
                            index,
                        });
                    });
                }
            }
        }
        Self {
            users,
            revision: program.revision(),
        }
    }

    pub fn users_of(&self, id: Id) -> &[UseSite] {
        self.users.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BasicBlock, Instruction, InstructionKind};

    fn terminate(block: &mut BasicBlock, kind: InstructionKind) {
        block.push(Instruction::synthetic(kind)).unwrap();
    }

    #[test]
    fn diamond_dominators() {
        let mut function = Function::new(Id(1), Id(2), Id(3));
        let mut entry = BasicBlock::new(Id(10));
        terminate(
            &mut entry,
            InstructionKind::BranchConditional {
                condition: Id(50),
                pass: Id(11),
                fail: Id(12),
                control_flow: None,
            },
        );
        let mut left = BasicBlock::new(Id(11));
        terminate(
            &mut left,
            InstructionKind::Branch {
                target: Id(13),
                control_flow: None,
            },
        );
        let mut right = BasicBlock::new(Id(12));
        terminate(
            &mut right,
            InstructionKind::Branch {
                target: Id(13),
                control_flow: None,
            },
        );
        let mut exit = BasicBlock::new(Id(13));
        terminate(&mut exit, InstructionKind::Return { value: None });
        for block in [entry, left, right, exit] {
            function.push_block(block);
        }

        let tree = DominatorTree::compute(&function);
        assert_eq!(tree.immediate_dominator(Id(13)), Some(Id(10)));
        assert!(tree.dominates(Id(10), Id(11)));
        assert!(!tree.dominates(Id(11), Id(13)));
        assert!(tree.dominates(Id(13), Id(13)));
    }
}
