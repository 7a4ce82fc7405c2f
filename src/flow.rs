use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::AnalysisAbort;
use crate::ir::{Method, Operand};
use crate::opcodes;

/// Exception types whose handlers also catch `NullPointerException`.
const NPE_CATCHERS: &[&str] = &[
    "java/lang/NullPointerException",
    "java/lang/RuntimeException",
    "java/lang/Exception",
    "java/lang/Throwable",
];

/// Instruction-level control-flow graph consumed by the strategies.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlFlowGraph {
    /// Successors per instruction: fall-through first, then jump targets, then handlers.
    pub transitions: Vec<Vec<usize>>,
    /// `(from, handler)` pairs reached by throwing.
    pub error_transitions: BTreeSet<(usize, usize)>,
    /// Instructions entered by a back edge.
    pub loop_enters: Vec<bool>,
    /// Handler taken when the instruction raises a null-pointer exception.
    pub npe_targets: BTreeMap<usize, usize>,
}

impl ControlFlowGraph {
    pub fn is_error_edge(&self, from: usize, to: usize) -> bool {
        self.error_transitions.contains(&(from, to))
    }

    /// Whether one interpretation pass sees every execution of the method.
    pub fn is_single_path(&self) -> bool {
        self.error_transitions.is_empty()
            && self.transitions.iter().all(|next| next.len() <= 1)
            && !self.loop_enters.iter().any(|enter| *enter)
    }
}

/// Builds the flow graph of a decoded method body.
pub fn build_flow_graph(method: &Method) -> Result<ControlFlowGraph, AnalysisAbort> {
    let count = method.insns.len();
    let mut transitions = Vec::with_capacity(count);
    for (index, insn) in method.insns.iter().enumerate() {
        let mut next = Vec::new();
        let fall_through = index + 1;
        match insn.opcode {
            opcodes::GOTO | opcodes::GOTO_W => next.push(jump_target(&insn.operand, index)?),
            opcodes::JSR | opcodes::JSR_W | opcodes::RET => {
                return Err(AnalysisAbort::malformed(format!(
                    "subroutine instruction at {index}"
                )));
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                let Operand::Switch { default, targets } = &insn.operand else {
                    return Err(AnalysisAbort::malformed(format!("switch without targets at {index}")));
                };
                next.push(*default);
                next.extend(targets.iter().copied());
            }
            opcode if opcodes::is_return(opcode) || opcode == opcodes::ATHROW => {}
            opcode if opcodes::is_conditional(opcode) => {
                next.push(fall_through);
                next.push(jump_target(&insn.operand, index)?);
            }
            _ => next.push(fall_through),
        }
        dedup_in_order(&mut next);
        if let Some(target) = next.iter().find(|target| **target >= count) {
            return Err(AnalysisAbort::malformed(format!(
                "instruction {index} transfers control to {target} outside the method"
            )));
        }
        transitions.push(next);
    }

    let mut error_transitions = BTreeSet::new();
    let mut npe_targets = BTreeMap::new();
    for handler in &method.handlers {
        if handler.handler >= count || handler.end > count {
            return Err(AnalysisAbort::malformed("exception handler outside the method"));
        }
        let catches_npe = handler
            .catch_type
            .as_deref()
            .is_none_or(|catch_type| NPE_CATCHERS.contains(&catch_type));
        for index in handler.start..handler.end {
            if !transitions[index].contains(&handler.handler) {
                transitions[index].push(handler.handler);
            }
            error_transitions.insert((index, handler.handler));
            if catches_npe && opcodes::dereferences(method.insns[index].opcode) {
                npe_targets.entry(index).or_insert(handler.handler);
            }
        }
    }

    let loop_enters = find_loop_enters(&transitions);
    Ok(ControlFlowGraph {
        transitions,
        error_transitions,
        loop_enters,
        npe_targets,
    })
}

fn jump_target(operand: &Operand, index: usize) -> Result<usize, AnalysisAbort> {
    match operand {
        Operand::Jump(target) => Ok(*target),
        _ => Err(AnalysisAbort::malformed(format!("branch without target at {index}"))),
    }
}

fn dedup_in_order(targets: &mut Vec<usize>) {
    let mut seen = BTreeSet::new();
    targets.retain(|target| seen.insert(*target));
}

/// Marks targets of DFS back edges, iteratively to survive very long methods.
fn find_loop_enters(transitions: &[Vec<usize>]) -> Vec<bool> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut enters = vec![false; transitions.len()];
    if transitions.is_empty() {
        return enters;
    }
    let mut marks = vec![Mark::Unvisited; transitions.len()];
    let mut stack = vec![(0usize, 0usize)];
    marks[0] = Mark::OnStack;
    while let Some((node, next_edge)) = stack.last_mut() {
        let node = *node;
        if let Some(&successor) = transitions[node].get(*next_edge) {
            *next_edge += 1;
            match marks[successor] {
                Mark::Unvisited => {
                    marks[successor] = Mark::OnStack;
                    stack.push((successor, 0));
                }
                Mark::OnStack => enters[successor] = true,
                Mark::Done => {}
            }
        } else {
            marks[node] = Mark::Done;
            stack.pop();
        }
    }
    enters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExceptionHandler, Insn, MethodAccess};

    fn method(insns: Vec<Insn>, handlers: Vec<ExceptionHandler>) -> Method {
        Method {
            name: "m".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess::default(),
            max_locals: 1,
            insns,
            handlers,
        }
    }

    fn op(opcode: u8) -> Insn {
        Insn::new(0, opcode, Operand::None)
    }

    #[test]
    fn loop_header_is_detected() {
        // 0: iconst_0  1: ifeq 3  2: goto 0  3: return
        let insns = vec![
            op(opcodes::ICONST_0),
            Insn::new(1, opcodes::IFEQ, Operand::Jump(3)),
            Insn::new(4, opcodes::GOTO, Operand::Jump(0)),
            op(opcodes::RETURN),
        ];
        let graph = build_flow_graph(&method(insns, Vec::new())).expect("graph");
        assert_eq!(graph.transitions[1], vec![2, 3]);
        assert_eq!(graph.loop_enters, vec![true, false, false, false]);
        assert!(!graph.is_single_path());
    }

    #[test]
    fn straight_line_method_is_single_path() {
        let insns = vec![op(opcodes::ALOAD_0), op(opcodes::ARETURN)];
        let graph = build_flow_graph(&method(insns, Vec::new())).expect("graph");
        assert!(graph.is_single_path());
        assert!(graph.transitions[1].is_empty());
    }

    #[test]
    fn handlers_add_error_edges_and_npe_targets() {
        let insns = vec![
            op(opcodes::ALOAD_0),
            op(opcodes::ARRAYLENGTH),
            op(opcodes::IRETURN),
            op(opcodes::POP),
            op(opcodes::ICONST_0),
            op(opcodes::IRETURN),
        ];
        let handlers = vec![ExceptionHandler {
            start: 0,
            end: 2,
            handler: 3,
            catch_type: Some("java/lang/NullPointerException".to_string()),
        }];
        let graph = build_flow_graph(&method(insns, handlers)).expect("graph");
        assert!(graph.is_error_edge(1, 3));
        assert!(graph.is_error_edge(0, 3));
        assert_eq!(graph.npe_targets, BTreeMap::from([(1, 3)]));
        assert_eq!(graph.transitions[1], vec![2, 3]);
    }

    #[test]
    fn handlers_for_unrelated_exceptions_are_not_npe_targets() {
        let insns = vec![op(opcodes::ALOAD_0), op(opcodes::ARRAYLENGTH), op(opcodes::IRETURN)];
        let handlers = vec![ExceptionHandler {
            start: 0,
            end: 2,
            handler: 2,
            catch_type: Some("java/io/IOException".to_string()),
        }];
        let graph = build_flow_graph(&method(insns, handlers)).expect("graph");
        assert!(graph.npe_targets.is_empty());
    }

    #[test]
    fn subroutines_are_rejected() {
        let insns = vec![Insn::new(0, opcodes::JSR, Operand::Jump(1)), op(opcodes::RETURN)];
        assert!(matches!(
            build_flow_graph(&method(insns, Vec::new())),
            Err(AnalysisAbort::MalformedInput(_))
        ));
    }
}
