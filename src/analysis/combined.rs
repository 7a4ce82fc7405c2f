//! Single interpretation pass for methods without branches, handlers or loops.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::budget::Budget;
use crate::analysis::contracts::{nullable_result, return_result};
use crate::analysis::frame::AbstractValue;
use crate::analysis::interp;
use crate::analysis::key::{Direction, EKey, Member};
use crate::analysis::lattice::{ELattice, Value};
use crate::analysis::result::EResult;
use crate::analysis::worklist::{self, Conf, Hypothesis, State};
use crate::analysis::{AnalysisAbort, MethodBody};
use crate::flow::ControlFlowGraph;
use crate::opcodes;

enum Terminal {
    Return(Option<AbstractValue>),
    Throw,
}

/// Facts collected along the only path of the method.
struct Trace {
    dereferenced: BTreeSet<usize>,
    leaked: BTreeSet<usize>,
    not_null_calls: BTreeMap<usize, BTreeSet<EKey>>,
    nullable_calls: BTreeMap<usize, BTreeSet<EKey>>,
    terminal: Terminal,
}

/// Derives every requested direction from one pass over a single-path method.
pub fn analyze(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    directions: &[Direction],
    budget: &mut Budget<'_>,
) -> Result<Vec<(Direction, EResult)>, AnalysisAbort> {
    if !cfg.is_single_path() {
        return Err(AnalysisAbort::AssumptionViolated(
            "method has more than one path".to_string(),
        ));
    }
    let trace = interpret(body, cfg, budget)?;
    let mut results = Vec::with_capacity(directions.len());
    for &direction in directions {
        let result = assemble(body, &trace, direction)?;
        budget.check_size(result.id_count())?;
        results.push((direction, result));
    }
    Ok(results)
}

fn interpret(
    body: &MethodBody<'_>,
    cfg: &ControlFlowGraph,
    budget: &mut Budget<'_>,
) -> Result<Trace, AnalysisAbort> {
    let mut trace = Trace {
        dereferenced: BTreeSet::new(),
        leaked: BTreeSet::new(),
        not_null_calls: BTreeMap::new(),
        nullable_calls: BTreeMap::new(),
        terminal: Terminal::Throw,
    };
    let mut state = State::entry(body)?;
    loop {
        budget.step()?;
        let index = state.conf.insn;
        let insn = worklist::instruction(body, index)?;
        let stack = &state.conf.frame.stack;
        if let Some(AbstractValue::Param(param)) = interp::dereferenced(insn, stack) {
            trace.dereferenced.insert(*param);
        }
        if let Some(AbstractValue::Param(param)) = interp::stored(insn, stack) {
            trace.leaked.insert(*param);
        }
        if let Some((call, args)) = worklist::call_arguments(insn, stack) {
            let callee = Member::new(&call.owner, &call.name, &call.descriptor);
            for (position, arg) in args.iter().enumerate() {
                let AbstractValue::Param(param) = arg else {
                    continue;
                };
                let key = |nullable| {
                    EKey::new(
                        callee.clone(),
                        Direction::In {
                            param: position,
                            nullable,
                        },
                        call.kind.is_stable(),
                    )
                };
                trace.not_null_calls.entry(*param).or_default().insert(key(false));
                trace.nullable_calls.entry(*param).or_default().insert(key(true));
            }
        }
        if opcodes::is_return(insn.opcode) {
            trace.terminal = Terminal::Return(stack.last().cloned());
            return Ok(trace);
        }
        if insn.opcode == opcodes::ATHROW {
            trace.terminal = Terminal::Throw;
            return Ok(trace);
        }
        let frame = worklist::execute(body, &state)?;
        let Some(&next) = cfg.transitions.get(index).and_then(|next| next.first()) else {
            return Err(AnalysisAbort::malformed(format!(
                "instruction {index} falls off the method"
            )));
        };
        state.conf = Conf { insn: next, frame };
    }
}

fn assemble(
    body: &MethodBody<'_>,
    trace: &Trace,
    direction: Direction,
) -> Result<EResult, AnalysisAbort> {
    let returned = |hypothesis: Option<Hypothesis>| match &trace.terminal {
        Terminal::Return(value) => return_result(body, direction, hypothesis, value.as_ref()),
        Terminal::Throw => EResult::Final(ELattice::for_direction(direction).bot),
    };
    let result = match direction {
        Direction::Out | Direction::NullableOut => returned(None),
        Direction::Throw => EResult::Final(match trace.terminal {
            Terminal::Return(_) => Value::Top,
            Terminal::Throw => Value::Fail,
        }),
        Direction::InOut { param, value } => {
            if value == Value::Null && trace.dereferenced.contains(&param) {
                EResult::Final(Value::Bot)
            } else {
                returned(Some(Hypothesis { param, value }))
            }
        }
        Direction::InThrow { param, value } => {
            if value == Value::Null && trace.dereferenced.contains(&param) {
                EResult::Final(Value::Fail)
            } else {
                match trace.terminal {
                    Terminal::Return(_) => EResult::Final(Value::Top),
                    Terminal::Throw => EResult::Final(Value::Bot),
                }
            }
        }
        Direction::In {
            param,
            nullable: false,
        } => {
            if trace.dereferenced.contains(&param) {
                EResult::Final(Value::NotNull)
            } else {
                let lattice = ELattice::for_direction(direction);
                let keys = trace.not_null_calls.get(&param).cloned().unwrap_or_default();
                EResult::Final(Value::Top).meet_ids(&keys, &lattice)
            }
        }
        Direction::In {
            param,
            nullable: true,
        } => {
            if trace.dereferenced.contains(&param) || trace.leaked.contains(&param) {
                EResult::Final(Value::Top)
            } else {
                nullable_result(trace.nullable_calls.get(&param).cloned().unwrap_or_default())
            }
        }
        other => {
            return Err(AnalysisAbort::AssumptionViolated(format!(
                "{other} is not derived by the single-pass strategy"
            )));
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::budget::{AnalysisConfig, NeverCancel};
    use crate::analysis::contracts::tests::{constant, invoke, load, op, static_method};
    use crate::analysis::{contracts, nonnull_in};
    use crate::flow::build_flow_graph;
    use crate::ir::{Constant, FieldRef, Insn, Kind, Method, Operand};

    fn all_directions() -> Vec<Direction> {
        let mut directions = vec![Direction::Out, Direction::NullableOut, Direction::Throw];
        for param in 0..2 {
            directions.push(Direction::In {
                param,
                nullable: false,
            });
            directions.push(Direction::In {
                param,
                nullable: true,
            });
            for value in [Value::Null, Value::NotNull] {
                directions.push(Direction::InOut { param, value });
                directions.push(Direction::InThrow { param, value });
            }
        }
        directions
    }

    fn assert_agrees_with_worklist(method: &Method) {
        let body = MethodBody::new("Test", method).expect("body");
        let cfg = build_flow_graph(method).expect("graph");
        let config = AnalysisConfig::default();
        let directions = all_directions();
        let mut budget = Budget::new(&config, &NeverCancel);
        let combined = analyze(&body, &cfg, &directions, &mut budget).expect("single pass");
        for (direction, result) in combined {
            let mut budget = Budget::new(&config, &NeverCancel);
            let expected = match direction {
                Direction::In {
                    param,
                    nullable: false,
                } => nonnull_in::analyze(&body, &cfg, param, &mut budget),
                other => contracts::analyze(&body, &cfg, other, &mut budget),
            }
            .expect("worklist");
            assert_eq!(result, expected, "{direction}");
        }
    }

    const TWO_OBJECTS: &str = "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";

    #[test]
    fn agrees_on_returned_parameter() {
        let method = static_method(TWO_OBJECTS, 2, vec![load(opcodes::ALOAD, 1), op(opcodes::ARETURN)]);
        assert_agrees_with_worklist(&method);
    }

    #[test]
    fn agrees_on_dereference_and_delegation() {
        // x.hashCode(); return Util.wrap(y);
        let method = static_method(
            TWO_OBJECTS,
            2,
            vec![
                load(opcodes::ALOAD, 0),
                invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
                op(opcodes::POP),
                load(opcodes::ALOAD, 1),
                invoke(opcodes::INVOKESTATIC, "Util", "wrap", "(Ljava/lang/Object;)Ljava/lang/Object;"),
                op(opcodes::ARETURN),
            ],
        );
        assert_agrees_with_worklist(&method);
    }

    #[test]
    fn agrees_on_leak_and_throw() {
        // Holder.value = y; throw new IllegalStateException();
        let method = static_method(
            TWO_OBJECTS,
            2,
            vec![
                load(opcodes::ALOAD, 1),
                Insn::new(
                    0,
                    opcodes::PUTSTATIC,
                    Operand::Field(FieldRef {
                        owner: "Holder".to_string(),
                        name: "value".to_string(),
                        descriptor: "Ljava/lang/Object;".to_string(),
                        kind: Kind::Reference,
                    }),
                ),
                Insn::new(0, opcodes::NEW, Operand::Type("java/lang/IllegalStateException".to_string())),
                op(opcodes::DUP),
                invoke(opcodes::INVOKESPECIAL, "java/lang/IllegalStateException", "<init>", "()V"),
                op(opcodes::ATHROW),
            ],
        );
        assert_agrees_with_worklist(&method);
    }

    #[test]
    fn agrees_on_null_constant() {
        let method = static_method(
            TWO_OBJECTS,
            2,
            vec![constant(opcodes::ACONST_NULL, Constant::Null), op(opcodes::ARETURN)],
        );
        assert_agrees_with_worklist(&method);
    }
}
