use std::fmt::Debug;
use std::sync::OnceLock;

use tracing::debug;

use crate::analysis::AnalysisAbort;
use crate::analysis::frame::Frame;
use crate::ir::{CallSite, Constant, FieldRef, Insn, Kind, Operand, ValueType};
use crate::opcodes;

/// Value constructors and hooks a strategy supplies to the shared transfer function.
///
/// Defaults produce plain values of the right kind, so a domain only overrides the
/// instructions it tracks.
pub trait Domain {
    type Value: Clone + Debug;

    fn plain(&self, kind: Kind) -> Self::Value;

    /// Whether the value occupies two slots (long or double).
    fn is_wide(&self, value: &Self::Value) -> bool;

    fn constant(&mut self, _insn: usize, constant: &Constant) -> Self::Value {
        self.plain(constant.kind())
    }

    fn new_object(&mut self, _insn: usize, _class: &str) -> Self::Value {
        self.plain(Kind::Reference)
    }

    fn new_array(&mut self, _insn: usize) -> Self::Value {
        self.plain(Kind::Reference)
    }

    fn get_field(
        &mut self,
        _insn: usize,
        field: &FieldRef,
        _receiver: Option<Self::Value>,
    ) -> Result<Self::Value, AnalysisAbort> {
        Ok(self.plain(field.kind))
    }

    fn put_field(
        &mut self,
        _insn: usize,
        _field: &FieldRef,
        _receiver: Option<Self::Value>,
        _value: Self::Value,
    ) -> Result<(), AnalysisAbort> {
        Ok(())
    }

    /// Returns the pushed result, or `None` for void calls.
    fn invoke(
        &mut self,
        _insn: usize,
        call: &CallSite,
        _receiver: Option<Self::Value>,
        _args: Vec<Self::Value>,
    ) -> Result<Option<Self::Value>, AnalysisAbort> {
        Ok(call.returns.kind().map(|kind| self.plain(kind)))
    }

    fn invoke_dynamic(
        &mut self,
        _insn: usize,
        returns: ValueType,
        _args: Vec<Self::Value>,
    ) -> Result<Option<Self::Value>, AnalysisAbort> {
        Ok(returns.kind().map(|kind| self.plain(kind)))
    }

    fn array_load(&mut self, _insn: usize, _array: Self::Value, kind: Kind) -> Self::Value {
        self.plain(kind)
    }

    fn array_store(&mut self, _insn: usize, _array: Self::Value, _value: Self::Value) {}

    fn check_cast(&mut self, _insn: usize, value: Self::Value) -> Self::Value {
        value
    }

    fn instance_of(&mut self, _insn: usize, _value: Self::Value) -> Self::Value {
        self.plain(Kind::Int)
    }

    fn monitor(&mut self, _insn: usize, _value: Self::Value) {}
}

/// Returns whether per-instruction interpreter tracing is enabled.
pub fn interp_debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("BYTECONTRACT_DEBUG_INTERP")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

/// Applies one instruction to `frame`.
///
/// Branches, switches, returns and `athrow` only pop their operands: choosing
/// successors is the caller's job.
pub fn execute<D: Domain>(
    domain: &mut D,
    frame: &mut Frame<D::Value>,
    index: usize,
    insn: &Insn,
) -> Result<(), AnalysisAbort> {
    if interp_debug_enabled() {
        debug!(
            "interp: insn={} offset={} opcode=0x{:02x} stack={:?}",
            index, insn.offset, insn.opcode, frame.stack
        );
    }
    let opcode = insn.opcode;
    match opcode {
        opcodes::NOP | opcodes::GOTO | opcodes::GOTO_W | opcodes::RETURN => {}
        opcodes::ACONST_NULL..=opcodes::LDC2_W => {
            let Operand::Constant(constant) = &insn.operand else {
                return Err(operand_mismatch(index));
            };
            let value = domain.constant(index, constant);
            frame.push(value);
        }
        opcodes::ILOAD..=opcodes::ALOAD_3 => {
            let slot = local_operand(insn, index)?;
            let value = frame.local(slot)?.clone();
            frame.push(value);
        }
        opcodes::IALOAD..=opcodes::SALOAD => {
            frame.pop()?;
            let array = frame.pop()?;
            let kind = match opcode {
                opcodes::LALOAD => Kind::Long,
                opcodes::FALOAD => Kind::Float,
                opcodes::DALOAD => Kind::Double,
                opcodes::AALOAD => Kind::Reference,
                _ => Kind::Int,
            };
            let value = domain.array_load(index, array, kind);
            frame.push(value);
        }
        opcodes::ISTORE..=opcodes::ASTORE_3 => {
            let slot = local_operand(insn, index)?;
            let value = frame.pop()?;
            let wide = domain.is_wide(&value);
            if slot > 0 && frame.local(slot - 1).is_ok_and(|previous| domain.is_wide(previous)) {
                frame.set_local(slot - 1, domain.plain(Kind::Undefined))?;
            }
            frame.set_local(slot, value)?;
            if wide {
                frame.set_local(slot + 1, domain.plain(Kind::Undefined))?;
            }
        }
        opcodes::IASTORE..=opcodes::SASTORE => {
            let value = frame.pop()?;
            frame.pop()?;
            let array = frame.pop()?;
            domain.array_store(index, array, value);
        }
        opcodes::POP => {
            frame.pop()?;
        }
        opcodes::POP2 => {
            let top = frame.pop()?;
            if !domain.is_wide(&top) {
                frame.pop()?;
            }
        }
        opcodes::DUP..=opcodes::SWAP => stack_shuffle(domain, frame, opcode)?,
        opcodes::IADD..=opcodes::DREM => {
            frame.pop_n(2)?;
            frame.push(domain.plain(arithmetic_kind(opcode - opcodes::IADD)));
        }
        opcodes::INEG..=opcodes::DNEG => {
            frame.pop()?;
            frame.push(domain.plain(arithmetic_kind(opcode - opcodes::INEG)));
        }
        opcodes::ISHL..=opcodes::LXOR => {
            frame.pop_n(2)?;
            let kind = if (opcode - opcodes::ISHL) % 2 == 0 {
                Kind::Int
            } else {
                Kind::Long
            };
            frame.push(domain.plain(kind));
        }
        opcodes::IINC => {
            let Operand::Iinc { local, .. } = insn.operand else {
                return Err(operand_mismatch(index));
            };
            frame.set_local(local as usize, domain.plain(Kind::Int))?;
        }
        opcodes::I2L..=opcodes::I2S => {
            frame.pop()?;
            frame.push(domain.plain(conversion_kind(opcode)));
        }
        opcodes::LCMP..=opcodes::DCMPG => {
            frame.pop_n(2)?;
            frame.push(domain.plain(Kind::Int));
        }
        opcodes::IFEQ..=opcodes::IFLE
        | opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::TABLESWITCH
        | opcodes::LOOKUPSWITCH
        | opcodes::IRETURN..=opcodes::ARETURN
        | opcodes::ATHROW => {
            frame.pop()?;
        }
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => {
            frame.pop_n(2)?;
        }
        opcodes::GETSTATIC | opcodes::GETFIELD => {
            let Operand::Field(field) = &insn.operand else {
                return Err(operand_mismatch(index));
            };
            let receiver = if opcode == opcodes::GETFIELD {
                Some(frame.pop()?)
            } else {
                None
            };
            let value = domain.get_field(index, field, receiver)?;
            frame.push(value);
        }
        opcodes::PUTSTATIC | opcodes::PUTFIELD => {
            let Operand::Field(field) = &insn.operand else {
                return Err(operand_mismatch(index));
            };
            let value = frame.pop()?;
            let receiver = if opcode == opcodes::PUTFIELD {
                Some(frame.pop()?)
            } else {
                None
            };
            domain.put_field(index, field, receiver, value)?;
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let Operand::Invoke(call) = &insn.operand else {
                return Err(operand_mismatch(index));
            };
            let args = frame.pop_n(call.args.len())?;
            let receiver = if opcode == opcodes::INVOKESTATIC {
                None
            } else {
                Some(frame.pop()?)
            };
            if let Some(value) = domain.invoke(index, call, receiver, args)? {
                frame.push(value);
            }
        }
        opcodes::INVOKEDYNAMIC => {
            let Operand::InvokeDynamic { args, returns } = &insn.operand else {
                return Err(operand_mismatch(index));
            };
            let args = frame.pop_n(args.len())?;
            if let Some(value) = domain.invoke_dynamic(index, *returns, args)? {
                frame.push(value);
            }
        }
        opcodes::NEW => {
            let Operand::Type(class) = &insn.operand else {
                return Err(operand_mismatch(index));
            };
            let value = domain.new_object(index, class);
            frame.push(value);
        }
        opcodes::NEWARRAY | opcodes::ANEWARRAY => {
            frame.pop()?;
            let value = domain.new_array(index);
            frame.push(value);
        }
        opcodes::MULTIANEWARRAY => {
            let Operand::MultiArray { dimensions, .. } = insn.operand else {
                return Err(operand_mismatch(index));
            };
            frame.pop_n(dimensions as usize)?;
            let value = domain.new_array(index);
            frame.push(value);
        }
        opcodes::ARRAYLENGTH => {
            frame.pop()?;
            frame.push(domain.plain(Kind::Int));
        }
        opcodes::CHECKCAST => {
            let value = frame.pop()?;
            let value = domain.check_cast(index, value);
            frame.push(value);
        }
        opcodes::INSTANCEOF => {
            let value = frame.pop()?;
            let value = domain.instance_of(index, value);
            frame.push(value);
        }
        opcodes::MONITORENTER | opcodes::MONITOREXIT => {
            let value = frame.pop()?;
            domain.monitor(index, value);
        }
        _ => {
            return Err(AnalysisAbort::malformed(format!(
                "unsupported opcode 0x{opcode:02x} at instruction {index}"
            )));
        }
    }
    Ok(())
}

/// Value the instruction dereferences, read from the frame before execution.
pub fn dereferenced<'a, V>(insn: &Insn, stack: &'a [V]) -> Option<&'a V> {
    let depth = match insn.opcode {
        opcodes::GETFIELD
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => 0,
        opcodes::PUTFIELD | opcodes::IALOAD..=opcodes::SALOAD => 1,
        opcodes::IASTORE..=opcodes::SASTORE => 2,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKEINTERFACE => {
            let Operand::Invoke(call) = &insn.operand else {
                return None;
            };
            call.args.len()
        }
        _ => return None,
    };
    stack.len().checked_sub(depth + 1).map(|index| &stack[index])
}

/// Value the instruction stores into the heap (field, static or array element).
pub fn stored<'a, V>(insn: &Insn, stack: &'a [V]) -> Option<&'a V> {
    match insn.opcode {
        opcodes::PUTFIELD | opcodes::PUTSTATIC | opcodes::AASTORE => stack.last(),
        _ => None,
    }
}

fn stack_shuffle<D: Domain>(
    domain: &D,
    frame: &mut Frame<D::Value>,
    opcode: u8,
) -> Result<(), AnalysisAbort> {
    let top_wide = frame.peek(0).is_some_and(|value| domain.is_wide(value));
    let second_wide = frame.peek(1).is_some_and(|value| domain.is_wide(value));
    // Positions into the popped values (bottom first), pushed back in this order.
    // A wide value counts as both of its slots.
    let order: &[usize] = match opcode {
        opcodes::DUP => &[0, 0],
        opcodes::DUP_X1 => &[1, 0, 1],
        opcodes::DUP_X2 if second_wide => &[1, 0, 1],
        opcodes::DUP_X2 => &[2, 0, 1, 2],
        opcodes::DUP2 if top_wide => &[0, 0],
        opcodes::DUP2 => &[0, 1, 0, 1],
        opcodes::DUP2_X1 if top_wide => &[1, 0, 1],
        opcodes::DUP2_X1 => &[1, 2, 0, 1, 2],
        opcodes::DUP2_X2 => {
            let third_wide = frame.peek(2).is_some_and(|value| domain.is_wide(value));
            match (top_wide, second_wide, third_wide) {
                (true, true, _) => &[1, 0, 1],
                (true, false, _) => &[2, 0, 1, 2],
                (false, false, true) => &[1, 2, 0, 1, 2],
                _ => &[2, 3, 0, 1, 2, 3],
            }
        }
        _ => &[1, 0],
    };
    let taken = order.iter().max().map_or(0, |max| max + 1);
    let values = frame.pop_n(taken)?;
    for position in order {
        frame.push(values[*position].clone());
    }
    Ok(())
}

fn arithmetic_kind(relative: u8) -> Kind {
    match relative % 4 {
        0 => Kind::Int,
        1 => Kind::Long,
        2 => Kind::Float,
        _ => Kind::Double,
    }
}

fn conversion_kind(opcode: u8) -> Kind {
    match opcode {
        0x85 | 0x8c | 0x8f => Kind::Long,
        0x86 | 0x89 | 0x90 => Kind::Float,
        0x87 | 0x8a | 0x8d => Kind::Double,
        _ => Kind::Int,
    }
}

fn local_operand(insn: &Insn, index: usize) -> Result<usize, AnalysisAbort> {
    match insn.operand {
        Operand::Local(slot) => Ok(slot as usize),
        _ => Err(operand_mismatch(index)),
    }
}

fn operand_mismatch(index: usize) -> AnalysisAbort {
    AnalysisAbort::malformed(format!("unexpected operand at instruction {index}"))
}
