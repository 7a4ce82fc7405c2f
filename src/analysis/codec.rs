//! Compact binary form of hashed equations, used by the equation cache.
//!
//! Integers are zig-zag LEB128 varints, counts are unsigned LEB128 varints and keys are
//! the 20 raw member-hash bytes followed by the direction and a stability byte.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow, bail};

use crate::analysis::effects::{DataValue, EffectQuantum};
use crate::analysis::key::{Direction, EKey, HASH_SIZE, HMember, MemberDescriptor};
use crate::analysis::lattice::Value;
use crate::analysis::result::{
    Component, DirectionResultPair, EResult, Effects, Equations, Pending,
};

const EFFECT_TOP: i64 = -1;
const EFFECT_THIS: i64 = -2;
const EFFECT_CALL: i64 = -3;
const EFFECT_RETURN_CHANGE: i64 = -4;
const EFFECT_FIELD_READ: i64 = -5;

const DATA_THIS: i64 = -1;
const DATA_LOCAL: i64 = -2;
const DATA_OWNED: i64 = -3;
const DATA_UNKNOWN1: i64 = -4;
const DATA_UNKNOWN2: i64 = -5;
const DATA_RETURN: i64 = -6;

/// Encodes the equations of one member. Every key must be hashed.
pub fn encode_equations(equations: &Equations) -> Result<Vec<u8>> {
    let mut writer = Writer::default();
    writer.write_equations(equations)?;
    Ok(writer.buf)
}

pub fn decode_equations(bytes: &[u8]) -> Result<Equations> {
    let mut reader = Reader::new(bytes);
    let equations = reader.read_equations()?;
    reader.finish()?;
    Ok(equations)
}

/// Encodes the equations of all members of one class.
pub fn encode_class(members: &[(HMember, Equations)]) -> Result<Vec<u8>> {
    let mut writer = Writer::default();
    writer.uvarint(members.len() as u64);
    for (member, equations) in members {
        writer.buf.extend_from_slice(member.bytes());
        writer
            .write_equations(equations)
            .with_context(|| format!("failed to encode equations of {member}"))?;
    }
    Ok(writer.buf)
}

pub fn decode_class(bytes: &[u8]) -> Result<Vec<(HMember, Equations)>> {
    let mut reader = Reader::new(bytes);
    let count = reader.count()?;
    let mut members = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let member = reader.member()?;
        let equations = reader
            .read_equations()
            .with_context(|| format!("failed to decode equations of {member}"))?;
        members.push((member, equations));
    }
    reader.finish()?;
    Ok(members)
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn uvarint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn svarint(&mut self, value: i64) {
        self.uvarint(((value << 1) ^ (value >> 63)) as u64);
    }

    fn flag(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn write_equations(&mut self, equations: &Equations) -> Result<()> {
        self.flag(equations.stable);
        self.uvarint(equations.results.len() as u64);
        for pair in &equations.results {
            self.svarint(i64::from(pair.direction.to_int()));
            match (&pair.result, pair.direction) {
                (EResult::Effects(effects), Direction::Pure) => self.effects(effects)?,
                (EResult::Final(value), direction) if direction != Direction::Pure => {
                    self.flag(true);
                    self.buf.push(value.ordinal());
                }
                (EResult::Pending(pending), direction) if direction != Direction::Pure => {
                    self.flag(false);
                    self.uvarint(pending.components.len() as u64);
                    for component in &pending.components {
                        self.buf.push(component.value.ordinal());
                        self.uvarint(component.ids.len() as u64);
                        for id in &component.ids {
                            self.key(id)?;
                        }
                    }
                }
                (_, direction) => bail!("result kind does not match direction {direction}"),
            }
        }
        Ok(())
    }

    fn key(&mut self, key: &EKey) -> Result<()> {
        let MemberDescriptor::Hashed(member) = &key.member else {
            bail!("cannot encode unhashed member {}", key.member);
        };
        self.buf.extend_from_slice(member.bytes());
        let direction = i64::from(key.direction.to_int());
        self.svarint(if key.negated { !direction } else { direction });
        self.flag(key.stable);
        Ok(())
    }

    fn effects(&mut self, effects: &Effects) -> Result<()> {
        self.uvarint(effects.effects.len() as u64);
        for effect in &effects.effects {
            match effect {
                EffectQuantum::Top => self.svarint(EFFECT_TOP),
                EffectQuantum::ThisChange => self.svarint(EFFECT_THIS),
                EffectQuantum::ParamChange(param) => self.svarint(*param as i64),
                EffectQuantum::Call {
                    key,
                    data,
                    is_static,
                } => {
                    self.svarint(EFFECT_CALL);
                    self.key(key)?;
                    self.flag(*is_static);
                    self.uvarint(data.len() as u64);
                    for value in data {
                        self.data_value(value)?;
                    }
                }
                EffectQuantum::ReturnChange(key) => {
                    self.svarint(EFFECT_RETURN_CHANGE);
                    self.key(key)?;
                }
                EffectQuantum::FieldRead(key) => {
                    self.svarint(EFFECT_FIELD_READ);
                    self.key(key)?;
                }
            }
        }
        self.data_value(&effects.return_value)
    }

    fn data_value(&mut self, value: &DataValue) -> Result<()> {
        match value {
            DataValue::This => self.svarint(DATA_THIS),
            DataValue::Local => self.svarint(DATA_LOCAL),
            DataValue::Owned => self.svarint(DATA_OWNED),
            DataValue::Unknown1 => self.svarint(DATA_UNKNOWN1),
            DataValue::Unknown2 => self.svarint(DATA_UNKNOWN2),
            DataValue::Param(param) => self.svarint(*param as i64),
            DataValue::Return(key) => {
                self.svarint(DATA_RETURN);
                self.key(key)?;
            }
        }
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            bail!("{} trailing bytes", self.bytes.len() - self.pos);
        }
        Ok(())
    }

    fn byte(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| anyhow!("unexpected end of input at {}", self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn flag(&mut self) -> Result<bool> {
        match self.byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => bail!("invalid flag byte {other}"),
        }
    }

    fn uvarint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.byte()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        bail!("varint longer than 64 bits")
    }

    fn svarint(&mut self) -> Result<i64> {
        let raw = self.uvarint()?;
        Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
    }

    fn count(&mut self) -> Result<usize> {
        let count = self.uvarint()?;
        let remaining = (self.bytes.len() - self.pos) as u64;
        if count > remaining {
            bail!("count {count} exceeds remaining {remaining} bytes");
        }
        Ok(count as usize)
    }

    fn index(&mut self) -> Result<usize> {
        usize::try_from(self.svarint()?).context("negative index")
    }

    fn value(&mut self) -> Result<Value> {
        let ordinal = self.byte()?;
        Value::from_ordinal(ordinal).ok_or_else(|| anyhow!("invalid value ordinal {ordinal}"))
    }

    fn member(&mut self) -> Result<HMember> {
        let end = self.pos + HASH_SIZE;
        let bytes = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| anyhow!("truncated member hash at {}", self.pos))?;
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(bytes);
        self.pos = end;
        Ok(HMember(hash))
    }

    fn direction(raw: i64) -> Result<Direction> {
        i32::try_from(raw)
            .ok()
            .and_then(Direction::from_int)
            .ok_or_else(|| anyhow!("invalid direction {raw}"))
    }

    fn key(&mut self) -> Result<EKey> {
        let member = self.member()?;
        let raw = self.svarint()?;
        // Negated keys store the bitwise complement of their direction.
        let (negated, direction) = if raw < 0 { (true, !raw) } else { (false, raw) };
        let stable = self.flag()?;
        let mut key = EKey::new(member, Self::direction(direction)?, stable);
        key.negated = negated;
        Ok(key)
    }

    fn read_equations(&mut self) -> Result<Equations> {
        let mut equations = Equations::new(self.flag()?);
        let count = self.count()?;
        for _ in 0..count {
            let direction = Self::direction(self.svarint()?)?;
            let result = if direction == Direction::Pure {
                EResult::Effects(self.effects()?)
            } else if self.flag()? {
                EResult::Final(self.value()?)
            } else {
                let components = self.count()?;
                let mut pending = Vec::with_capacity(components);
                for _ in 0..components {
                    let value = self.value()?;
                    let ids = self.count()?;
                    let mut keys = BTreeSet::new();
                    for _ in 0..ids {
                        keys.insert(self.key()?);
                    }
                    pending.push(Component { value, ids: keys });
                }
                EResult::Pending(Pending::new(pending))
            };
            equations.results.push(DirectionResultPair { direction, result });
        }
        Ok(equations)
    }

    fn effects(&mut self) -> Result<Effects> {
        let count = self.count()?;
        let mut effects = BTreeSet::new();
        for _ in 0..count {
            let effect = match self.svarint()? {
                EFFECT_TOP => EffectQuantum::Top,
                EFFECT_THIS => EffectQuantum::ThisChange,
                EFFECT_CALL => {
                    let key = self.key()?;
                    let is_static = self.flag()?;
                    let len = self.count()?;
                    let mut data = Vec::with_capacity(len);
                    for _ in 0..len {
                        data.push(self.data_value()?);
                    }
                    EffectQuantum::Call {
                        key,
                        data,
                        is_static,
                    }
                }
                EFFECT_RETURN_CHANGE => EffectQuantum::ReturnChange(self.key()?),
                EFFECT_FIELD_READ => EffectQuantum::FieldRead(self.key()?),
                param if param >= 0 => EffectQuantum::ParamChange(param as usize),
                other => bail!("invalid effect tag {other}"),
            };
            effects.insert(effect);
        }
        let return_value = self.data_value()?;
        Ok(Effects::new(return_value, effects))
    }

    fn data_value(&mut self) -> Result<DataValue> {
        Ok(match self.svarint()? {
            DATA_THIS => DataValue::This,
            DATA_LOCAL => DataValue::Local,
            DATA_OWNED => DataValue::Owned,
            DATA_UNKNOWN1 => DataValue::Unknown1,
            DATA_UNKNOWN2 => DataValue::Unknown2,
            DATA_RETURN => DataValue::Return(self.key()?),
            param if param >= 0 => DataValue::Param(param as usize),
            other => bail!("invalid data value tag {other}"),
        })
    }
}
