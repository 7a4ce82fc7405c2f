use serde::Serialize;

use crate::analysis::key::Direction;

/// Flat lattice of facts inferred for a method.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum Value {
    Bot,
    NotNull,
    Null,
    True,
    False,
    Fail,
    Top,
}

impl Value {
    pub const ALL: [Value; 7] = [
        Value::Bot,
        Value::NotNull,
        Value::Null,
        Value::True,
        Value::False,
        Value::Fail,
        Value::Top,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Value> {
        Value::ALL.get(ordinal as usize).copied()
    }

    pub fn join(self, other: Value) -> Value {
        if self == other || other == Value::Bot {
            return self;
        }
        if self == Value::Bot {
            return other;
        }
        Value::Top
    }

    pub fn meet(self, other: Value) -> Value {
        if self == other || other == Value::Top {
            return self;
        }
        if self == Value::Top {
            return other;
        }
        Value::Bot
    }

    /// Boolean complement; other values are their own negation.
    pub fn negate(self) -> Value {
        match self {
            Value::True => Value::False,
            Value::False => Value::True,
            other => other,
        }
    }
}

/// Restriction of the flat lattice to a two-ended family used by one solver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ELattice {
    pub bot: Value,
    pub top: Value,
}

impl ELattice {
    pub const fn new(bot: Value, top: Value) -> Self {
        Self { bot, top }
    }

    /// Lattice family in which facts for `direction` live.
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::In {
                nullable: false, ..
            } => Self::new(Value::NotNull, Value::Top),
            Direction::In { nullable: true, .. } => Self::new(Value::Null, Value::Top),
            Direction::NullableOut => Self::new(Value::Bot, Value::Null),
            _ => Self::new(Value::Bot, Value::Top),
        }
    }

    /// Value reported when a key of this family cannot be resolved.
    pub fn unknown(&self) -> Value {
        if self.top == Value::Null {
            self.bot
        } else {
            self.top
        }
    }

    pub fn join(&self, x: Value, y: Value) -> Value {
        if x == y || y == self.bot {
            return x;
        }
        if x == self.bot {
            return y;
        }
        self.top
    }

    pub fn meet(&self, x: Value, y: Value) -> Value {
        if x == y || y == self.top {
            return x;
        }
        if x == self.top {
            return y;
        }
        self.bot
    }
}
