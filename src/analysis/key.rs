use std::fmt;

use sha2::{Digest, Sha256};

use crate::analysis::lattice::Value;

/// Bytes of the owner-name digest kept in a hashed member.
const CLASS_HASH_SIZE: usize = 10;
/// Bytes of the name-and-descriptor digest kept in a hashed member.
const SIGNATURE_HASH_SIZE: usize = 10;
pub const HASH_SIZE: usize = CLASS_HASH_SIZE + SIGNATURE_HASH_SIZE;

/// Human-readable method or field reference in JVM internal form.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Member {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl Member {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn hashed(&self) -> HMember {
        let class_digest = Sha256::digest(self.owner.as_bytes());
        let mut signature = Sha256::new();
        signature.update(self.name.as_bytes());
        signature.update(self.descriptor.as_bytes());
        let signature_digest = signature.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes[..CLASS_HASH_SIZE].copy_from_slice(&class_digest[..CLASS_HASH_SIZE]);
        bytes[CLASS_HASH_SIZE..].copy_from_slice(&signature_digest[..SIGNATURE_HASH_SIZE]);
        HMember(bytes)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Compressed member reference: owner digest prefix followed by signature digest prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HMember(pub [u8; HASH_SIZE]);

impl HMember {
    pub fn class_hash(&self) -> &[u8] {
        &self.0[..CLASS_HASH_SIZE]
    }

    pub fn bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Display for HMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Either form of a member reference. The two forms never compare equal.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MemberDescriptor {
    Plain(Member),
    Hashed(HMember),
}

impl MemberDescriptor {
    pub fn hashed(&self) -> MemberDescriptor {
        match self {
            MemberDescriptor::Plain(member) => MemberDescriptor::Hashed(member.hashed()),
            MemberDescriptor::Hashed(member) => MemberDescriptor::Hashed(*member),
        }
    }

    pub fn as_hashed(&self) -> HMember {
        match self {
            MemberDescriptor::Plain(member) => member.hashed(),
            MemberDescriptor::Hashed(member) => *member,
        }
    }

    pub fn as_plain(&self) -> Option<&Member> {
        match self {
            MemberDescriptor::Plain(member) => Some(member),
            MemberDescriptor::Hashed(_) => None,
        }
    }
}

impl From<Member> for MemberDescriptor {
    fn from(member: Member) -> Self {
        MemberDescriptor::Plain(member)
    }
}

impl From<HMember> for MemberDescriptor {
    fn from(member: HMember) -> Self {
        MemberDescriptor::Hashed(member)
    }
}

impl fmt::Display for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberDescriptor::Plain(member) => member.fmt(f),
            MemberDescriptor::Hashed(member) => member.fmt(f),
        }
    }
}

/// Facet of a member's behavior that a key denotes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Direction {
    Out,
    NullableOut,
    Pure,
    Throw,
    Volatile,
    In { param: usize, nullable: bool },
    InOut { param: usize, value: Value },
    InThrow { param: usize, value: Value },
}

const PARAM_BASE: i32 = 8;
const PARAM_STRIDE: i32 = 32;
const IN_NOT_NULL: i32 = 0;
const IN_NULLABLE: i32 = 8;
const IN_OUT: i32 = 16;
const IN_THROW: i32 = 24;

impl Direction {
    pub fn to_int(self) -> i32 {
        match self {
            Direction::Out => 0,
            Direction::NullableOut => 1,
            Direction::Pure => 2,
            Direction::Throw => 3,
            Direction::Volatile => 4,
            Direction::In { param, nullable } => {
                let kind = if nullable { IN_NULLABLE } else { IN_NOT_NULL };
                PARAM_BASE + PARAM_STRIDE * param as i32 + kind
            }
            Direction::InOut { param, value } => {
                PARAM_BASE + PARAM_STRIDE * param as i32 + IN_OUT + value.ordinal() as i32
            }
            Direction::InThrow { param, value } => {
                PARAM_BASE + PARAM_STRIDE * param as i32 + IN_THROW + value.ordinal() as i32
            }
        }
    }

    pub fn from_int(encoded: i32) -> Option<Direction> {
        match encoded {
            0 => return Some(Direction::Out),
            1 => return Some(Direction::NullableOut),
            2 => return Some(Direction::Pure),
            3 => return Some(Direction::Throw),
            4 => return Some(Direction::Volatile),
            _ => {}
        }
        if encoded < PARAM_BASE {
            return None;
        }
        let relative = encoded - PARAM_BASE;
        let param = (relative / PARAM_STRIDE) as usize;
        let kind = relative % PARAM_STRIDE;
        match kind {
            IN_NOT_NULL => Some(Direction::In {
                param,
                nullable: false,
            }),
            IN_NULLABLE => Some(Direction::In {
                param,
                nullable: true,
            }),
            _ if (IN_OUT..IN_OUT + 8).contains(&kind) => Some(Direction::InOut {
                param,
                value: Value::from_ordinal((kind - IN_OUT) as u8)?,
            }),
            _ if (IN_THROW..IN_THROW + 8).contains(&kind) => Some(Direction::InThrow {
                param,
                value: Value::from_ordinal((kind - IN_THROW) as u8)?,
            }),
            _ => None,
        }
    }

    /// Parameter the direction is conditioned on, if any.
    pub fn param(self) -> Option<usize> {
        match self {
            Direction::In { param, .. }
            | Direction::InOut { param, .. }
            | Direction::InThrow { param, .. } => Some(param),
            _ => None,
        }
    }

    /// Value assumed for the conditioning parameter.
    pub fn hypothesis(self) -> Option<Value> {
        match self {
            Direction::InOut { value, .. } | Direction::InThrow { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::NullableOut => write!(f, "nullable-out"),
            Direction::Pure => write!(f, "pure"),
            Direction::Throw => write!(f, "throw"),
            Direction::Volatile => write!(f, "volatile"),
            Direction::In {
                param,
                nullable: false,
            } => write!(f, "in({param})"),
            Direction::In {
                param,
                nullable: true,
            } => write!(f, "nullable-in({param})"),
            Direction::InOut { param, value } => write!(f, "in-out({param},{value:?})"),
            Direction::InThrow { param, value } => write!(f, "in-throw({param},{value:?})"),
        }
    }
}

/// Address of one inferable fact.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EKey {
    pub member: MemberDescriptor,
    pub direction: Direction,
    pub stable: bool,
    pub negated: bool,
}

impl EKey {
    pub fn new(member: impl Into<MemberDescriptor>, direction: Direction, stable: bool) -> Self {
        Self {
            member: member.into(),
            direction,
            stable,
            negated: false,
        }
    }

    pub fn with_direction(&self, direction: Direction) -> Self {
        Self {
            direction,
            ..self.clone()
        }
    }

    pub fn mk_stable(&self) -> Self {
        Self {
            stable: true,
            ..self.clone()
        }
    }

    pub fn mk_unstable(&self) -> Self {
        Self {
            stable: false,
            ..self.clone()
        }
    }

    pub fn invert_stability(&self) -> Self {
        Self {
            stable: !self.stable,
            ..self.clone()
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            negated: !self.negated,
            ..self.clone()
        }
    }

    pub fn hashed(&self) -> Self {
        Self {
            member: self.member.hashed(),
            ..self.clone()
        }
    }
}

impl fmt::Display for EKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!")?;
        }
        write!(f, "{}@{}", self.member, self.direction)?;
        if !self.stable {
            write!(f, "~")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> Member {
        Member::new("com/example/Foo", "bar", "(Ljava/lang/Object;)V")
    }

    #[test]
    fn directions_round_trip_through_int() {
        let mut directions = vec![
            Direction::Out,
            Direction::NullableOut,
            Direction::Pure,
            Direction::Throw,
            Direction::Volatile,
        ];
        for param in 0..4 {
            directions.push(Direction::In {
                param,
                nullable: false,
            });
            directions.push(Direction::In {
                param,
                nullable: true,
            });
            for value in [Value::Null, Value::NotNull, Value::True, Value::False] {
                directions.push(Direction::InOut { param, value });
                directions.push(Direction::InThrow { param, value });
            }
        }
        for direction in directions {
            assert_eq!(Direction::from_int(direction.to_int()), Some(direction));
        }
    }

    #[test]
    fn unknown_direction_ints_are_rejected() {
        assert_eq!(Direction::from_int(5), None);
        assert_eq!(Direction::from_int(-1), None);
        assert_eq!(Direction::from_int(8 + 4), None);
    }

    #[test]
    fn hashing_is_stable_and_distinguishes_members() {
        let first = member().hashed();
        let second = member().hashed();
        let other = Member::new("com/example/Foo", "baz", "(Ljava/lang/Object;)V").hashed();
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.class_hash(), other.class_hash());
    }

    #[test]
    fn hashing_is_idempotent_and_never_equal_to_plain() {
        let plain = MemberDescriptor::Plain(member());
        let hashed = plain.hashed();
        assert_eq!(hashed.hashed(), hashed);
        assert_ne!(plain, hashed);
    }

    #[test]
    fn key_transformations_produce_new_keys() {
        let key = EKey::new(member(), Direction::Out, true);
        let unstable = key.invert_stability();
        assert!(!unstable.stable);
        assert_eq!(unstable.invert_stability(), key);
        assert!(key.negate().negated);
        assert_eq!(key.negate().negate(), key);
        assert_eq!(key.with_direction(Direction::Throw).direction, Direction::Throw);
        assert!(!key.negated);
        assert!(matches!(key.hashed().member, MemberDescriptor::Hashed(_)));
    }
}
