//! Hard-coded facts about well-known JDK members.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::analysis::effects::{DataValue, EffectQuantum};
use crate::analysis::key::{Direction, HMember, Member, MemberDescriptor};
use crate::analysis::lattice::Value;
use crate::analysis::result::Effects;

/// What is known about one member without analyzing it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KnownFacts {
    pub effects: Option<Effects>,
    pub contracts: Vec<(Direction, Value)>,
}

impl KnownFacts {
    fn pure(return_value: DataValue) -> Self {
        Self {
            effects: Some(Effects::pure(return_value)),
            contracts: Vec::new(),
        }
    }

    fn with_contract(mut self, direction: Direction, value: Value) -> Self {
        self.contracts.push((direction, value));
        self
    }

    pub fn contract(&self, direction: Direction) -> Option<Value> {
        self.contracts
            .iter()
            .find(|(known, _)| *known == direction)
            .map(|(_, value)| *value)
    }
}

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";

fn table() -> &'static BTreeMap<Member, KnownFacts> {
    static TABLE: OnceLock<BTreeMap<Member, KnownFacts>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let not_null_out = |facts: KnownFacts| facts.with_contract(Direction::Out, Value::NotNull);
        let unknown = || KnownFacts::pure(DataValue::Unknown1);
        let mut entries = vec![
            (Member::new(OBJECT, "<init>", "()V"), unknown()),
            (
                Member::new(OBJECT, "getClass", "()Ljava/lang/Class;"),
                not_null_out(unknown()),
            ),
            (Member::new(OBJECT, "hashCode", "()I"), unknown()),
            (Member::new(STRING, "length", "()I"), unknown()),
            (Member::new(STRING, "isEmpty", "()Z"), unknown()),
            (Member::new(STRING, "charAt", "(I)C"), unknown()),
            (Member::new(STRING, "equals", "(Ljava/lang/Object;)Z"), unknown()),
            (Member::new(STRING, "hashCode", "()I"), unknown()),
            (
                Member::new("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
                not_null_out(unknown()),
            ),
            (
                Member::new("java/lang/Enum", "name", "()Ljava/lang/String;"),
                not_null_out(unknown()),
            ),
            (Member::new("java/lang/Enum", "ordinal", "()I"), unknown()),
            (
                Member::new(
                    "java/util/Objects",
                    "equals",
                    "(Ljava/lang/Object;Ljava/lang/Object;)Z",
                ),
                unknown(),
            ),
            (
                Member::new(
                    "java/util/Objects",
                    "requireNonNull",
                    "(Ljava/lang/Object;)Ljava/lang/Object;",
                ),
                KnownFacts::pure(DataValue::Param(0))
                    .with_contract(
                        Direction::In {
                            param: 0,
                            nullable: false,
                        },
                        Value::NotNull,
                    )
                    .with_contract(Direction::Out, Value::NotNull)
                    .with_contract(
                        Direction::InThrow {
                            param: 0,
                            value: Value::Null,
                        },
                        Value::Fail,
                    ),
            ),
            (
                Member::new(
                    "java/lang/System",
                    "arraycopy",
                    "(Ljava/lang/Object;ILjava/lang/Object;II)V",
                ),
                KnownFacts {
                    effects: Some(Effects::new(
                        DataValue::Unknown1,
                        BTreeSet::from([EffectQuantum::ParamChange(2)]),
                    )),
                    contracts: Vec::new(),
                },
            ),
        ];
        for (name, descriptor) in [
            ("abs", "(I)I"),
            ("max", "(II)I"),
            ("min", "(II)I"),
            ("sqrt", "(D)D"),
        ] {
            entries.push((Member::new("java/lang/Math", name, descriptor), unknown()));
        }
        entries.into_iter().collect()
    })
}

fn hashed_index() -> &'static BTreeMap<HMember, Member> {
    static INDEX: OnceLock<BTreeMap<HMember, Member>> = OnceLock::new();
    INDEX.get_or_init(|| {
        table()
            .keys()
            .map(|member| (member.hashed(), member.clone()))
            .collect()
    })
}

/// Facts for a member given in plain or hashed form.
pub fn lookup(member: &MemberDescriptor) -> Option<&'static KnownFacts> {
    match member {
        MemberDescriptor::Plain(member) => table().get(member),
        MemberDescriptor::Hashed(hashed) => {
            hashed_index().get(hashed).and_then(|member| table().get(member))
        }
    }
}

/// Whether calling the member has no observable effect.
pub fn is_pure(member: &Member) -> bool {
    table()
        .get(member)
        .and_then(|facts| facts.effects.as_ref())
        .is_some_and(|effects| effects.effects.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_hashed_lookups_agree() {
        let member = Member::new(STRING, "length", "()I");
        let plain = lookup(&MemberDescriptor::Plain(member.clone()));
        let hashed = lookup(&MemberDescriptor::Hashed(member.hashed()));
        assert!(plain.is_some());
        assert_eq!(plain, hashed);
        assert!(is_pure(&member));
    }

    #[test]
    fn arraycopy_is_known_but_not_pure() {
        let member = Member::new(
            "java/lang/System",
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        );
        assert!(lookup(&member.clone().into()).is_some());
        assert!(!is_pure(&member));
    }

    #[test]
    fn require_non_null_contracts() {
        let member = Member::new(
            "java/util/Objects",
            "requireNonNull",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
        );
        let facts = lookup(&member.into()).expect("known member");
        assert_eq!(facts.contract(Direction::Out), Some(Value::NotNull));
        assert_eq!(facts.contract(Direction::Throw), None);
    }
}
