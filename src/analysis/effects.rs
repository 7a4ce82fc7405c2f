use crate::analysis::key::EKey;

/// Observable side effect produced by one instruction.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EffectQuantum {
    Top,
    ThisChange,
    ParamChange(usize),
    /// Mutation of the object returned by another method.
    ReturnChange(EKey),
    /// Call whose effects depend on the callee; `data` starts with the receiver for
    /// instance calls.
    Call {
        key: EKey,
        data: Vec<DataValue>,
        is_static: bool,
    },
    /// Field read that is an effect only when the field is volatile.
    FieldRead(EKey),
}

impl EffectQuantum {
    pub fn dependency(&self) -> Option<&EKey> {
        match self {
            EffectQuantum::ReturnChange(key)
            | EffectQuantum::Call { key, .. }
            | EffectQuantum::FieldRead(key) => Some(key),
            _ => None,
        }
    }

    pub fn hashed(&self) -> EffectQuantum {
        match self {
            EffectQuantum::ReturnChange(key) => EffectQuantum::ReturnChange(key.hashed()),
            EffectQuantum::Call {
                key,
                data,
                is_static,
            } => EffectQuantum::Call {
                key: key.hashed(),
                data: data.iter().map(DataValue::hashed).collect(),
                is_static: *is_static,
            },
            EffectQuantum::FieldRead(key) => EffectQuantum::FieldRead(key.hashed()),
            other => other.clone(),
        }
    }
}

/// Abstraction of where a reference value comes from, used by purity inference.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DataValue {
    This,
    /// Object created inside the method.
    Local,
    /// Object reachable from a field of `this`.
    Owned,
    Param(usize),
    Return(EKey),
    Unknown1,
    Unknown2,
}

impl DataValue {
    pub fn join(&self, other: &DataValue) -> DataValue {
        if self == other {
            return self.clone();
        }
        if matches!(self, DataValue::Unknown2) || matches!(other, DataValue::Unknown2) {
            return DataValue::Unknown2;
        }
        DataValue::Unknown1
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, DataValue::Unknown1 | DataValue::Unknown2)
    }

    pub fn hashed(&self) -> DataValue {
        match self {
            DataValue::Return(key) => DataValue::Return(key.hashed()),
            other => other.clone(),
        }
    }

    /// Effect of mutating the object this value denotes.
    pub fn change_effect(&self) -> Option<EffectQuantum> {
        match self {
            DataValue::This | DataValue::Owned => Some(EffectQuantum::ThisChange),
            DataValue::Local => None,
            DataValue::Param(index) => Some(EffectQuantum::ParamChange(*index)),
            DataValue::Return(key) => Some(EffectQuantum::ReturnChange(key.clone())),
            DataValue::Unknown1 | DataValue::Unknown2 => Some(EffectQuantum::Top),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_of_different_values_is_unknown() {
        assert_eq!(DataValue::This.join(&DataValue::This), DataValue::This);
        assert_eq!(DataValue::This.join(&DataValue::Local), DataValue::Unknown1);
        assert_eq!(
            DataValue::Unknown2.join(&DataValue::Param(0)),
            DataValue::Unknown2
        );
    }

    #[test]
    fn mutating_local_objects_is_not_an_effect() {
        assert_eq!(DataValue::Local.change_effect(), None);
        assert_eq!(
            DataValue::Owned.change_effect(),
            Some(EffectQuantum::ThisChange)
        );
        assert_eq!(
            DataValue::Param(1).change_effect(),
            Some(EffectQuantum::ParamChange(1))
        );
        assert_eq!(
            DataValue::Unknown1.change_effect(),
            Some(EffectQuantum::Top)
        );
    }
}
