use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::ir::{Kind, ValueType};

/// Parameter and return types of a JVM method descriptor.
pub fn method_types(descriptor: &str) -> Result<(Vec<ValueType>, ValueType)> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("parse method descriptor {descriptor}"))?;
    let params = parsed.parameter_types().iter().map(value_type).collect();
    Ok((params, value_type(parsed.return_type())))
}

/// Kind of a JVM field descriptor.
pub fn field_kind(descriptor: &str) -> Result<Kind> {
    // A field descriptor is the return type of a nullary method descriptor.
    let parsed = MethodDescriptor::from_str(&format!("(){descriptor}"))
        .with_context(|| format!("parse field descriptor {descriptor}"))?;
    Ok(value_type(parsed.return_type())
        .kind()
        .unwrap_or(Kind::Undefined))
}

fn value_type(ty: &TypeDescriptor) -> ValueType {
    match ty {
        TypeDescriptor::Void => ValueType::Void,
        TypeDescriptor::Boolean => ValueType::Boolean,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => ValueType::Reference,
        TypeDescriptor::Long => ValueType::Primitive(Kind::Long),
        TypeDescriptor::Float => ValueType::Primitive(Kind::Float),
        TypeDescriptor::Double => ValueType::Primitive(Kind::Double),
        _ => ValueType::Primitive(Kind::Int),
    }
}
