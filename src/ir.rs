/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub struct Class {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: ClassAccess,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    /// SHA-256 of the class file bytes.
    pub content_hash: [u8; 32],
    /// Whether the class came from `--input` rather than the classpath.
    pub is_target: bool,
}

/// Class-level access flags relevant to override resolution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClassAccess {
    pub is_final: bool,
    pub is_interface: bool,
}

/// Field declared by a class.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub access: FieldAccess,
}

/// Field access flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FieldAccess {
    pub is_static: bool,
    pub is_volatile: bool,
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub access: MethodAccess,
    pub max_locals: u16,
    /// Decoded instructions; branch targets are instruction indices.
    pub insns: Vec<Insn>,
    pub handlers: Vec<ExceptionHandler>,
}

impl Method {
    pub fn has_code(&self) -> bool {
        !self.insns.is_empty()
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// Method access flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MethodAccess {
    pub is_public: bool,
    pub is_private: bool,
    pub is_static: bool,
    pub is_final: bool,
    pub is_abstract: bool,
    pub is_native: bool,
}

/// Exception table entry with instruction-index bounds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExceptionHandler {
    pub start: usize,
    /// Exclusive end.
    pub end: usize,
    pub handler: usize,
    pub catch_type: Option<String>,
}

/// Decoded bytecode instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Insn {
    pub offset: u32,
    pub opcode: u8,
    pub operand: Operand,
}

impl Insn {
    pub fn new(offset: u32, opcode: u8, operand: Operand) -> Self {
        Self {
            offset,
            opcode,
            operand,
        }
    }
}

/// Instruction operand after constant-pool and branch-target resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    None,
    /// Local variable slot for loads, stores and `ret`.
    Local(u16),
    Iinc { local: u16, delta: i16 },
    Constant(Constant),
    Jump(usize),
    Switch { default: usize, targets: Vec<usize> },
    Field(FieldRef),
    Invoke(CallSite),
    InvokeDynamic { args: Vec<Kind>, returns: ValueType },
    /// Class operand of `new`, `anewarray`, `checkcast`, `instanceof`.
    Type(String),
    MultiArray { class: String, dimensions: u8 },
}

/// Constant pushed by `aconst_null`, `iconst_*`, `bipush`, `ldc` and friends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Constant {
    Null,
    Int(i32),
    Long,
    Float,
    Double,
    String(String),
    Class(String),
    /// Method handles, method types and dynamic constants.
    OtherReference,
}

impl Constant {
    pub fn kind(&self) -> Kind {
        match self {
            Constant::Int(_) => Kind::Int,
            Constant::Long => Kind::Long,
            Constant::Float => Kind::Float,
            Constant::Double => Kind::Double,
            Constant::Null
            | Constant::String(_)
            | Constant::Class(_)
            | Constant::OtherReference => Kind::Reference,
        }
    }
}

/// Resolved field reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: Kind,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallSite {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: CallKind,
    pub args: Vec<ValueType>,
    pub returns: ValueType,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl CallKind {
    /// Whether the call target is fixed at the call site.
    pub fn is_stable(self) -> bool {
        matches!(self, CallKind::Special | CallKind::Static)
    }
}

/// Verification type of a stack or local slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    ReturnAddress,
    /// Unset local slot, the upper half of a wide local, or a merge of incompatible kinds.
    Undefined,
}

impl Kind {
    /// Whether values of this kind occupy two slots.
    pub fn is_wide(self) -> bool {
        matches!(self, Kind::Long | Kind::Double)
    }
}

/// Type of a parameter or return value as seen by the analyses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ValueType {
    Void,
    Boolean,
    Reference,
    Primitive(Kind),
}

impl ValueType {
    pub fn kind(self) -> Option<Kind> {
        match self {
            ValueType::Void => None,
            ValueType::Boolean => Some(Kind::Int),
            ValueType::Reference => Some(Kind::Reference),
            ValueType::Primitive(kind) => Some(kind),
        }
    }

    pub fn is_reference(self) -> bool {
        self == ValueType::Reference
    }

    /// Whether values of this type are tracked as parameters or call results.
    pub fn is_trackable(self) -> bool {
        matches!(self, ValueType::Reference | ValueType::Boolean)
    }
}
