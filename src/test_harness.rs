//! Minimal class file writer for front-end and CLI tests.

/// Access flag for public members and classes.
pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_FINAL: u16 = 0x0010;
pub(crate) const ACC_VOLATILE: u16 = 0x0040;

/// Builds a class file with a hand-assembled constant pool.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<MemberSpec>,
    methods: Vec<MemberSpec>,
    code_index: u16,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access: ACC_PUBLIC | 0x0020,
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            code_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn final_class(mut self) -> Self {
        self.access |= ACC_FINAL;
        self
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.push(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index))
    }

    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let utf8 = self.add_utf8(value);
        self.push(CpEntry::String(utf8))
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::MethodRef(class_index, name_and_type))
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::FieldRef(class_index, name_and_type))
    }

    pub(crate) fn add_field(&mut self, name: &str, descriptor: &str, access: u16) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(MemberSpec {
            access,
            name_index,
            descriptor_index,
            code: None,
        });
    }

    pub(crate) fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        access: u16,
        code: Vec<u8>,
        max_locals: u16,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MemberSpec {
            access,
            name_index,
            descriptor_index,
            code: Some(CodeSpec {
                code,
                max_stack: 8,
                max_locals,
            }),
        });
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            field.write(&mut bytes, self.code_index);
        }
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            method.write(&mut bytes, self.code_index);
        }
        write_u16(&mut bytes, 0);
        bytes
    }

    fn push(&mut self, entry: CpEntry) -> u16 {
        self.cp.push(entry);
        self.cp.len() as u16
    }
}

struct MemberSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<CodeSpec>,
}

struct CodeSpec {
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
}

impl MemberSpec {
    fn write(&self, bytes: &mut Vec<u8>, code_index: u16) {
        write_u16(bytes, self.access);
        write_u16(bytes, self.name_index);
        write_u16(bytes, self.descriptor_index);
        let Some(code) = &self.code else {
            write_u16(bytes, 0);
            return;
        };
        write_u16(bytes, 1);
        write_u16(bytes, code_index);
        write_u32(bytes, 12 + code.code.len() as u32);
        write_u16(bytes, code.max_stack);
        write_u16(bytes, code.max_locals);
        write_u32(bytes, code.code.len() as u32);
        bytes.extend_from_slice(&code.code);
        write_u16(bytes, 0);
        write_u16(bytes, 0);
    }
}

enum CpEntry {
    Utf8(String),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
    FieldRef(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::String(utf8_index) => {
                bytes.push(8);
                write_u16(bytes, *utf8_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}

/// `Sample` with a constructor, `static Object id(Object)` and a throwing `fail()`.
pub(crate) fn sample_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("Sample", "java/lang/Object");
    let object_init = builder.add_method_ref("java/lang/Object", "<init>", "()V");
    let exception = builder.add_class("java/lang/RuntimeException");
    let exception_init = builder.add_method_ref("java/lang/RuntimeException", "<init>", "()V");
    builder.add_method(
        "<init>",
        "()V",
        ACC_PUBLIC,
        vec![0x2a, 0xb7, high(object_init), low(object_init), 0xb1],
        1,
    );
    // aload_0; areturn
    builder.add_method(
        "id",
        "(Ljava/lang/Object;)Ljava/lang/Object;",
        ACC_PUBLIC | ACC_STATIC,
        vec![0x2a, 0xb0],
        1,
    );
    // new RuntimeException; dup; invokespecial <init>; athrow
    builder.add_method(
        "fail",
        "()V",
        ACC_PUBLIC | ACC_STATIC,
        vec![
            0xbb,
            high(exception),
            low(exception),
            0x59,
            0xb7,
            high(exception_init),
            low(exception_init),
            0xbf,
        ],
        0,
    );
    builder.finish()
}
