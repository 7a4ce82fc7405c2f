//! Discovery of class files in directories and JARs, and decoding into the instruction IR.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::{Attribute, ExceptionRecord};
use jclassfile::class_file::{self, ClassFlags};
use jclassfile::constant_pool::ConstantPool;
use jclassfile::fields::FieldFlags;
use jclassfile::methods::MethodFlags;
use opentelemetry::KeyValue;
use sha2::{Digest, Sha256};
use tracing::warn;
use zip::ZipArchive;

use crate::descriptor::{field_kind, method_types};
use crate::ir::{
    CallKind, CallSite, Class, ClassAccess, Constant, ExceptionHandler, Field, FieldAccess,
    FieldRef, Insn, Method, MethodAccess, Operand,
};
use crate::opcodes;
use crate::telemetry::{Telemetry, with_span};

/// Classes found under the input and the classpath.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub classes: Vec<Class>,
    pub class_count: usize,
    /// Classpath class files that failed to parse.
    pub skipped: usize,
}

/// Scans `input` (analysis targets) and `classpath` (dependencies, plus `Class-Path`
/// manifest entries of JARs) in a deterministic order.
pub fn scan_inputs(
    input: &Path,
    classpath: &[PathBuf],
    telemetry: Option<&Telemetry>,
) -> Result<ScanOutput> {
    let mut scanner = Scanner {
        telemetry,
        output: ScanOutput::default(),
    };
    scanner.scan_path(input, true, true)?;

    let mut classpath_entries = classpath.to_vec();
    if is_jar_path(input) {
        classpath_entries.extend(manifest_classpath(input)?);
    }
    for entry in expand_classpath(classpath_entries)? {
        if entry == input {
            continue;
        }
        scanner.scan_path(&entry, false, true)?;
    }
    Ok(scanner.output)
}

struct Scanner<'a> {
    telemetry: Option<&'a Telemetry>,
    output: ScanOutput,
}

impl Scanner<'_> {
    fn scan_path(&mut self, path: &Path, is_target: bool, strict: bool) -> Result<()> {
        if path.is_dir() {
            return self.scan_dir(path, is_target);
        }
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension {
            "class" => self.scan_class_file(path, is_target),
            "jar" => self.scan_jar_file(path, is_target),
            _ if strict => anyhow::bail!("unsupported input file: {}", path.display()),
            _ => Ok(()),
        }
    }

    fn scan_dir(&mut self, path: &Path, is_target: bool) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
            entries.push(entry.path());
        }
        entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
        for entry in entries {
            self.scan_path(&entry, is_target, false)?;
        }
        Ok(())
    }

    fn scan_class_file(&mut self, path: &Path, is_target: bool) -> Result<()> {
        let attributes = [KeyValue::new(
            "bytecontract.class_path",
            path.display().to_string(),
        )];
        let parsed = with_span(self.telemetry, "class.scan", &attributes, || {
            let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            parse_class(&data, is_target).with_context(|| format!("failed to parse {}", path.display()))
        });
        self.accept(parsed, is_target)
    }

    fn scan_jar_file(&mut self, path: &Path, is_target: bool) -> Result<()> {
        let attributes = [KeyValue::new("bytecontract.jar_path", path.display().to_string())];
        let mut archive = with_span(self.telemetry, "jar.scan", &attributes, || {
            let file =
                fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))
        })?;

        let mut entry_names = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = entry.name().to_string();
            if !entry.is_dir()
                && name.ends_with(".class")
                && !name.ends_with("module-info.class")
                && !name.starts_with("META-INF/versions/")
            {
                entry_names.push(name);
            }
        }
        entry_names.sort();

        for name in entry_names {
            let mut data = Vec::new();
            archive
                .by_name(&name)
                .and_then(|mut entry| Ok(entry.read_to_end(&mut data)?))
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let attributes = [
                KeyValue::new("bytecontract.jar_path", path.display().to_string()),
                KeyValue::new("bytecontract.jar_entry", name.clone()),
            ];
            let parsed = with_span(self.telemetry, "class.scan", &attributes, || {
                parse_class(&data, is_target)
                    .with_context(|| format!("failed to parse {}:{}", path.display(), name))
            });
            self.accept(parsed, is_target)?;
        }
        Ok(())
    }

    /// Input classes must parse; classpath classes that do not are skipped.
    fn accept(&mut self, parsed: Result<Class>, is_target: bool) -> Result<()> {
        match parsed {
            Ok(class) => {
                self.output.class_count += 1;
                self.output.classes.push(class);
                Ok(())
            }
            Err(err) if !is_target => {
                warn!("skipping classpath class: {err:#}");
                self.output.skipped += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut initial_sorted = initial;
    initial_sorted.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
    let mut queue: VecDeque<PathBuf> = initial_sorted.into_iter().collect();

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        if !seen.insert(path_key(&entry)) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
            queue.extend(referenced);
        }
        result.push(entry);
    }
    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read manifest of {}", path.display()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key: Option<String> = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(continuation) = line.strip_prefix(' ') {
            if current_key.is_some() {
                current_value.push_str(continuation);
            }
            continue;
        }
        if current_key.take().as_deref() == Some("Class-Path") {
            class_path = Some(current_value.clone());
        }
        current_value.clear();
        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }
    if current_key.as_deref() == Some("Class-Path") {
        class_path = Some(current_value);
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };
    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
}

/// Parses class file bytes into the IR.
pub fn parse_class(data: &[u8], is_target: bool) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }
    let flags = class_file.access_flags();
    let access = ClassAccess {
        is_final: flags.contains(ClassFlags::ACC_FINAL),
        is_interface: flags.contains(ClassFlags::ACC_INTERFACE),
    };
    let fields = parse_fields(constant_pool, class_file.fields()).context("parse fields")?;
    let methods = parse_methods(constant_pool, class_file.methods())
        .with_context(|| format!("parse methods of {name}"))?;

    Ok(Class {
        name,
        super_name,
        interfaces,
        access,
        fields,
        methods,
        content_hash: Sha256::digest(data).into(),
        is_target,
    })
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    match constant_pool.get(class_index as usize) {
        Some(ConstantPool::Class { name_index }) => resolve_utf8(constant_pool, *name_index),
        Some(_) => anyhow::bail!("unexpected class entry at {class_index}"),
        None => anyhow::bail!("missing class entry at {class_index}"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    match constant_pool.get(index as usize) {
        Some(ConstantPool::Utf8 { value }) => Ok(value.clone()),
        Some(_) => anyhow::bail!("unexpected utf8 entry at {index}"),
        None => anyhow::bail!("missing utf8 entry at {index}"),
    }
}

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for field in fields {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        let flags = field.access_flags();
        parsed.push(Field {
            name,
            descriptor,
            access: FieldAccess {
                is_static: flags.contains(FieldFlags::ACC_STATIC),
                is_volatile: flags.contains(FieldFlags::ACC_VOLATILE),
            },
        });
    }
    Ok(parsed)
}

fn parse_methods(
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let flags = method.access_flags();
        let access = MethodAccess {
            is_public: flags.contains(MethodFlags::ACC_PUBLIC),
            is_private: flags.contains(MethodFlags::ACC_PRIVATE),
            is_static: flags.contains(MethodFlags::ACC_STATIC),
            is_final: flags.contains(MethodFlags::ACC_FINAL),
            is_abstract: flags.contains(MethodFlags::ACC_ABSTRACT),
            is_native: flags.contains(MethodFlags::ACC_NATIVE),
        };
        let code = method.attributes().iter().find_map(|attribute| match attribute {
            Attribute::Code {
                max_locals,
                code,
                exception_table,
                ..
            } => Some((*max_locals, code, exception_table)),
            _ => None,
        });
        let (max_locals, insns, handlers) = match code {
            Some((max_locals, code, exception_table)) => {
                let decoded = decode_code(code, constant_pool)
                    .with_context(|| format!("decode {name}{descriptor}"))?;
                let handlers = convert_handlers(exception_table, constant_pool, &decoded, code.len())
                    .with_context(|| format!("exception table of {name}{descriptor}"))?;
                (max_locals, decoded.insns, handlers)
            }
            None => (0, Vec::new(), Vec::new()),
        };
        parsed.push(Method {
            name,
            descriptor,
            access,
            max_locals,
            insns,
            handlers,
        });
    }
    Ok(parsed)
}

/// Decoded instructions with the byte offset to instruction index mapping.
struct DecodedCode {
    insns: Vec<Insn>,
    index_of: BTreeMap<usize, usize>,
}

impl DecodedCode {
    fn index(&self, offset: usize) -> Result<usize> {
        self.index_of
            .get(&offset)
            .copied()
            .with_context(|| format!("offset {offset} is not an instruction boundary"))
    }
}

fn decode_code(code: &[u8], constant_pool: &[ConstantPool]) -> Result<DecodedCode> {
    let mut offsets = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {offset}");
        }
        offsets.push(offset);
        offset += length;
    }
    let mut decoded = DecodedCode {
        insns: Vec::with_capacity(offsets.len()),
        index_of: offsets
            .iter()
            .enumerate()
            .map(|(index, offset)| (*offset, index))
            .collect(),
    };
    for offset in offsets {
        let insn = decode_insn(code, offset, constant_pool, &decoded)
            .with_context(|| format!("decode instruction at offset {offset}"))?;
        decoded.insns.push(insn);
    }
    Ok(decoded)
}

fn decode_insn(
    code: &[u8],
    offset: usize,
    constant_pool: &[ConstantPool],
    decoded: &DecodedCode,
) -> Result<Insn> {
    let opcode = code[offset];
    let byte = |at: usize| code.get(offset + at).copied().context("operand out of bounds");
    let branch = |delta: i64| -> Result<usize> {
        let target = usize::try_from(offset as i64 + delta).context("negative branch target")?;
        decoded.index(target)
    };
    let operand = match opcode {
        opcodes::ACONST_NULL => Operand::Constant(Constant::Null),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Operand::Constant(Constant::Int(i32::from(opcode) - i32::from(opcodes::ICONST_0)))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => Operand::Constant(Constant::Long),
        opcodes::FCONST_0..=opcodes::FCONST_2 => Operand::Constant(Constant::Float),
        opcodes::DCONST_0 | opcodes::DCONST_1 => Operand::Constant(Constant::Double),
        opcodes::BIPUSH => Operand::Constant(Constant::Int(i32::from(byte(1)? as i8))),
        opcodes::SIPUSH => {
            Operand::Constant(Constant::Int(i32::from(read_u16(code, offset + 1)? as i16)))
        }
        opcodes::LDC => Operand::Constant(ldc_constant(constant_pool, u16::from(byte(1)?), opcode)?),
        opcodes::LDC_W | opcodes::LDC2_W => {
            Operand::Constant(ldc_constant(constant_pool, read_u16(code, offset + 1)?, opcode)?)
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Operand::Local(u16::from(byte(1)?))
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            Operand::Local(u16::from((opcode - opcodes::ILOAD_0) % 4))
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            Operand::Local(u16::from((opcode - opcodes::ISTORE_0) % 4))
        }
        opcodes::IINC => Operand::Iinc {
            local: u16::from(byte(1)?),
            delta: i16::from(byte(2)? as i8),
        },
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            Operand::Jump(branch(i64::from(read_u16(code, offset + 1)? as i16))?)
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            Operand::Jump(branch(i64::from(read_i32(code, offset + 1)?))?)
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = branch(i64::from(read_i32(code, base)?))?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = i64::from(high) - i64::from(low) + 1;
            let mut targets = Vec::new();
            for case in 0..count.max(0) as usize {
                targets.push(branch(i64::from(read_i32(code, base + 12 + case * 4)?))?);
            }
            Operand::Switch { default, targets }
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = branch(i64::from(read_i32(code, base)?))?;
            let pairs = read_i32(code, base + 4)?.max(0) as usize;
            let mut targets = Vec::new();
            for pair in 0..pairs {
                targets.push(branch(i64::from(read_i32(code, base + 12 + pair * 8)?))?);
            }
            Operand::Switch { default, targets }
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            Operand::Field(resolve_field_ref(constant_pool, read_u16(code, offset + 1)?)?)
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let kind = match opcode {
                opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                opcodes::INVOKESPECIAL => CallKind::Special,
                opcodes::INVOKESTATIC => CallKind::Static,
                _ => CallKind::Interface,
            };
            Operand::Invoke(resolve_call_site(
                constant_pool,
                read_u16(code, offset + 1)?,
                kind,
            )?)
        }
        opcodes::INVOKEDYNAMIC => {
            let descriptor = resolve_invoke_dynamic(constant_pool, read_u16(code, offset + 1)?)?;
            let (params, returns) = method_types(&descriptor)?;
            Operand::InvokeDynamic {
                args: params.iter().filter_map(|param| param.kind()).collect(),
                returns,
            }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            Operand::Type(resolve_class_name(constant_pool, read_u16(code, offset + 1)?)?)
        }
        opcodes::MULTIANEWARRAY => Operand::MultiArray {
            class: resolve_class_name(constant_pool, read_u16(code, offset + 1)?)?,
            dimensions: byte(3)?,
        },
        opcodes::WIDE => return decode_wide(code, offset),
        _ => Operand::None,
    };
    Ok(Insn::new(offset as u32, opcode, operand))
}

/// `wide` is folded into the instruction it modifies.
fn decode_wide(code: &[u8], offset: usize) -> Result<Insn> {
    let opcode = code.get(offset + 1).copied().context("missing wide opcode")?;
    let local = read_u16(code, offset + 2)?;
    let operand = match opcode {
        opcodes::IINC => Operand::Iinc {
            local,
            delta: read_u16(code, offset + 4)? as i16,
        },
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Operand::Local(local)
        }
        other => anyhow::bail!("invalid wide opcode 0x{other:02x}"),
    };
    Ok(Insn::new(offset as u32, opcode, operand))
}

fn ldc_constant(constant_pool: &[ConstantPool], index: u16, opcode: u8) -> Result<Constant> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing constant pool entry")?;
    Ok(match entry {
        ConstantPool::Integer { value } => Constant::Int(*value),
        ConstantPool::Float { .. } => Constant::Float,
        ConstantPool::Long { .. } => Constant::Long,
        ConstantPool::Double { .. } => Constant::Double,
        ConstantPool::String { string_index } => {
            Constant::String(resolve_utf8(constant_pool, *string_index)?)
        }
        ConstantPool::Class { name_index } => {
            Constant::Class(resolve_utf8(constant_pool, *name_index)?)
        }
        // Dynamic constants loaded by ldc2_w occupy two slots.
        _ if opcode == opcodes::LDC2_W => Constant::Long,
        _ => Constant::OtherReference,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(String, String)> {
    match constant_pool.get(index as usize) {
        Some(ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        }) => Ok((
            resolve_utf8(constant_pool, *name_index)?,
            resolve_utf8(constant_pool, *descriptor_index)?,
        )),
        _ => anyhow::bail!("missing name and type entry at {index}"),
    }
}

fn resolve_field_ref(constant_pool: &[ConstantPool], index: u16) -> Result<FieldRef> {
    let Some(ConstantPool::Fieldref {
        class_index,
        name_and_type_index,
    }) = constant_pool.get(index as usize)
    else {
        anyhow::bail!("missing field ref entry at {index}");
    };
    let owner = resolve_class_name(constant_pool, *class_index).context("resolve field owner")?;
    let (name, descriptor) = resolve_name_and_type(constant_pool, *name_and_type_index)?;
    let kind = field_kind(&descriptor)?;
    Ok(FieldRef {
        owner,
        name,
        descriptor,
        kind,
    })
}

fn resolve_call_site(constant_pool: &[ConstantPool], index: u16, kind: CallKind) -> Result<CallSite> {
    let (class_index, name_and_type_index) = match constant_pool.get(index as usize) {
        Some(
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            },
        ) => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("missing method ref entry at {index}"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name, descriptor) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let (args, returns) = method_types(&descriptor)?;
    Ok(CallSite {
        owner,
        name,
        descriptor,
        kind,
        args,
        returns,
    })
}

fn resolve_invoke_dynamic(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    match constant_pool.get(index as usize) {
        Some(ConstantPool::InvokeDynamic {
            name_and_type_index,
            ..
        }) => Ok(resolve_name_and_type(constant_pool, *name_and_type_index)?.1),
        _ => anyhow::bail!("missing invokedynamic entry at {index}"),
    }
}

fn convert_handlers(
    table: &[ExceptionRecord],
    constant_pool: &[ConstantPool],
    decoded: &DecodedCode,
    code_len: usize,
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();
    for entry in table {
        let catch_type = if entry.catch_type() == 0 {
            None
        } else {
            Some(resolve_class_name(constant_pool, entry.catch_type()).context("resolve catch type")?)
        };
        let end_pc = entry.end_pc() as usize;
        let end = if end_pc == code_len {
            decoded.insns.len()
        } else {
            decoded.index(end_pc)?
        };
        handlers.push(ExceptionHandler {
            start: decoded.index(entry.start_pc() as usize)?,
            end,
            handler: decoded.index(entry.handler_pc() as usize)?,
            catch_type,
        });
    }
    Ok(handlers)
}

fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        opcodes::ARRAYLENGTH | opcodes::ATHROW => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => 1,
        opcodes::WIDE => {
            let modified = code.get(offset + 1).copied().context("missing wide opcode")?;
            if modified == opcodes::IINC { 6 } else { 4 }
        }
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => anyhow::bail!("unsupported opcode 0x{opcode:02x}"),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .filter(|count| *count >= 0)
        .context("invalid tableswitch range")?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode i32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
