//! Reading and writing JVM class files.
//!
//! The decoder keeps everything it does not need to understand as raw
//! attribute bytes so that `ClassFile::to_bytes` reproduces the input exactly.
//! Method bodies are only decoded on request (`MemberInfo::code`), which the
//! model builder does for bridge methods and the remapper does for local
//! variable tables.

use std::collections::HashMap;
use thiserror::Error;

use crate::access::AccessFlags;

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("unexpected end of data at offset {0}")]
    Truncated(usize),
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unknown constant tag {tag} at index {index}")]
    BadConstantTag { tag: u8, index: u16 },
    #[error("constant #{index} is not a valid {expected}")]
    BadConstant { index: u16, expected: &'static str },
    #[error("malformed modified UTF-8 in constant #{0}")]
    BadUtf8(u16),
    #[error("unknown opcode {opcode:#04x} at pc {pc}")]
    BadInstruction { pc: usize, opcode: u8 },
    #[error("constant pool exceeds 65535 entries")]
    PoolOverflow,
    #[error("{0} does not fit in the class file format")]
    TooLarge(&'static str),
    #[error("{0} trailing bytes after class file")]
    TrailingData(usize),
}

type Result<T> = std::result::Result<T, ClassFormatError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Slot 0 and the second slot of `Long`/`Double` entries.
    Unusable,
    Utf8(String),
    /// A Utf8 entry holding unpaired surrogates. `text` has them replaced by
    /// U+FFFD; `raw` is written back unchanged.
    LossyUtf8 { text: String, raw: Vec<u8> },
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name: u16 },
    String { value: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved `Fieldref`/`Methodref`/`InterfaceMethodref` constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: RefKind,
    pub owner: &'a str,
    pub name: &'a str,
    pub desc: &'a str,
}

/// Dedup keys for the entries the rewriter appends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Utf8(String),
    Class(u16),
    NameAndType(u16, u16),
}

impl PoolKey {
    fn of(constant: &Constant) -> Option<Self> {
        match constant {
            Constant::Utf8(s) => Some(PoolKey::Utf8(s.clone())),
            Constant::Class { name } => Some(PoolKey::Class(*name)),
            Constant::NameAndType { name, descriptor } => Some(PoolKey::NameAndType(*name, *descriptor)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    /// Built on the first lookup, then kept in step by `push` and `set`.
    lookup: Option<HashMap<PoolKey, u16>>,
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::from_entries(vec![Constant::Unusable])
    }
}

impl ConstantPool {
    fn from_entries(entries: Vec<Constant>) -> Self {
        Self {
            entries,
            lookup: None,
        }
    }

    /// Number of slots including the unused slot 0, as stored in the file.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, c)| (idx as u16, c))
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    pub fn set(&mut self, index: u16, constant: Constant) {
        let slot = index as usize;
        if let Some(lookup) = self.lookup.as_mut() {
            if let Some(old) = PoolKey::of(&self.entries[slot])
                && lookup.get(&old) == Some(&index)
            {
                lookup.remove(&old);
            }
            if let Some(key) = PoolKey::of(&constant) {
                lookup.entry(key).or_insert(index);
            }
        }
        self.entries[slot] = constant;
    }

    pub fn push(&mut self, constant: Constant) -> Result<u16> {
        let wide = constant.is_wide();
        let needed = if wide { 2 } else { 1 };
        if self.entries.len() + needed > u16::MAX as usize {
            return Err(ClassFormatError::PoolOverflow);
        }
        let index = self.entries.len() as u16;
        if let Some(lookup) = self.lookup.as_mut()
            && let Some(key) = PoolKey::of(&constant)
        {
            lookup.entry(key).or_insert(index);
        }
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(Constant::Utf8(s)) | Some(Constant::LossyUtf8 { text: s, .. }) => Ok(s),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index) {
            Some(Constant::Class { name }) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (kind, class, nat) = match self.get(index) {
            Some(Constant::FieldRef {
                class,
                name_and_type,
            }) => (RefKind::Field, *class, *name_and_type),
            Some(Constant::MethodRef {
                class,
                name_and_type,
            }) => (RefKind::Method, *class, *name_and_type),
            Some(Constant::InterfaceMethodRef {
                class,
                name_and_type,
            }) => (RefKind::InterfaceMethod, *class, *name_and_type),
            _ => {
                return Err(ClassFormatError::BadConstant {
                    index,
                    expected: "member reference",
                });
            }
        };
        let (name, desc) = self.name_and_type(nat)?;
        Ok(MemberRef {
            kind,
            owner: self.class_name(class)?,
            name,
            desc,
        })
    }

    fn find_or_push(&mut self, key: PoolKey, constant: Constant) -> Result<u16> {
        let entries = &self.entries;
        let lookup = self.lookup.get_or_insert_with(|| {
            let mut lookup = HashMap::with_capacity(entries.len());
            for (idx, c) in entries.iter().enumerate().skip(1) {
                if let Some(key) = PoolKey::of(c) {
                    lookup.entry(key).or_insert(idx as u16);
                }
            }
            lookup
        });
        let existing = lookup.get(&key).copied();
        match existing {
            Some(idx) => Ok(idx),
            None => self.push(constant),
        }
    }

    /// Index of an existing Utf8 entry with this value, or a new one.
    /// Entries holding unpaired surrogates never match.
    pub fn utf8_index(&mut self, value: &str) -> Result<u16> {
        self.find_or_push(PoolKey::Utf8(value.to_string()), Constant::Utf8(value.to_string()))
    }

    pub fn class_index(&mut self, name: &str) -> Result<u16> {
        let name = self.utf8_index(name)?;
        self.find_or_push(PoolKey::Class(name), Constant::Class { name })
    }

    pub fn name_and_type_index(&mut self, name: &str, desc: &str) -> Result<u16> {
        let name = self.utf8_index(name)?;
        let descriptor = self.utf8_index(desc)?;
        self.find_or_push(
            PoolKey::NameAndType(name, descriptor),
            Constant::NameAndType { name, descriptor },
        )
    }

    pub fn member_ref_index(
        &mut self,
        kind: RefKind,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> Result<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, desc)?;
        self.push(match kind {
            RefKind::Field => Constant::FieldRef {
                class,
                name_and_type,
            },
            RefKind::Method => Constant::MethodRef {
                class,
                name_and_type,
            },
            RefKind::InterfaceMethod => Constant::InterfaceMethodRef {
                class,
                name_and_type,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name_index: u16,
    pub data: Vec<u8>,
}

impl Attribute {
    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.name_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub access: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.descriptor_index)
    }

    pub fn attribute(&self, pool: &ConstantPool, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, pool, name)
    }

    pub fn signature<'a>(&self, pool: &'a ConstantPool) -> Result<Option<&'a str>> {
        index_attribute(&self.attributes, pool, "Signature")
            .map(|idx| pool.utf8(idx))
            .transpose()
    }

    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        self.attribute(pool, "Code")
            .map(|attr| CodeAttribute::parse(&attr.data))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access: AccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// An empty Java 8 class, used to assemble classes programmatically.
    pub fn new(name: &str, super_name: Option<&str>, access: AccessFlags) -> Result<Self> {
        let mut constant_pool = ConstantPool::default();
        let this_class = constant_pool.class_index(name)?;
        let super_class = match super_name {
            Some(super_name) => constant_pool.class_index(super_name)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version: 52,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let constant_pool = read_constant_pool(&mut r)?;
        let access = AccessFlags::from_bits(r.u16()?);
        let this_class = r.u16()?;
        let super_class = r.u16()?;
        let interface_count = r.u16()?;
        let interfaces = (0..interface_count)
            .map(|_| r.u16())
            .collect::<Result<Vec<_>>>()?;
        let fields = read_members(&mut r)?;
        let methods = read_members(&mut r)?;
        let attributes = read_attributes(&mut r)?;
        if r.remaining() != 0 {
            return Err(ClassFormatError::TrailingData(r.remaining()));
        }

        let class = Self {
            minor_version,
            major_version,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.name()?;
        Ok(class)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1024);
        put_u32(&mut out, MAGIC);
        put_u16(&mut out, self.minor_version);
        put_u16(&mut out, self.major_version);
        write_constant_pool(&mut out, &self.constant_pool)?;
        put_u16(&mut out, self.access.bits());
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);
        put_len16(&mut out, self.interfaces.len(), "interface list")?;
        for interface in &self.interfaces {
            put_u16(&mut out, *interface);
        }
        write_members(&mut out, &self.fields)?;
        write_members(&mut out, &self.methods)?;
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    pub fn name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>> {
        self.interfaces
            .iter()
            .map(|idx| self.constant_pool.class_name(*idx))
            .collect()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        find_attribute(&self.attributes, &self.constant_pool, name)
    }

    pub fn signature(&self) -> Result<Option<&str>> {
        index_attribute(&self.attributes, &self.constant_pool, "Signature")
            .map(|idx| self.constant_pool.utf8(idx))
            .transpose()
    }

    pub fn source_file(&self) -> Result<Option<&str>> {
        index_attribute(&self.attributes, &self.constant_pool, "SourceFile")
            .map(|idx| self.constant_pool.utf8(idx))
            .transpose()
    }

    pub fn add_interface(&mut self, name: &str) -> Result<()> {
        let idx = self.constant_pool.class_index(name)?;
        self.interfaces.push(idx);
        Ok(())
    }

    pub fn add_field(&mut self, access: AccessFlags, name: &str, desc: &str) -> Result<usize> {
        let member = self.new_member(access, name, desc)?;
        self.fields.push(member);
        Ok(self.fields.len() - 1)
    }

    pub fn add_method(
        &mut self,
        access: AccessFlags,
        name: &str,
        desc: &str,
        code: Option<CodeAttribute>,
    ) -> Result<usize> {
        let mut member = self.new_member(access, name, desc)?;
        if let Some(code) = code {
            let attr = self.new_attribute("Code", code.to_bytes()?)?;
            member.attributes.push(attr);
        }
        self.methods.push(member);
        Ok(self.methods.len() - 1)
    }

    /// Builds an attribute whose payload is a single constant pool index
    /// pointing at `value` (`Signature`, `SourceFile`).
    pub fn new_utf8_attribute(&mut self, name: &str, value: &str) -> Result<Attribute> {
        let value = self.constant_pool.utf8_index(value)?;
        self.new_attribute(name, value.to_be_bytes().to_vec())
    }

    pub fn new_attribute(&mut self, name: &str, data: Vec<u8>) -> Result<Attribute> {
        Ok(Attribute {
            name_index: self.constant_pool.utf8_index(name)?,
            data,
        })
    }

    fn new_member(&mut self, access: AccessFlags, name: &str, desc: &str) -> Result<MemberInfo> {
        Ok(MemberInfo {
            access,
            name_index: self.constant_pool.utf8_index(name)?,
            descriptor_index: self.constant_pool.utf8_index(desc)?,
            attributes: Vec::new(),
        })
    }
}

fn find_attribute<'a>(
    attributes: &'a [Attribute],
    pool: &ConstantPool,
    name: &str,
) -> Option<&'a Attribute> {
    attributes
        .iter()
        .find(|attr| attr.name(pool).is_ok_and(|n| n == name))
}

fn index_attribute(attributes: &[Attribute], pool: &ConstantPool, name: &str) -> Option<u16> {
    find_attribute(attributes, pool, name)
        .filter(|attr| attr.data.len() == 2)
        .map(|attr| u16::from_be_bytes([attr.data[0], attr.data[1]]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        let code = r.bytes(code_len)?.to_vec();
        let exception_count = r.u16()?;
        let mut exception_table = Vec::with_capacity(exception_count as usize);
        for _ in 0..exception_count {
            exception_table.push(ExceptionEntry {
                start_pc: r.u16()?,
                end_pc: r.u16()?,
                handler_pc: r.u16()?,
                catch_type: r.u16()?,
            });
        }
        let attributes = read_attributes(&mut r)?;
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.code.len() + 32);
        put_u16(&mut out, self.max_stack);
        put_u16(&mut out, self.max_locals);
        put_u32(
            &mut out,
            u32::try_from(self.code.len()).map_err(|_| ClassFormatError::TooLarge("code"))?,
        );
        out.extend_from_slice(&self.code);
        put_len16(&mut out, self.exception_table.len(), "exception table")?;
        for entry in &self.exception_table {
            put_u16(&mut out, entry.start_pc);
            put_u16(&mut out, entry.end_pc);
            put_u16(&mut out, entry.handler_pc);
            put_u16(&mut out, entry.catch_type);
        }
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    /// The first `invoke*` instruction's constant pool index, which for a
    /// compiler-generated bridge is the method it forwards to.
    pub fn first_invocation(&self) -> Result<Option<u16>> {
        let mut pc = 0;
        while pc < self.code.len() {
            let opcode = self.code[pc];
            if (0xb6..=0xb9).contains(&opcode) {
                let hi = *self.code.get(pc + 1).ok_or(ClassFormatError::Truncated(pc + 1))?;
                let lo = *self.code.get(pc + 2).ok_or(ClassFormatError::Truncated(pc + 2))?;
                return Ok(Some(u16::from_be_bytes([hi, lo])));
            }
            pc += instruction_length(&self.code, pc)?;
        }
        Ok(None)
    }
}

/// One entry of a `LocalVariableTable` or `LocalVariableTypeTable`; for the
/// latter `descriptor_index` points at a generic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

pub fn parse_local_variables(data: &[u8]) -> Result<Vec<LocalVariable>> {
    let mut r = Reader::new(data);
    let count = r.u16()?;
    (0..count)
        .map(|_| {
            Ok(LocalVariable {
                start_pc: r.u16()?,
                length: r.u16()?,
                name_index: r.u16()?,
                descriptor_index: r.u16()?,
                index: r.u16()?,
            })
        })
        .collect()
}

pub fn write_local_variables(vars: &[LocalVariable]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + vars.len() * 10);
    put_len16(&mut out, vars.len(), "local variable table")?;
    for var in vars {
        put_u16(&mut out, var.start_pc);
        put_u16(&mut out, var.length);
        put_u16(&mut out, var.name_index);
        put_u16(&mut out, var.descriptor_index);
        put_u16(&mut out, var.index);
    }
    Ok(out)
}

fn instruction_length(code: &[u8], pc: usize) -> Result<usize> {
    let opcode = code[pc];
    let len = match opcode {
        0x00..=0x0f => 1,
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 2,
        0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xa8 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1
        | 0xc6 | 0xc7 => 3,
        0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf | 0xc2 | 0xc3 => 1,
        0xc5 => 4,
        0xb9 | 0xba | 0xc8 | 0xc9 => 5,
        0xc4 => match code.get(pc + 1) {
            Some(0x84) => 6,
            Some(_) => 4,
            None => return Err(ClassFormatError::Truncated(pc + 1)),
        },
        0xaa | 0xab => {
            let pad = (4 - (pc + 1) % 4) % 4;
            let base = pc + 1 + pad;
            let word = |at: usize| -> Result<i32> {
                code.get(at..at + 4)
                    .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    .ok_or(ClassFormatError::Truncated(at))
            };
            if opcode == 0xaa {
                let low = word(base + 4)?;
                let high = word(base + 8)?;
                let count = (high as i64 - low as i64 + 1).max(0) as usize;
                1 + pad + 12 + count * 4
            } else {
                let pairs = word(base + 4)?.max(0) as usize;
                1 + pad + 8 + pairs * 8
            }
        }
        _ => return Err(ClassFormatError::BadInstruction { pc, opcode }),
    };
    Ok(len)
}

fn read_constant_pool(r: &mut Reader<'_>) -> Result<ConstantPool> {
    let count = r.u16()?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(Constant::Unusable);

    let mut index = 1u16;
    while index < count {
        let tag = r.u8()?;
        let constant = match tag {
            1 => {
                let len = r.u16()? as usize;
                let raw = r.bytes(len)?;
                let (text, exact) = decode_modified_utf8(raw).ok_or(ClassFormatError::BadUtf8(index))?;
                if exact {
                    Constant::Utf8(text)
                } else {
                    Constant::LossyUtf8 {
                        text,
                        raw: raw.to_vec(),
                    }
                }
            }
            3 => Constant::Integer(r.u32()? as i32),
            4 => Constant::Float(r.u32()?),
            5 => Constant::Long(r.u64()? as i64),
            6 => Constant::Double(r.u64()?),
            7 => Constant::Class { name: r.u16()? },
            8 => Constant::String { value: r.u16()? },
            9 => Constant::FieldRef {
                class: r.u16()?,
                name_and_type: r.u16()?,
            },
            10 => Constant::MethodRef {
                class: r.u16()?,
                name_and_type: r.u16()?,
            },
            11 => Constant::InterfaceMethodRef {
                class: r.u16()?,
                name_and_type: r.u16()?,
            },
            12 => Constant::NameAndType {
                name: r.u16()?,
                descriptor: r.u16()?,
            },
            15 => Constant::MethodHandle {
                kind: r.u8()?,
                reference: r.u16()?,
            },
            16 => Constant::MethodType {
                descriptor: r.u16()?,
            },
            17 => Constant::Dynamic {
                bootstrap: r.u16()?,
                name_and_type: r.u16()?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap: r.u16()?,
                name_and_type: r.u16()?,
            },
            19 => Constant::Module { name: r.u16()? },
            20 => Constant::Package { name: r.u16()? },
            _ => return Err(ClassFormatError::BadConstantTag { tag, index }),
        };
        let wide = constant.is_wide();
        entries.push(constant);
        index += 1;
        if wide {
            entries.push(Constant::Unusable);
            index += 1;
        }
    }

    Ok(ConstantPool::from_entries(entries))
}

fn write_constant_pool(out: &mut Vec<u8>, pool: &ConstantPool) -> Result<()> {
    put_len16(out, pool.entries.len(), "constant pool")?;
    for (index, constant) in pool.iter() {
        match constant {
            Constant::Unusable => {}
            Constant::Utf8(s) => {
                out.push(1);
                let encoded = encode_modified_utf8(s);
                if encoded.len() > u16::MAX as usize {
                    return Err(ClassFormatError::BadUtf8(index));
                }
                put_u16(out, encoded.len() as u16);
                out.extend_from_slice(&encoded);
            }
            Constant::LossyUtf8 { raw, .. } => {
                out.push(1);
                put_len16(out, raw.len(), "Utf8 constant")?;
                out.extend_from_slice(raw);
            }
            Constant::Integer(v) => {
                out.push(3);
                put_u32(out, *v as u32);
            }
            Constant::Float(bits) => {
                out.push(4);
                put_u32(out, *bits);
            }
            Constant::Long(v) => {
                out.push(5);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Constant::Double(bits) => {
                out.push(6);
                out.extend_from_slice(&bits.to_be_bytes());
            }
            Constant::Class { name } => put_tagged(out, 7, &[*name]),
            Constant::String { value } => put_tagged(out, 8, &[*value]),
            Constant::FieldRef {
                class,
                name_and_type,
            } => put_tagged(out, 9, &[*class, *name_and_type]),
            Constant::MethodRef {
                class,
                name_and_type,
            } => put_tagged(out, 10, &[*class, *name_and_type]),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => put_tagged(out, 11, &[*class, *name_and_type]),
            Constant::NameAndType { name, descriptor } => put_tagged(out, 12, &[*name, *descriptor]),
            Constant::MethodHandle { kind, reference } => {
                out.push(15);
                out.push(*kind);
                put_u16(out, *reference);
            }
            Constant::MethodType { descriptor } => put_tagged(out, 16, &[*descriptor]),
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            } => put_tagged(out, 17, &[*bootstrap, *name_and_type]),
            Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => put_tagged(out, 18, &[*bootstrap, *name_and_type]),
            Constant::Module { name } => put_tagged(out, 19, &[*name]),
            Constant::Package { name } => put_tagged(out, 20, &[*name]),
        }
    }
    Ok(())
}

fn read_members(r: &mut Reader<'_>) -> Result<Vec<MemberInfo>> {
    let count = r.u16()?;
    (0..count)
        .map(|_| {
            Ok(MemberInfo {
                access: AccessFlags::from_bits(r.u16()?),
                name_index: r.u16()?,
                descriptor_index: r.u16()?,
                attributes: read_attributes(r)?,
            })
        })
        .collect()
}

fn write_members(out: &mut Vec<u8>, members: &[MemberInfo]) -> Result<()> {
    put_len16(out, members.len(), "member list")?;
    for member in members {
        put_u16(out, member.access.bits());
        put_u16(out, member.name_index);
        put_u16(out, member.descriptor_index);
        write_attributes(out, &member.attributes)?;
    }
    Ok(())
}

fn read_attributes(r: &mut Reader<'_>) -> Result<Vec<Attribute>> {
    let count = r.u16()?;
    (0..count)
        .map(|_| {
            let name_index = r.u16()?;
            let len = r.u32()? as usize;
            Ok(Attribute {
                name_index,
                data: r.bytes(len)?.to_vec(),
            })
        })
        .collect()
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) -> Result<()> {
    put_len16(out, attributes.len(), "attribute list")?;
    for attr in attributes {
        put_u16(out, attr.name_index);
        put_u32(
            out,
            u32::try_from(attr.data.len()).map_err(|_| ClassFormatError::TooLarge("attribute"))?,
        );
        out.extend_from_slice(&attr.data);
    }
    Ok(())
}

/// Decodes the JVM's modified UTF-8 (two-byte NUL, surrogate pairs encoded
/// as two three-byte sequences). The flag is false when unpaired surrogates
/// had to be replaced.
fn decode_modified_utf8(raw: &[u8]) -> Option<(String, bool)> {
    if raw.iter().all(|b| (1..0x80).contains(b)) {
        return std::str::from_utf8(raw).ok().map(|s| (s.to_string(), true));
    }

    let mut units = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        let unit = if b & 0x80 == 0 {
            i += 1;
            b as u16
        } else if b & 0xe0 == 0xc0 {
            let b2 = *raw.get(i + 1)?;
            i += 2;
            ((b as u16 & 0x1f) << 6) | (b2 as u16 & 0x3f)
        } else if b & 0xf0 == 0xe0 {
            let b2 = *raw.get(i + 1)?;
            let b3 = *raw.get(i + 2)?;
            i += 3;
            ((b as u16 & 0x0f) << 12) | ((b2 as u16 & 0x3f) << 6) | (b3 as u16 & 0x3f)
        } else {
            return None;
        };
        units.push(unit);
    }
    let mut exact = true;
    let text = char::decode_utf16(units)
        .map(|c| {
            c.unwrap_or_else(|_| {
                exact = false;
                char::REPLACEMENT_CHARACTER
            })
        })
        .collect();
    Some((text, exact))
}

fn encode_modified_utf8(s: &str) -> Vec<u8> {
    if s.bytes().all(|b| (1..0x80).contains(&b)) {
        return s.as_bytes().to_vec();
    }

    let mut out = Vec::with_capacity(s.len() + 8);
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let hi = self.u32()? as u64;
        let lo = self.u32()? as u64;
        Ok((hi << 32) | lo)
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_len16(out: &mut Vec<u8>, len: usize, what: &'static str) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| ClassFormatError::TooLarge(what))?;
    put_u16(out, len);
    Ok(())
}

fn put_tagged(out: &mut Vec<u8>, tag: u8, values: &[u16]) {
    out.push(tag);
    for v in values {
        put_u16(out, *v);
    }
}
