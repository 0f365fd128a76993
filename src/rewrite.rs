//! Emits a remapped copy of a decoded class.
//!
//! Instructions address the constant pool by index, so the pool is rewritten
//! without moving anything: `Class`, member reference, `MethodType` and
//! dynamic call site entries are re-pointed in place at new `Utf8` and
//! `NameAndType` entries appended to the end. `Utf8` entries are never edited
//! because any number of other entries and attributes may share them.
//! Attribute payloads only ever swap one `u16` index for another, so they are
//! patched without changing their length.

use std::collections::HashMap;

use crate::access::{AccessFlags, Visibility};
use crate::classfile::{
    self, Attribute, ClassFile, ClassFormatError, CodeAttribute, Constant, ConstantPool,
    LocalVariable, RefKind,
};
use crate::descriptor;
use crate::locals::{LocalNaming, LocalSlot};

type Result<T> = std::result::Result<T, ClassFormatError>;

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";

/// The single renaming function a class is rewritten with. All names are
/// given in the source namespace; `None` means unchanged.
pub trait Remapper {
    fn map_class(&self, name: &str) -> Option<String>;

    fn map_field_name(&self, owner: &str, name: &str, desc: &str) -> Option<String>;

    fn map_method_name(&self, owner: &str, name: &str, desc: &str) -> Option<String>;

    /// Name of an annotation element, looked up as a method of the
    /// annotation interface.
    fn map_annotation_element(&self, _annotation_desc: &str, _name: &str) -> Option<String> {
        None
    }

    /// Whether the member must become public in the output.
    fn widens_member(&self, _owner: &str, _is_field: bool, _name: &str, _desc: &str) -> bool {
        false
    }

    fn widens_class(&self, _name: &str) -> bool {
        false
    }

    fn map_class_reference(&self, name: &str) -> Option<String> {
        descriptor::remap_class_reference(name, &|n: &str| self.map_class(n))
    }

    fn map_desc(&self, desc: &str) -> String {
        descriptor::remap_descriptor(desc, &|n: &str| self.map_class(n))
    }

    fn map_signature(&self, signature: &str) -> String {
        descriptor::remap_signature(signature, &|n: &str| self.map_class(n))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteSettings {
    pub remove_frames: bool,
    pub rebuild_source_filenames: bool,
    /// `None` leaves local variable names alone.
    pub locals: Option<LocalNaming>,
}

/// Rewrites `class` in place.
pub fn rewrite_class<R: Remapper + ?Sized>(
    class: &mut ClassFile,
    remapper: &R,
    settings: &RewriteSettings,
) -> Result<()> {
    let original = class.constant_pool.clone();
    let this = original.class_name(class.this_class)?.to_string();
    let mut rw = Rewriter {
        original: &original,
        pool: &mut class.constant_pool,
        remapper,
        settings,
        this: &this,
        params: Vec::new(),
    };

    let bootstrap = bootstrap_methods(&class.attributes, &original)?;
    rw.rewrite_pool(&bootstrap)?;

    if remapper.widens_class(&this) {
        class.access = class.access.with_visibility(Visibility::Public);
    }

    for field in &mut class.fields {
        let name = original.utf8(field.name_index)?;
        let desc = original.utf8(field.descriptor_index)?;
        if remapper.widens_member(&this, true, name, desc) {
            field.access = field.access.with_visibility(Visibility::Public);
        }
        if let Some(mapped) = remapper.map_field_name(&this, name, desc) {
            field.name_index = rw.pool.utf8_index(&mapped)?;
        }
        field.descriptor_index = rw.utf8_mapped(field.descriptor_index, |r, d| r.map_desc(d))?;
        rw.rewrite_attributes(&mut field.attributes)?;
    }

    for method in &mut class.methods {
        let name = original.utf8(method.name_index)?;
        let desc = original.utf8(method.descriptor_index)?;
        if remapper.widens_member(&this, false, name, desc) {
            method.access = method.access.with_visibility(Visibility::Public);
        }
        if let Some(mapped) = remapper.map_method_name(&this, name, desc) {
            method.name_index = rw.pool.utf8_index(&mapped)?;
        }
        method.descriptor_index = rw.utf8_mapped(method.descriptor_index, |r, d| r.map_desc(d))?;
        if settings.locals.is_some() {
            rw.params = parameter_slots(method.access, desc, remapper);
        }
        rw.rewrite_attributes(&mut method.attributes)?;
        rw.params.clear();
    }

    rw.rewrite_attributes(&mut class.attributes)?;

    if settings.rebuild_source_filenames {
        let new_name = remapper.map_class(&this).unwrap_or_else(|| this.clone());
        rw.rebuild_source_file(&mut class.attributes, &new_name)?;
    }
    Ok(())
}

/// First slot and remapped type of each declared parameter.
fn parameter_slots<R: Remapper + ?Sized>(access: AccessFlags, desc: &str, remapper: &R) -> Vec<(u16, String)> {
    let Some((params, _)) = descriptor::parse_method_descriptor(desc) else {
        return Vec::new();
    };
    let mut slot = if access.is_static() { 0 } else { 1 };
    params
        .into_iter()
        .map(|param| {
            let entry = (slot, remapper.map_desc(param));
            slot += descriptor::slot_size(param);
            entry
        })
        .collect()
}

/// Bootstrap method references and static arguments, by bootstrap index.
fn bootstrap_methods(attributes: &[Attribute], pool: &ConstantPool) -> Result<Vec<(u16, Vec<u16>)>> {
    let Some(attr) = attributes
        .iter()
        .find(|a| a.name(pool).is_ok_and(|n| n == "BootstrapMethods"))
    else {
        return Ok(Vec::new());
    };
    let mut cur = Cursor::new(&attr.data);
    let count = cur.u16()?;
    let mut methods = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let handle = cur.u16()?;
        let argc = cur.u16()?;
        let args = (0..argc).map(|_| cur.u16()).collect::<Result<Vec<_>>>()?;
        methods.push((handle, args));
    }
    Ok(methods)
}

struct Rewriter<'a, R: ?Sized> {
    original: &'a ConstantPool,
    pool: &'a mut ConstantPool,
    remapper: &'a R,
    settings: &'a RewriteSettings,
    this: &'a str,
    /// Parameters of the method whose attributes are being rewritten.
    params: Vec<(u16, String)>,
}

impl<R: Remapper + ?Sized> Rewriter<'_, R> {
    /// Index of `f(original value)`, reusing `index` when nothing changed.
    fn utf8_mapped(&mut self, index: u16, f: impl Fn(&R, &str) -> String) -> Result<u16> {
        let value = self.original.utf8(index)?;
        let mapped = f(self.remapper, value);
        if mapped == value {
            Ok(index)
        } else {
            self.pool.utf8_index(&mapped)
        }
    }

    fn rewrite_pool(&mut self, bootstrap: &[(u16, Vec<u16>)]) -> Result<()> {
        let original = self.original;
        for (idx, constant) in original.iter() {
            match *constant {
                Constant::Class { name } => {
                    let value = original.utf8(name)?;
                    if let Some(mapped) = self.remapper.map_class_reference(value) {
                        let name = self.pool.utf8_index(&mapped)?;
                        self.pool.set(idx, Constant::Class { name });
                    }
                }
                Constant::FieldRef { class, .. }
                | Constant::MethodRef { class, .. }
                | Constant::InterfaceMethodRef { class, .. } => {
                    let member = original.member_ref(idx)?;
                    let name = match member.kind {
                        RefKind::Field => {
                            self.remapper
                                .map_field_name(member.owner, member.name, member.desc)
                        }
                        _ => self
                            .remapper
                            .map_method_name(member.owner, member.name, member.desc),
                    };
                    let desc = self.remapper.map_desc(member.desc);
                    if name.is_none() && desc == member.desc {
                        continue;
                    }
                    let name_and_type = self
                        .pool
                        .name_and_type_index(name.as_deref().unwrap_or(member.name), &desc)?;
                    self.pool.set(
                        idx,
                        match member.kind {
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
                        },
                    );
                }
                Constant::MethodType { descriptor } => {
                    let descriptor = self.utf8_mapped(descriptor, |r, d| r.map_desc(d))?;
                    self.pool.set(idx, Constant::MethodType { descriptor });
                }
                Constant::InvokeDynamic {
                    bootstrap: bsm,
                    name_and_type,
                } => {
                    let (name, desc) = original.name_and_type(name_and_type)?;
                    let mapped_name = self.lambda_name(bootstrap.get(bsm as usize), name, desc)?;
                    let mapped_desc = self.remapper.map_desc(desc);
                    if mapped_name.is_none() && mapped_desc == desc {
                        continue;
                    }
                    let name_and_type = self
                        .pool
                        .name_and_type_index(mapped_name.as_deref().unwrap_or(name), &mapped_desc)?;
                    self.pool.set(
                        idx,
                        Constant::InvokeDynamic {
                            bootstrap: bsm,
                            name_and_type,
                        },
                    );
                }
                Constant::Dynamic {
                    bootstrap: bsm,
                    name_and_type,
                } => {
                    let (name, desc) = original.name_and_type(name_and_type)?;
                    let mapped_desc = self.remapper.map_desc(desc);
                    if mapped_desc != desc {
                        let name_and_type = self.pool.name_and_type_index(name, &mapped_desc)?;
                        self.pool.set(
                            idx,
                            Constant::Dynamic {
                                bootstrap: bsm,
                                name_and_type,
                            },
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// For `LambdaMetafactory` call sites the name is the implemented
    /// interface method: owner is the call site's return type, descriptor the
    /// first static argument.
    fn lambda_name(
        &self,
        bootstrap: Option<&(u16, Vec<u16>)>,
        name: &str,
        desc: &str,
    ) -> Result<Option<String>> {
        let Some((handle, args)) = bootstrap else {
            return Ok(None);
        };
        let Some(Constant::MethodHandle { reference, .. }) = self.original.get(*handle) else {
            return Ok(None);
        };
        let factory = self.original.member_ref(*reference)?;
        if factory.owner != LAMBDA_METAFACTORY {
            return Ok(None);
        }
        let Some((_, ret)) = descriptor::parse_method_descriptor(desc) else {
            return Ok(None);
        };
        let Some(interface) = ret.strip_prefix('L').and_then(|r| r.strip_suffix(';')) else {
            return Ok(None);
        };
        let sam_desc = match args.first().and_then(|a| self.original.get(*a)) {
            Some(Constant::MethodType { descriptor }) => self.original.utf8(*descriptor)?,
            _ => return Ok(None),
        };
        Ok(self.remapper.map_method_name(interface, name, sam_desc))
    }

    fn rewrite_attributes(&mut self, attributes: &mut Vec<Attribute>) -> Result<()> {
        if self.settings.remove_frames {
            let original = self.original;
            attributes.retain(|a| {
                !a.name(original)
                    .is_ok_and(|n| n == "StackMapTable" || n == "StackMap")
            });
        }
        for attr in attributes.iter_mut() {
            let name = self.original.utf8(attr.name_index)?.to_string();
            match name.as_str() {
                "Signature" => {
                    let idx = read_index(&attr.data)?;
                    let idx = self.utf8_mapped(idx, |r, s| r.map_signature(s))?;
                    attr.data = idx.to_be_bytes().to_vec();
                }
                "Code" => self.rewrite_code(attr)?,
                "LocalVariableTable" => {
                    let mut vars = classfile::parse_local_variables(&attr.data)?;
                    for var in &mut vars {
                        var.descriptor_index =
                            self.utf8_mapped(var.descriptor_index, |r, d| r.map_desc(d))?;
                    }
                    attr.data = classfile::write_local_variables(&vars)?;
                }
                "LocalVariableTypeTable" => {
                    let mut vars = classfile::parse_local_variables(&attr.data)?;
                    for var in &mut vars {
                        var.descriptor_index =
                            self.utf8_mapped(var.descriptor_index, |r, s| r.map_signature(s))?;
                    }
                    attr.data = classfile::write_local_variables(&vars)?;
                }
                "InnerClasses" => self.rewrite_inner_classes(attr)?,
                "EnclosingMethod" => self.rewrite_enclosing_method(attr)?,
                "Record" => self.rewrite_record(attr)?,
                "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                    let mut cur = Cursor::new(&attr.data);
                    let mut out = attr.data.clone();
                    let count = cur.u16()?;
                    for _ in 0..count {
                        self.annotation(&mut cur, &mut out)?;
                    }
                    attr.data = out;
                }
                "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
                    let mut cur = Cursor::new(&attr.data);
                    let mut out = attr.data.clone();
                    let params = cur.u8()?;
                    for _ in 0..params {
                        let count = cur.u16()?;
                        for _ in 0..count {
                            self.annotation(&mut cur, &mut out)?;
                        }
                    }
                    attr.data = out;
                }
                "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => {
                    let mut cur = Cursor::new(&attr.data);
                    let mut out = attr.data.clone();
                    let count = cur.u16()?;
                    for _ in 0..count {
                        skip_type_annotation_target(&mut cur)?;
                        self.annotation(&mut cur, &mut out)?;
                    }
                    attr.data = out;
                }
                "AnnotationDefault" => {
                    let mut cur = Cursor::new(&attr.data);
                    let mut out = attr.data.clone();
                    self.element_value(&mut cur, &mut out)?;
                    attr.data = out;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn rewrite_code(&mut self, attr: &mut Attribute) -> Result<()> {
        let mut code = CodeAttribute::parse(&attr.data)?;
        self.rewrite_attributes(&mut code.attributes)?;
        let settings = self.settings;
        if let Some(naming) = &settings.locals {
            self.rename_locals(&mut code, naming)?;
        }
        attr.data = code.to_bytes()?;
        Ok(())
    }

    fn rename_locals(&mut self, code: &mut CodeAttribute, naming: &LocalNaming) -> Result<()> {
        let original = self.original;
        let position = |name: &str| {
            code.attributes
                .iter()
                .position(|a| a.name(original).is_ok_and(|n| n == name))
        };
        let lvt_pos = position("LocalVariableTable");
        let lvtt_pos = position("LocalVariableTypeTable");

        let mut table = match lvt_pos {
            Some(pos) => classfile::parse_local_variables(&code.attributes[pos].data)?,
            None => Vec::new(),
        };
        // Parameters with no entry from the start of the method get one.
        let unnamed: Vec<(u16, String)> = self
            .params
            .iter()
            .filter(|(slot, _)| !table.iter().any(|v| v.index == *slot && v.start_pc == 0))
            .cloned()
            .collect();

        let pool = &*self.pool;
        let mut slots = table
            .iter()
            .map(|v| {
                Ok(LocalSlot {
                    name: pool.utf8(v.name_index)?,
                    desc: pool.utf8(v.descriptor_index)?,
                    index: v.index,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        slots.extend(unnamed.iter().map(|(slot, desc)| LocalSlot {
            name: "",
            desc,
            index: *slot,
        }));
        let renames = naming.rename(&slots);
        if renames.iter().all(Option::is_none) {
            return Ok(());
        }

        let mut by_range: HashMap<(u16, u16, u16), u16> = HashMap::new();
        for (var, rename) in table.iter_mut().zip(&renames) {
            if let Some(name) = rename {
                var.name_index = self.pool.utf8_index(name)?;
                by_range.insert((var.start_pc, var.length, var.index), var.name_index);
            }
        }

        let length = u16::try_from(code.code.len()).map_err(|_| ClassFormatError::TooLarge("method code"))?;
        for ((slot, desc), rename) in unnamed.iter().zip(&renames[table.len()..]) {
            let Some(name) = rename else {
                continue;
            };
            let var = LocalVariable {
                start_pc: 0,
                length,
                name_index: self.pool.utf8_index(name)?,
                descriptor_index: self.pool.utf8_index(desc)?,
                index: *slot,
            };
            table.push(var);
        }

        let data = classfile::write_local_variables(&table)?;
        match lvt_pos {
            Some(pos) => code.attributes[pos].data = data,
            None => code.attributes.push(Attribute {
                name_index: self.pool.utf8_index("LocalVariableTable")?,
                data,
            }),
        }

        if let Some(pos) = lvtt_pos {
            let mut types: Vec<LocalVariable> =
                classfile::parse_local_variables(&code.attributes[pos].data)?;
            for var in &mut types {
                if let Some(name_index) = by_range.get(&(var.start_pc, var.length, var.index)) {
                    var.name_index = *name_index;
                }
            }
            code.attributes[pos].data = classfile::write_local_variables(&types)?;
        }
        Ok(())
    }

    fn rewrite_inner_classes(&mut self, attr: &mut Attribute) -> Result<()> {
        let mut cur = Cursor::new(&attr.data);
        let mut out = attr.data.clone();
        let count = cur.u16()?;
        for _ in 0..count {
            let inner_info = cur.u16()?;
            let outer_info = cur.u16()?;
            let name_at = cur.pos;
            let inner_name = cur.u16()?;
            let access_at = cur.pos;
            let access = cur.u16()?;

            let inner = self.original.class_name(inner_info)?;
            if self.remapper.widens_class(inner) {
                let widened = AccessFlags::from_bits(access).with_visibility(Visibility::Public);
                patch_u16(&mut out, access_at, widened.bits());
            }
            if inner_name == 0 {
                continue;
            }
            let Some(mapped_inner) = self.remapper.map_class(inner) else {
                continue;
            };
            let mapped_outer = if outer_info != 0 {
                let outer = self.original.class_name(outer_info)?;
                Some(self.remapper.map_class(outer).unwrap_or_else(|| outer.to_string()))
            } else {
                None
            };
            let simple = inner_simple_name(&mapped_inner, mapped_outer.as_deref());
            if simple != self.original.utf8(inner_name)? {
                let idx = self.pool.utf8_index(simple)?;
                patch_u16(&mut out, name_at, idx);
            }
        }
        attr.data = out;
        Ok(())
    }

    fn rewrite_enclosing_method(&mut self, attr: &mut Attribute) -> Result<()> {
        let mut cur = Cursor::new(&attr.data);
        let class = cur.u16()?;
        let method_at = cur.pos;
        let method = cur.u16()?;
        if method == 0 {
            return Ok(());
        }
        let owner = self.original.class_name(class)?;
        let (name, desc) = self.original.name_and_type(method)?;
        let mapped_name = self.remapper.map_method_name(owner, name, desc);
        let mapped_desc = self.remapper.map_desc(desc);
        if mapped_name.is_some() || mapped_desc != desc {
            let idx = self
                .pool
                .name_and_type_index(mapped_name.as_deref().unwrap_or(name), &mapped_desc)?;
            patch_u16(&mut attr.data, method_at, idx);
        }
        Ok(())
    }

    fn rewrite_record(&mut self, attr: &mut Attribute) -> Result<()> {
        let mut cur = Cursor::new(&attr.data);
        let count = cur.u16()?;
        let mut out = Vec::with_capacity(attr.data.len());
        classfile::put_u16(&mut out, count);
        for _ in 0..count {
            let name_index = cur.u16()?;
            let desc_index = cur.u16()?;
            let name = self.original.utf8(name_index)?;
            let desc = self.original.utf8(desc_index)?;
            let name_index = match self.remapper.map_field_name(self.this, name, desc) {
                Some(mapped) => self.pool.utf8_index(&mapped)?,
                None => name_index,
            };
            let desc_index = self.utf8_mapped(desc_index, |r, d| r.map_desc(d))?;
            classfile::put_u16(&mut out, name_index);
            classfile::put_u16(&mut out, desc_index);

            let attr_count = cur.u16()?;
            let mut attributes = Vec::with_capacity(attr_count as usize);
            for _ in 0..attr_count {
                let name_index = cur.u16()?;
                let len = cur.u32()? as usize;
                attributes.push(Attribute {
                    name_index,
                    data: cur.bytes(len)?.to_vec(),
                });
            }
            self.rewrite_attributes(&mut attributes)?;
            classfile::put_len16(&mut out, attributes.len(), "record component attributes")?;
            for a in &attributes {
                classfile::put_u16(&mut out, a.name_index);
                classfile::put_u32(
                    &mut out,
                    u32::try_from(a.data.len()).map_err(|_| ClassFormatError::TooLarge("attribute"))?,
                );
                out.extend_from_slice(&a.data);
            }
        }
        attr.data = out;
        Ok(())
    }

    fn rebuild_source_file(&mut self, attributes: &mut [Attribute], class_name: &str) -> Result<()> {
        let original = self.original;
        let Some(attr) = attributes
            .iter_mut()
            .find(|a| a.name(original).is_ok_and(|n| n == "SourceFile"))
        else {
            return Ok(());
        };
        let current = original.utf8(read_index(&attr.data)?)?;
        let extension = current.rsplit_once('.').map_or("java", |(_, ext)| ext);
        let simple = class_name.rsplit('/').next().unwrap_or(class_name);
        let outer = simple.split('$').next().filter(|s| !s.is_empty()).unwrap_or(simple);
        let idx = self.pool.utf8_index(&format!("{outer}.{extension}"))?;
        attr.data = idx.to_be_bytes().to_vec();
        Ok(())
    }

    fn annotation(&mut self, cur: &mut Cursor<'_>, out: &mut [u8]) -> Result<()> {
        let type_at = cur.pos;
        let type_index = cur.u16()?;
        let type_desc = self.original.utf8(type_index)?;
        let mapped = self.utf8_mapped(type_index, |r, d| r.map_desc(d))?;
        patch_u16(out, type_at, mapped);

        let pairs = cur.u16()?;
        for _ in 0..pairs {
            let name_at = cur.pos;
            let name_index = cur.u16()?;
            let name = self.original.utf8(name_index)?;
            if let Some(mapped) = self.remapper.map_annotation_element(type_desc, name) {
                let idx = self.pool.utf8_index(&mapped)?;
                patch_u16(out, name_at, idx);
            }
            self.element_value(cur, out)?;
        }
        Ok(())
    }

    fn element_value(&mut self, cur: &mut Cursor<'_>, out: &mut [u8]) -> Result<()> {
        match cur.u8()? {
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => {
                cur.u16()?;
            }
            b'e' => {
                let type_at = cur.pos;
                let type_index = cur.u16()?;
                let name_at = cur.pos;
                let name_index = cur.u16()?;
                let enum_desc = self.original.utf8(type_index)?;
                let constant = self.original.utf8(name_index)?;
                if let Some(owner) = enum_desc.strip_prefix('L').and_then(|d| d.strip_suffix(';'))
                    && let Some(mapped) = self.remapper.map_field_name(owner, constant, enum_desc)
                {
                    let idx = self.pool.utf8_index(&mapped)?;
                    patch_u16(out, name_at, idx);
                }
                let idx = self.utf8_mapped(type_index, |r, d| r.map_desc(d))?;
                patch_u16(out, type_at, idx);
            }
            b'c' => {
                let at = cur.pos;
                let index = cur.u16()?;
                let idx = self.utf8_mapped(index, |r, d| r.map_desc(d))?;
                patch_u16(out, at, idx);
            }
            b'@' => self.annotation(cur, out)?,
            b'[' => {
                let count = cur.u16()?;
                for _ in 0..count {
                    self.element_value(cur, out)?;
                }
            }
            _ => return Err(ClassFormatError::Truncated(cur.pos)),
        }
        Ok(())
    }
}

/// Simple name recorded for an inner class after renaming.
fn inner_simple_name<'a>(mapped_inner: &'a str, mapped_outer: Option<&str>) -> &'a str {
    if let Some(outer) = mapped_outer
        && let Some(rest) = mapped_inner.strip_prefix(outer)
        && let Some(simple) = rest.strip_prefix('$')
    {
        return simple;
    }
    let simple = mapped_inner.rsplit('/').next().unwrap_or(mapped_inner);
    simple.rsplit('$').next().unwrap_or(simple)
}

fn skip_type_annotation_target(cur: &mut Cursor<'_>) -> Result<()> {
    let target_type = cur.u8()?;
    let len = match target_type {
        0x00 | 0x01 | 0x16 => 1,
        0x10 | 0x17 | 0x42 | 0x43..=0x46 => 2,
        0x11 | 0x12 => 2,
        0x13..=0x15 => 0,
        0x47..=0x4b => 3,
        0x40 | 0x41 => {
            let entries = cur.u16()? as usize;
            entries * 6
        }
        _ => return Err(ClassFormatError::Truncated(cur.pos)),
    };
    cur.bytes(len)?;
    let path_len = cur.u8()? as usize;
    cur.bytes(path_len * 2)?;
    Ok(())
}

fn read_index(data: &[u8]) -> Result<u16> {
    match data {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ClassFormatError::Truncated(data.len())),
    }
}

fn patch_u16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
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
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        classes: HashMap<String, String>,
        members: HashMap<(String, String), String>,
    }

    impl Fixed {
        fn member(&self, owner: &str, name: &str) -> Option<String> {
            self.members
                .get(&(owner.to_string(), name.to_string()))
                .cloned()
        }
    }

    impl Remapper for Fixed {
        fn map_class(&self, name: &str) -> Option<String> {
            self.classes.get(name).cloned()
        }

        fn map_field_name(&self, owner: &str, name: &str, _desc: &str) -> Option<String> {
            self.member(owner, name)
        }

        fn map_method_name(&self, owner: &str, name: &str, _desc: &str) -> Option<String> {
            self.member(owner, name)
        }

        fn widens_member(&self, _owner: &str, is_field: bool, name: &str, _desc: &str) -> bool {
            is_field && name == "hidden"
        }
    }

    fn remapper() -> Fixed {
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect::<Vec<_>>()
        };
        Fixed {
            classes: pairs(&[("a", "pkg/Widget"), ("b", "pkg/Gadget")])
                .into_iter()
                .collect(),
            members: [
                (("a", "f"), "size"),
                (("a", "m"), "resize"),
                (("b", "g"), "build"),
                (("java/util/function/Supplier", "get"), "supply"),
            ]
            .into_iter()
            .map(|((owner, name), target)| {
                ((owner.to_string(), name.to_string()), target.to_string())
            })
            .collect(),
        }
    }

    fn code(bytes: Vec<u8>, attributes: Vec<Attribute>) -> CodeAttribute {
        CodeAttribute {
            max_stack: 2,
            max_locals: 4,
            code: bytes,
            exception_table: Vec::new(),
            attributes,
        }
    }

    #[test]
    fn rewrites_header_members_and_references() -> anyhow::Result<()> {
        let mut class = ClassFile::new("a", Some("b"), AccessFlags::PUBLIC)?;
        class.add_field(AccessFlags::from_bits(0x0002), "f", "Lb;")?;
        class.add_field(AccessFlags::default(), "hidden", "I")?;
        let call = class
            .constant_pool
            .member_ref_index(RefKind::Method, "b", "g", "(La;)Lb;")?;
        let [hi, lo] = call.to_be_bytes();
        class.add_method(
            AccessFlags::PUBLIC,
            "m",
            "(Lb;)V",
            Some(code(vec![0x2a, 0x2a, 0xb6, hi, lo, 0x57, 0xb1], Vec::new())),
        )?;
        let sig = class.new_utf8_attribute("Signature", "Lb<La;>;")?;
        class.attributes.push(sig);
        let original_call_nat = match class.constant_pool.get(call) {
            Some(Constant::MethodRef { name_and_type, .. }) => *name_and_type,
            _ => unreachable!(),
        };

        rewrite_class(&mut class, &remapper(), &RewriteSettings::default())?;
        let bytes = class.to_bytes()?;
        let class = ClassFile::parse(&bytes)?;
        let pool = &class.constant_pool;

        assert_eq!(class.name()?, "pkg/Widget");
        assert_eq!(class.super_name()?, Some("pkg/Gadget"));
        assert_eq!(class.fields[0].name(pool)?, "size");
        assert_eq!(class.fields[0].descriptor(pool)?, "Lpkg/Gadget;");
        assert!(class.fields[1].access.is_public());
        assert_eq!(class.methods[0].name(pool)?, "resize");
        assert_eq!(class.methods[0].descriptor(pool)?, "(Lpkg/Gadget;)V");
        assert_eq!(class.signature()?, Some("Lpkg/Gadget<Lpkg/Widget;>;"));

        // The instruction operand still points at the same slot.
        let member = pool.member_ref(call)?;
        assert_eq!(member.owner, "pkg/Gadget");
        assert_eq!(member.name, "build");
        assert_eq!(member.desc, "(Lpkg/Widget;)Lpkg/Gadget;");
        // Original entries are untouched and still readable.
        assert_eq!(pool.name_and_type(original_call_nat)?, ("g", "(La;)Lb;"));
        Ok(())
    }

    #[test]
    fn lambda_call_sites_use_the_interface_method_name() -> anyhow::Result<()> {
        let mut class = ClassFile::new("a", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
        let factory = class.constant_pool.member_ref_index(
            RefKind::Method,
            LAMBDA_METAFACTORY,
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        )?;
        let handle = class.constant_pool.push(Constant::MethodHandle {
            kind: 6,
            reference: factory,
        })?;
        let sam = class.constant_pool.utf8_index("()Ljava/lang/Object;")?;
        let sam_type = class.constant_pool.push(Constant::MethodType { descriptor: sam })?;
        let mut bsm = Vec::new();
        for v in [1u16, handle, 1, sam_type] {
            bsm.extend_from_slice(&v.to_be_bytes());
        }
        let attr = class.new_attribute("BootstrapMethods", bsm)?;
        class.attributes.push(attr);
        let nat = class
            .constant_pool
            .name_and_type_index("get", "(La;)Ljava/util/function/Supplier;")?;
        let indy = class.constant_pool.push(Constant::InvokeDynamic {
            bootstrap: 0,
            name_and_type: nat,
        })?;

        rewrite_class(&mut class, &remapper(), &RewriteSettings::default())?;
        let pool = &class.constant_pool;
        let Some(Constant::InvokeDynamic { name_and_type, .. }) = pool.get(indy) else {
            panic!("call site moved");
        };
        assert_eq!(
            pool.name_and_type(*name_and_type)?,
            ("supply", "(Lpkg/Widget;)Ljava/util/function/Supplier;")
        );
        Ok(())
    }

    #[test]
    fn frames_are_dropped_and_locals_renamed() -> anyhow::Result<()> {
        let mut class = ClassFile::new("c", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
        let frames = class.new_attribute("StackMapTable", vec![0, 0])?;
        let this_name = class.constant_pool.utf8_index("this")?;
        let this_desc = class.constant_pool.utf8_index("Lc;")?;
        let bad_name = class.constant_pool.utf8_index("$$0")?;
        let int_desc = class.constant_pool.utf8_index("I")?;
        let lvt = classfile::write_local_variables(&[
            LocalVariable {
                start_pc: 0,
                length: 2,
                name_index: this_name,
                descriptor_index: this_desc,
                index: 0,
            },
            LocalVariable {
                start_pc: 0,
                length: 2,
                name_index: bad_name,
                descriptor_index: int_desc,
                index: 1,
            },
        ])?;
        let lvt = class.new_attribute("LocalVariableTable", lvt)?;
        class.add_method(AccessFlags::PUBLIC, "run", "(I)V", Some(code(vec![0x00, 0xb1], vec![frames, lvt])))?;

        let settings = RewriteSettings {
            remove_frames: true,
            rebuild_source_filenames: false,
            locals: Some(LocalNaming {
                pattern: Some(regex::Regex::new(r"^\$\$\d+$")?),
                infer_from_same_index: false,
            }),
        };
        rewrite_class(&mut class, &remapper(), &settings)?;

        let pool = &class.constant_pool;
        let code = class.methods[0].code(pool)?.unwrap();
        let names: Vec<_> = code
            .attributes
            .iter()
            .map(|a| a.name(pool).map(str::to_string))
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(names, vec!["LocalVariableTable".to_string()]);
        let vars = classfile::parse_local_variables(&code.attributes[0].data)?;
        assert_eq!(pool.utf8(vars[0].name_index)?, "this");
        assert_eq!(pool.utf8(vars[1].name_index)?, "i1");
        Ok(())
    }

    fn local_table(class: &ClassFile, method: usize) -> anyhow::Result<Vec<(String, String, u16, u16, u16)>> {
        let pool = &class.constant_pool;
        let code = class.methods[method].code(pool)?.unwrap();
        let lvt = code
            .attributes
            .iter()
            .find(|a| a.name(pool).is_ok_and(|n| n == "LocalVariableTable"))
            .unwrap();
        classfile::parse_local_variables(&lvt.data)?
            .iter()
            .map(|v| {
                Ok((
                    pool.utf8(v.name_index)?.to_string(),
                    pool.utf8(v.descriptor_index)?.to_string(),
                    v.index,
                    v.start_pc,
                    v.length,
                ))
            })
            .collect()
    }

    #[test]
    fn parameters_without_entries_are_named() -> anyhow::Result<()> {
        let mut class = ClassFile::new("c", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
        class.add_method(AccessFlags::from_bits(0x0009), "make", "(IJLa;)V", Some(code(vec![0xb1], Vec::new())))?;

        let this_name = class.constant_pool.utf8_index("this")?;
        let this_desc = class.constant_pool.utf8_index("Lc;")?;
        let count = class.constant_pool.utf8_index("count")?;
        let int_desc = class.constant_pool.utf8_index("I")?;
        let lvt = classfile::write_local_variables(&[
            LocalVariable {
                start_pc: 0,
                length: 2,
                name_index: this_name,
                descriptor_index: this_desc,
                index: 0,
            },
            LocalVariable {
                start_pc: 1,
                length: 1,
                name_index: count,
                descriptor_index: int_desc,
                index: 1,
            },
        ])?;
        let lvt = class.new_attribute("LocalVariableTable", lvt)?;
        class.add_method(AccessFlags::PUBLIC, "run", "(I)V", Some(code(vec![0x00, 0xb1], vec![lvt])))?;
        class.add_method(AccessFlags::PUBLIC, "idle", "()V", Some(code(vec![0xb1], Vec::new())))?;

        let settings = |infer| RewriteSettings {
            locals: Some(LocalNaming {
                pattern: None,
                infer_from_same_index: infer,
            }),
            ..RewriteSettings::default()
        };
        let mut plain = class.clone();
        rewrite_class(&mut plain, &remapper(), &settings(false))?;
        let entry = |name: &str, desc: &str, index: u16, start: u16, length: u16| {
            (name.to_string(), desc.to_string(), index, start, length)
        };
        assert_eq!(
            local_table(&plain, 0)?,
            vec![
                entry("i0", "I", 0, 0, 1),
                entry("l1", "J", 1, 0, 1),
                entry("widget3", "Lpkg/Widget;", 3, 0, 1),
            ]
        );
        assert_eq!(local_table(&plain, 1)?[2], entry("i1", "I", 1, 0, 2));
        let pool = &plain.constant_pool;
        assert_eq!(plain.methods[2].code(pool)?.unwrap().attributes.len(), 0);

        let mut inferred = class;
        rewrite_class(&mut inferred, &remapper(), &settings(true))?;
        let names: Vec<String> = local_table(&inferred, 1)?.into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["this", "count", "count"]);
        Ok(())
    }

    #[test]
    fn inner_class_names_and_source_file_follow_renames() -> anyhow::Result<()> {
        let mut class = ClassFile::new("a$1", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
        let inner = class.constant_pool.class_index("a$1")?;
        let outer = class.constant_pool.class_index("a")?;
        let simple = class.constant_pool.utf8_index("1")?;
        let mut data = Vec::new();
        for v in [1u16, inner, outer, simple, 0x0008] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let attr = class.new_attribute("InnerClasses", data)?;
        class.attributes.push(attr);
        let source = class.new_utf8_attribute("SourceFile", "SourceFile.java")?;
        class.attributes.push(source);

        let mut remapper = remapper();
        remapper
            .classes
            .insert("a$1".to_string(), "pkg/Widget$Listener".to_string());
        let settings = RewriteSettings {
            rebuild_source_filenames: true,
            ..RewriteSettings::default()
        };
        rewrite_class(&mut class, &remapper, &settings)?;

        assert_eq!(class.name()?, "pkg/Widget$Listener");
        assert_eq!(class.source_file()?, Some("Widget.java"));
        let attr = class.attribute("InnerClasses").unwrap();
        let name_index = u16::from_be_bytes([attr.data[6], attr.data[7]]);
        assert_eq!(class.constant_pool.utf8(name_index)?, "Listener");
        Ok(())
    }

    #[test]
    fn annotations_rewrite_types_enums_and_class_literals() -> anyhow::Result<()> {
        let mut class = ClassFile::new("x", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
        let pool = &mut class.constant_pool;
        let ann_type = pool.utf8_index("La;")?;
        let elem = pool.utf8_index("value")?;
        let enum_type = pool.utf8_index("Lb;")?;
        let enum_const = pool.utf8_index("g")?;
        let elem2 = pool.utf8_index("type")?;
        let class_lit = pool.utf8_index("[Lb;")?;
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&ann_type.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&elem.to_be_bytes());
        data.push(b'e');
        data.extend_from_slice(&enum_type.to_be_bytes());
        data.extend_from_slice(&enum_const.to_be_bytes());
        data.extend_from_slice(&elem2.to_be_bytes());
        data.push(b'c');
        data.extend_from_slice(&class_lit.to_be_bytes());
        let attr = class.new_attribute("RuntimeVisibleAnnotations", data)?;
        class.attributes.push(attr);

        rewrite_class(&mut class, &remapper(), &RewriteSettings::default())?;
        let pool = &class.constant_pool;
        let data = &class.attribute("RuntimeVisibleAnnotations").unwrap().data;
        let at = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        assert_eq!(pool.utf8(at(2))?, "Lpkg/Widget;");
        assert_eq!(pool.utf8(at(6))?, "value");
        assert_eq!(pool.utf8(at(9))?, "Lpkg/Gadget;");
        assert_eq!(pool.utf8(at(11))?, "build");
        assert_eq!(pool.utf8(at(16))?, "[Lpkg/Gadget;");
        Ok(())
    }

    #[test]
    fn inner_simple_name_falls_back_to_last_segment() {
        assert_eq!(inner_simple_name("p/Outer$In", Some("p/Outer")), "In");
        assert_eq!(inner_simple_name("p/Other$X", Some("p/Outer")), "X");
        assert_eq!(inner_simple_name("p/Top", None), "Top");
    }
}
