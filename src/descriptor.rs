//! Descriptor and generic signature handling.
//!
//! Every rewrite here is driven by a class-name mapping function returning
//! `None` for names that stay unchanged. Malformed signatures are returned
//! untouched rather than rejected; the JVM ignores them at link time.

/// Length in bytes of the field type starting at the front of `s`.
pub fn field_type_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(i + 1),
        b'L' => s[i..].find(';').map(|end| i + end + 1),
        _ => None,
    }
}

/// Splits a method descriptor into its parameter types and return type.
pub fn parse_method_descriptor(desc: &str) -> Option<(Vec<&str>, &str)> {
    let rest = desc.strip_prefix('(')?;
    let close = rest.find(')')?;
    let mut params_src = &rest[..close];
    let ret = &rest[close + 1..];

    let mut params = Vec::new();
    while !params_src.is_empty() {
        let len = field_type_len(params_src)?;
        params.push(&params_src[..len]);
        params_src = &params_src[len..];
    }

    if ret != "V" && field_type_len(ret) != Some(ret.len()) {
        return None;
    }
    Some((params, ret))
}

pub fn is_reference_type(ty: &str) -> bool {
    ty.starts_with('L') || ty.starts_with('[')
}

/// Number of local variable slots a value of this type occupies.
pub fn slot_size(ty: &str) -> u16 {
    if ty == "J" || ty == "D" { 2 } else { 1 }
}

/// Whether `target` could be the erased implementation a bridge with
/// descriptor `bridge` forwards to: same arity, identical primitives, and
/// reference types only where the bridge has reference types.
pub fn is_erasure_compatible(bridge: &str, target: &str) -> bool {
    let (Some((bridge_params, bridge_ret)), Some((target_params, target_ret))) =
        (parse_method_descriptor(bridge), parse_method_descriptor(target))
    else {
        return false;
    };

    bridge_params.len() == target_params.len()
        && bridge_params
            .iter()
            .zip(&target_params)
            .all(|(b, t)| types_compatible(b, t))
        && types_compatible(bridge_ret, target_ret)
}

fn types_compatible(bridge: &str, target: &str) -> bool {
    bridge == target || (is_reference_type(bridge) && is_reference_type(target))
}

/// Rewrites every `L...;` class token of a field or method descriptor.
pub fn remap_descriptor<F>(desc: &str, map: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(desc.len());
    let mut rest = desc;

    while let Some(start) = rest.find('L') {
        out.push_str(&rest[..=start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find(';') else {
            out.push_str(after);
            return out;
        };
        let name = &after[..end];
        match map(name) {
            Some(mapped) => out.push_str(&mapped),
            None => out.push_str(name),
        }
        out.push(';');
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Maps the name stored in a `CONSTANT_Class` entry, which is either an
/// internal class name or an array descriptor.
pub fn remap_class_reference<F>(name: &str, map: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if name.starts_with('[') {
        let mapped = remap_descriptor(name, map);
        (mapped != name).then_some(mapped)
    } else {
        map(name)
    }
}

/// Rewrites a class, field or method generic signature, keeping type
/// parameters, bounds, wildcards and inner-class suffixes intact.
pub fn remap_signature<F>(signature: &str, map: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut writer = SignatureWriter {
        src: signature,
        pos: 0,
        out: String::with_capacity(signature.len()),
        map,
    };
    match writer.signature() {
        Some(()) if writer.pos == signature.len() => writer.out,
        _ => {
            tracing::debug!("leaving malformed signature untouched: {signature}");
            signature.to_string()
        }
    }
}

struct SignatureWriter<'a, F> {
    src: &'a str,
    pos: usize,
    out: String,
    map: &'a F,
}

impl<F> SignatureWriter<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn copy_byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.out.push(b as char);
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, expected: u8) -> Option<()> {
        (self.copy_byte()? == expected).then_some(())
    }

    fn take_until(&mut self, stops: &[u8]) -> Option<&str> {
        let start = self.pos;
        let len = self.src.as_bytes()[start..]
            .iter()
            .position(|b| stops.contains(b))?;
        self.pos += len;
        Some(&self.src[start..start + len])
    }

    fn signature(&mut self) -> Option<()> {
        if self.peek() == Some(b'<') {
            self.formal_type_parameters()?;
        }

        if self.peek() == Some(b'(') {
            self.copy_byte();
            while self.peek()? != b')' {
                self.type_signature()?;
            }
            self.copy_byte();
            self.type_signature()?;
            while self.peek() == Some(b'^') {
                self.copy_byte();
                self.type_signature()?;
            }
        } else {
            while self.peek().is_some() {
                self.type_signature()?;
            }
        }
        Some(())
    }

    fn formal_type_parameters(&mut self) -> Option<()> {
        self.expect(b'<')?;
        while self.peek()? != b'>' {
            let ident = self.take_until(b":")?.to_string();
            self.out.push_str(&ident);
            while self.peek() == Some(b':') {
                self.copy_byte();
                if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                    self.type_signature()?;
                }
            }
        }
        self.expect(b'>')
    }

    fn type_signature(&mut self) -> Option<()> {
        match self.peek()? {
            b'L' => self.class_type_signature(),
            b'T' => {
                let var = self.take_until(b";")?.to_string();
                self.out.push_str(&var);
                self.expect(b';')
            }
            b'[' => {
                self.copy_byte();
                self.type_signature()
            }
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V' => {
                self.copy_byte();
                Some(())
            }
            _ => None,
        }
    }

    fn class_type_signature(&mut self) -> Option<()> {
        self.expect(b'L')?;
        let mut original = self.take_until(b"<.;")?.to_string();
        let mut mapped = (self.map)(&original).unwrap_or_else(|| original.clone());
        self.out.push_str(&mapped);

        loop {
            match self.peek()? {
                b'<' => self.type_arguments()?,
                b'.' => {
                    self.copy_byte();
                    let simple = self.take_until(b"<.;")?.to_string();
                    let inner_original = format!("{original}${simple}");
                    let inner_mapped = (self.map)(&inner_original)
                        .unwrap_or_else(|| format!("{mapped}${simple}"));
                    let inner_simple = inner_mapped
                        .strip_prefix(&format!("{mapped}$"))
                        .or_else(|| inner_mapped.rsplit('$').next())
                        .unwrap_or(&simple)
                        .to_string();
                    self.out.push_str(&inner_simple);
                    original = inner_original;
                    mapped = inner_mapped;
                }
                b';' => {
                    self.copy_byte();
                    return Some(());
                }
                _ => return None,
            }
        }
    }

    fn type_arguments(&mut self) -> Option<()> {
        self.expect(b'<')?;
        while self.peek()? != b'>' {
            match self.peek()? {
                b'*' => {
                    self.copy_byte();
                }
                b'+' | b'-' => {
                    self.copy_byte();
                    self.type_signature()?;
                }
                _ => self.type_signature()?,
            }
        }
        self.expect(b'>')
    }
}
