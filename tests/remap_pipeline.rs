use jar_remapper::access::AccessFlags;
use jar_remapper::applier::OutputClass;
use jar_remapper::classfile::{self, ClassFile, CodeAttribute, LocalVariable, RefKind};
use jar_remapper::config::{BridgePropagation, RemapOptions, Threads};
use jar_remapper::input::ClassSource;
use jar_remapper::mapping::{MappingTable, Mappings};
use jar_remapper::pipeline::{self, Phase, RunOutput};
use jar_remapper::{PipelineFailure, RemapError};
use std::num::NonZeroUsize;

const PUBLIC: u16 = 0x0001;
const PUBLIC_BRIDGE: u16 = 0x1041;

fn mappings(rows: &str) -> anyhow::Result<Mappings> {
    Ok(MappingTable::parse(&format!("v1\tofficial\tnamed\n{rows}"))?.between("official", "named", false)?)
}

fn source(class: &ClassFile) -> anyhow::Result<ClassSource> {
    Ok(ClassSource {
        name: class.name()?.to_string(),
        location: "input.jar".to_string(),
        bytes: class.to_bytes()?,
    })
}

fn body(code: Vec<u8>, attributes: Vec<classfile::Attribute>) -> CodeAttribute {
    CodeAttribute {
        max_stack: 2,
        max_locals: 2,
        code,
        exception_table: Vec::new(),
        attributes,
    }
}

fn class_with_methods(name: &str, super_name: &str, methods: &[&str]) -> anyhow::Result<ClassFile> {
    let mut class = ClassFile::new(name, Some(super_name), AccessFlags::PUBLIC)?;
    for method in methods {
        let (name, desc) = method.split_at(method.find('(').unwrap_or(method.len()));
        class.add_method(AccessFlags::PUBLIC, name, desc, Some(body(vec![0xb1], Vec::new())))?;
    }
    Ok(class)
}

fn run(sources: Vec<ClassSource>, rows: &str, options: &RemapOptions) -> anyhow::Result<Result<RunOutput, PipelineFailure>> {
    Ok(pipeline::run(sources, Vec::new(), mappings(rows)?, options))
}

fn output(result: Result<RunOutput, PipelineFailure>) -> anyhow::Result<RunOutput> {
    result.map_err(|failure| anyhow::anyhow!("{failure}"))
}

fn parsed(classes: &[OutputClass], name: &str) -> anyhow::Result<ClassFile> {
    let class = classes
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| anyhow::anyhow!("no output class {name}"))?;
    Ok(ClassFile::parse(&class.bytes)?)
}

fn method_names(class: &ClassFile) -> anyhow::Result<Vec<String>> {
    class
        .methods
        .iter()
        .map(|m| Ok(format!("{}{}", m.name(&class.constant_pool)?, m.descriptor(&class.constant_pool)?)))
        .collect()
}

/// A class whose `get()Ljava/lang/Object;` bridge forwards to `get()Ljava/lang/String;`.
fn class_with_bridge(name: &str) -> anyhow::Result<ClassFile> {
    let mut class = ClassFile::new(name, Some("java/lang/Object"), AccessFlags::PUBLIC)?;
    class.add_method(AccessFlags::PUBLIC, "get", "()Ljava/lang/String;", Some(body(vec![0x01, 0xb0], Vec::new())))?;
    let target = class
        .constant_pool
        .member_ref_index(RefKind::Method, name, "get", "()Ljava/lang/String;")?;
    let [hi, lo] = target.to_be_bytes();
    class.add_method(
        AccessFlags::from_bits(PUBLIC_BRIDGE),
        "get",
        "()Ljava/lang/Object;",
        Some(body(vec![0x2a, 0xb6, hi, lo, 0xb0], Vec::new())),
    )?;
    Ok(class)
}

fn threads(n: usize) -> Threads {
    NonZeroUsize::new(n).map_or(Threads::Auto, Threads::Count)
}

#[test]
fn output_is_identical_for_one_and_many_threads() -> anyhow::Result<()> {
    let mut sources = Vec::new();
    let mut rows = String::new();
    for i in 0..48 {
        let name = format!("a/C{i}");
        let parent = if i == 0 { "java/lang/Object".to_string() } else { format!("a/C{}", i / 2) };
        let mut class = class_with_methods(&name, &parent, &["run()V", "size()I"])?;
        class.add_field(AccessFlags::PUBLIC, "next", &format!("La/C{};", (i + 1) % 48))?;
        let call = class
            .constant_pool
            .member_ref_index(RefKind::Method, &parent, "run", "()V")?;
        let [hi, lo] = call.to_be_bytes();
        class.add_method(AccessFlags::PUBLIC, "tick", "()V", Some(body(vec![0x2a, 0xb6, hi, lo, 0xb1], Vec::new())))?;
        sources.push(source(&class)?);
        rows.push_str(&format!("CLASS\ta/C{i}\tnamed/Type{i}\n"));
        rows.push_str(&format!("FIELD\ta/C{i}\tLa/C{};\tnext\tlink{i}\n", (i + 1) % 48));
    }
    rows.push_str("METHOD\ta/C0\t()V\trun\texecute\n");

    let single = RemapOptions {
        threads: threads(1),
        ..RemapOptions::default()
    };
    let many = RemapOptions {
        threads: threads(6),
        ..RemapOptions::default()
    };
    let first = output(run(sources.clone(), &rows, &single)?)?;
    let second = output(run(sources, &rows, &many)?)?;
    assert_eq!(first.classes, second.classes);
    assert_eq!(first.classes.len(), 48);

    let deep = parsed(&first.classes, "named/Type47")?;
    assert!(method_names(&deep)?.contains(&"execute()V".to_string()));
    Ok(())
}

#[test]
fn descriptors_round_trip_through_the_reverse_mapping() -> anyhow::Result<()> {
    let table = MappingTable::parse(
        "v1\tofficial\tnamed\nCLASS\ta\tpkg/Alpha\nCLASS\tb\tpkg/Beta\nCLASS\ta$c\tpkg/Alpha$Inner\n",
    )?;
    let forward = table.between("official", "named", false)?;
    let backward = table.between("named", "official", false)?;
    assert_eq!(
        forward.remap_descriptor("(La;[Lb;IJ)La$c;"),
        "(Lpkg/Alpha;[Lpkg/Beta;IJ)Lpkg/Alpha$Inner;"
    );
    for desc in ["(La;[Lb;IJ)La$c;", "[[La;", "(Ljava/lang/String;Lb;)V", "Z"] {
        let there = forward.remap_descriptor(desc);
        assert_eq!(backward.remap_descriptor(&there), desc);
    }
    Ok(())
}

#[test]
fn overriding_methods_follow_the_renamed_method() -> anyhow::Result<()> {
    let a = class_with_methods("a/A", "java/lang/Object", &["m()V"])?;
    let b = class_with_methods("a/B", "a/A", &["m()V"])?;
    let result = output(run(vec![source(&a)?, source(&b)?], "METHOD\ta/A\t()V\tm\tx\n", &RemapOptions::default())?)?;
    assert_eq!(method_names(&parsed(&result.classes, "a/B")?)?, vec!["x()V"]);
    assert_eq!(method_names(&parsed(&result.classes, "a/A")?)?, vec!["x()V"]);
    Ok(())
}

#[test]
fn bridge_policies() -> anyhow::Result<()> {
    let inputs = || -> anyhow::Result<Vec<ClassSource>> {
        Ok(vec![source(&class_with_bridge("a/X")?)?, source(&class_with_bridge("a/Y")?)?])
    };
    let rows = "METHOD\ta/X\t()Ljava/lang/Object;\tget\tfetch\n";
    let with = |policy| RemapOptions {
        propagate_bridges: policy,
        ..RemapOptions::default()
    };

    let compatible = output(run(inputs()?, rows, &with(BridgePropagation::Compatible))?)?;
    assert_eq!(
        method_names(&parsed(&compatible.classes, "a/Y")?)?,
        vec!["get()Ljava/lang/String;", "get()Ljava/lang/Object;"]
    );
    assert!(method_names(&parsed(&compatible.classes, "a/X")?)?.contains(&"fetch()Ljava/lang/Object;".to_string()));

    let enabled = output(run(inputs()?, rows, &with(BridgePropagation::Enabled))?)?;
    assert_eq!(
        method_names(&parsed(&enabled.classes, "a/Y")?)?,
        vec!["fetch()Ljava/lang/String;", "fetch()Ljava/lang/Object;"]
    );
    Ok(())
}

#[test]
fn colliding_renames_fail_or_are_reverted() -> anyhow::Result<()> {
    let class = class_with_methods("a/C", "java/lang/Object", &["a()V", "b()V"])?;
    let rows = "METHOD\ta/C\t()V\ta\tc\nMETHOD\ta/C\t()V\tb\tc\n";

    let Err(failure) = run(vec![source(&class)?], rows, &RemapOptions::default())? else {
        anyhow::bail!("colliding renames were accepted");
    };
    assert_eq!(failure.phase, Phase::Resolving);
    assert!(matches!(failure.errors.as_slice(), [RemapError::Conflict { owner, .. }] if owner == "a/C"));

    let lenient = RemapOptions {
        ignore_conflicts: true,
        ..RemapOptions::default()
    };
    let result = output(run(vec![source(&class)?], rows, &lenient)?)?;
    let names = method_names(&parsed(&result.classes, "a/C")?)?;
    assert_eq!(names.iter().filter(|n| *n == "c()V").count(), 1);
    assert_eq!(result.warnings.len(), 1);
    Ok(())
}

#[test]
fn missing_superclass_needs_resolve_missing() -> anyhow::Result<()> {
    let class = class_with_methods("a/Child", "lib/Missing", &["run()V"])?;

    let Err(failure) = run(vec![source(&class)?], "", &RemapOptions::default())? else {
        anyhow::bail!("missing superclass was accepted");
    };
    assert!(matches!(
        failure.errors.as_slice(),
        [RemapError::MissingClass { class, referenced_by }] if class == "lib/Missing" && referenced_by == "a/Child"
    ));

    let lenient = RemapOptions {
        resolve_missing: true,
        ..RemapOptions::default()
    };
    let result = output(run(vec![source(&class)?], "", &lenient)?)?;
    assert_eq!(result.classes.len(), 1);
    assert_eq!(result.stats.stub_classes, 1);
    Ok(())
}

#[test]
fn invalid_local_names_are_replaced_only_when_enabled() -> anyhow::Result<()> {
    let mut class = ClassFile::new("a/L", Some("java/lang/Object"), AccessFlags::PUBLIC)?;
    let this_name = class.constant_pool.utf8_index("this")?;
    let this_desc = class.constant_pool.utf8_index("La/L;")?;
    let bad_name = class.constant_pool.utf8_index("$$1")?;
    let int_desc = class.constant_pool.utf8_index("I")?;
    let table = classfile::write_local_variables(&[
        LocalVariable {
            start_pc: 0,
            length: 1,
            name_index: this_name,
            descriptor_index: this_desc,
            index: 0,
        },
        LocalVariable {
            start_pc: 0,
            length: 1,
            name_index: bad_name,
            descriptor_index: int_desc,
            index: 1,
        },
    ])?;
    let lvt = class.new_attribute("LocalVariableTable", table)?;
    class.add_method(AccessFlags::from_bits(PUBLIC), "run", "(I)V", Some(body(vec![0xb1], vec![lvt])))?;

    let local_names = |options: &RemapOptions| -> anyhow::Result<Vec<String>> {
        let result = output(run(vec![source(&class)?], "", options)?)?;
        let out = parsed(&result.classes, "a/L")?;
        let pool = &out.constant_pool;
        let code = out.methods[0]
            .code(pool)?
            .ok_or_else(|| anyhow::anyhow!("code attribute lost"))?;
        let lvt = code
            .attributes
            .iter()
            .find(|a| a.name(pool).is_ok_and(|n| n == "LocalVariableTable"))
            .ok_or_else(|| anyhow::anyhow!("local variable table lost"))?;
        classfile::parse_local_variables(&lvt.data)?
            .iter()
            .map(|v| Ok(pool.utf8(v.name_index)?.to_string()))
            .collect()
    };

    let pattern = regex::Regex::new(r"^\$\$\d+$")?;
    let enabled = RemapOptions {
        rename_invalid_locals: true,
        invalid_lv_name_pattern: Some(pattern.clone()),
        ..RemapOptions::default()
    };
    assert_eq!(local_names(&enabled)?, vec!["this", "i1"]);

    let disabled = RemapOptions {
        invalid_lv_name_pattern: Some(pattern),
        ..RemapOptions::default()
    };
    assert_eq!(local_names(&disabled)?, vec!["this", "$$1"]);
    Ok(())
}

#[test]
fn renames_reach_inputs_through_classpath_supertypes() -> anyhow::Result<()> {
    let mut interface = ClassFile::new("lib/I", Some("java/lang/Object"), AccessFlags::from_bits(0x0601))?;
    interface.add_method(AccessFlags::from_bits(0x0401), "m", "()V", None)?;
    let mut base = class_with_methods("lib/L", "java/lang/Object", &[])?;
    base.add_interface("lib/I")?;
    let unused = class_with_methods("lib/Unused", "java/lang/Object", &["m()V"])?;
    let classpath = [interface, base, unused]
        .iter()
        .map(|class| {
            Ok(ClassSource {
                location: "lib.jar".to_string(),
                ..source(class)?
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let extends = class_with_methods("app/B", "lib/L", &["m()V"])?;
    let mut implements = class_with_methods("app/C", "java/lang/Object", &["m()V"])?;
    implements.add_interface("lib/I")?;

    let result = output(pipeline::run(
        vec![source(&extends)?, source(&implements)?],
        classpath,
        mappings("METHOD\tlib/I\t()V\tm\tx\n")?,
        &RemapOptions::default(),
    ))?;
    assert_eq!(result.classes.len(), 2);
    for name in ["app/B", "app/C"] {
        assert_eq!(method_names(&parsed(&result.classes, name)?)?, vec!["x()V"]);
    }
    assert_eq!(result.stats.input_classes, 2);
    assert_eq!(result.stats.classpath_classes, 2);
    Ok(())
}
