//! Loads a YAML configuration file into a [`calcgraph::Computer`]
//! (spec.md §4.5 `configure`, §6.2's section schema), the Rust equivalent of
//! `genno/config.py:parse_config`.
//!
//! Every recognized section is turned into one or more `(Key, AddSpec)`
//! queue items (or, for `units`/`default`, applied directly) and the whole
//! batch is handed to [`calcgraph::Computer::add_queue`] so sections that
//! reference each other's keys can load in any order (spec.md §4.6).
//! Unknown sections, and the recognized-but-out-of-scope `iamc` section
//! (spec.md §1.1), produce a `log::warn!` and are otherwise ignored.

pub mod error;
mod model;

use std::path::Path;

use calcgraph::{AddSpec, Computer, Key, TaskArg, Value};

pub use error::{ConfigError, Result};
use model::{AggregateSection, AliasSection, CombineSection, FileSection, GeneralSection, RawConfig, ReportSection};

/// Load and apply a configuration file at `path` to `computer`.
pub fn configure(computer: &mut Computer, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    configure_str(computer, &text)
}

/// Load and apply a configuration file already read into memory.
pub fn configure_str(computer: &mut Computer, yaml: &str) -> Result<()> {
    let config: RawConfig = serde_yaml::from_str(yaml)?;

    for name in config.unknown_section_names() {
        log::warn!("configure: unrecognized section '{name}', ignoring");
    }
    if config.extra.contains_key("iamc") {
        log::warn!("configure: 'iamc' section is an external-collaborator adapter, not implemented; ignoring");
    }

    if let Some(units) = &config.units {
        if let Some(defs) = &units.define {
            computer.env_mut().define(defs);
        }
        for (old, new) in &units.replace {
            computer.env_mut().replace(old.clone(), new.clone());
        }
        log::info!("configure: applied 'units' section");
    }

    if let Some(default) = &config.default {
        computer.set_config("default", Value::Str(default.clone()));
        log::info!("configure: applied 'default' section");
    }

    let mut items: Vec<(Key, AddSpec)> = Vec::new();

    if let Some(files) = config.files {
        for f in files.into_vec() {
            items.push(build_file_item(&f)?);
        }
    }
    if let Some(alias) = &config.alias {
        items.extend(build_alias_items(alias)?);
    }
    if let Some(aggregate) = &config.aggregate {
        for a in aggregate {
            items.extend(build_aggregate_items(a)?);
        }
    }
    if let Some(combine) = &config.combine {
        for c in combine {
            items.push(build_combine_item(c)?);
        }
    }
    if let Some(general) = &config.general {
        for g in general {
            items.extend(build_general_items(g)?);
        }
    }
    if let Some(report) = &config.report {
        items.push(build_report_item(report)?);
    }

    if !items.is_empty() {
        computer
            .add_queue(items)
            .map_err(|e| ConfigError::Section {
                name: "files/alias/aggregate/combine/general/report",
                source: Box::new(e),
            })?;
        log::info!("configure: applied queued sections");
    }

    Ok(())
}

fn parse_key(s: &str) -> Result<Key> {
    Key::parse(s).map_err(|e| ConfigError::Section {
        name: "key",
        source: Box::new(e),
    })
}

fn build_file_item(f: &FileSection) -> Result<(Key, AddSpec)> {
    let key = parse_key(&f.key)?;
    let mut opts = std::collections::BTreeMap::new();
    if !f.dims.is_empty() {
        let dims = f
            .dims
            .iter()
            .map(|(old, new)| (old.clone(), Value::Str(new.clone())))
            .collect();
        opts.insert("dims".to_string(), Value::Mapping(dims));
    }
    if let Some(units) = &f.units {
        opts.insert("units".to_string(), Value::Str(units.clone()));
    }
    let args = vec![
        TaskArg::Literal(Value::Str(f.path.clone())),
        TaskArg::Literal(Value::Mapping(opts)),
    ];
    Ok((key, AddSpec::Apply("load_file".into(), args)))
}

fn build_alias_items(alias: &AliasSection) -> Result<Vec<(Key, AddSpec)>> {
    let pairs: Vec<(&str, &str)> = match alias {
        AliasSection::Pair(v) => {
            let [existing, new] = v.as_slice() else {
                return Err(ConfigError::InvalidValue(
                    "alias: pair form expects exactly [existing_key, new_key]".into(),
                ));
            };
            vec![(existing.as_str(), new.as_str())]
        }
        AliasSection::Mapping(m) => m.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
    };
    pairs
        .into_iter()
        .map(|(existing, new)| Ok((parse_key(new)?, AddSpec::Alias(parse_key(existing)?))))
        .collect()
}

fn build_aggregate_items(a: &AggregateSection) -> Result<Vec<(Key, AddSpec)>> {
    let groups: std::collections::BTreeMap<String, Value> = a
        .groups
        .iter()
        .map(|(new_label, olds)| {
            (
                new_label.clone(),
                Value::Sequence(olds.iter().cloned().map(Value::Str).collect()),
            )
        })
        .collect();

    a.quantities
        .iter()
        .map(|q| {
            let source = parse_key(q)?;
            let target = match &a.tag {
                Some(tag) => source.add_tag(tag),
                None => source.clone(),
            };
            let args = vec![
                TaskArg::Ref(source),
                TaskArg::Literal(Value::Str(a.dim.clone())),
                TaskArg::Literal(Value::Mapping(groups.clone())),
            ];
            Ok((target, AddSpec::Apply("aggregate".into(), args)))
        })
        .collect()
}

fn build_combine_item(c: &CombineSection) -> Result<(Key, AddSpec)> {
    let key = parse_key(&c.key)?;
    let mut args = Vec::with_capacity(c.inputs.len() * 3);
    for input in &c.inputs {
        args.push(TaskArg::Ref(parse_key(&input.quantity)?));
        let select = if input.select.is_empty() {
            Value::Scalar(0.0)
        } else {
            let m = input
                .select
                .iter()
                .map(|(dim, labels)| {
                    (
                        dim.clone(),
                        Value::Sequence(labels.iter().cloned().map(|l| Value::Str(l)).collect()),
                    )
                })
                .collect();
            Value::Mapping(m)
        };
        args.push(TaskArg::Literal(select));
        args.push(TaskArg::Literal(Value::Scalar(input.weight.unwrap_or(1.0))));
    }
    Ok((key, AddSpec::Apply("combine".into(), args)))
}

fn build_general_items(g: &GeneralSection) -> Result<Vec<(Key, AddSpec)>> {
    let key = parse_key(&g.key)?;
    let mut args: Vec<TaskArg> = g
        .inputs
        .iter()
        .map(|s| Ok(TaskArg::Ref(parse_key(s)?)))
        .collect::<Result<_>>()?;
    for a in &g.args {
        args.push(TaskArg::Literal(yaml_to_value(a)?));
    }

    let mut items = vec![(key.clone(), AddSpec::Apply(g.comp.clone(), args))];
    if g.sums {
        for (partial, dropped) in key.iter_sums() {
            let sum_args = vec![
                TaskArg::Ref(key.clone()),
                TaskArg::Literal(Value::Sequence(dropped.into_iter().map(Value::Str).collect())),
            ];
            items.push((partial, AddSpec::Apply("sum".into(), sum_args)));
        }
    }
    Ok(items)
}

fn build_report_item(r: &ReportSection) -> Result<(Key, AddSpec)> {
    let key = parse_key(&r.key)?;
    let args = r
        .members
        .iter()
        .map(|m| Ok(TaskArg::Ref(parse_key(m)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok((key, AddSpec::Apply("concat".into(), args)))
}

fn yaml_to_value(v: &serde_yaml::Value) -> Result<Value> {
    match v {
        serde_yaml::Value::Null => Err(ConfigError::InvalidValue("general: null argument not supported".into())),
        serde_yaml::Value::Bool(b) => Ok(Value::Scalar(if *b { 1.0 } else { 0.0 })),
        serde_yaml::Value::Number(n) => n
            .as_f64()
            .map(Value::Scalar)
            .ok_or_else(|| ConfigError::InvalidValue(format!("general: unrepresentable number {n:?}"))),
        serde_yaml::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_yaml::Value::Sequence(seq) => seq.iter().map(yaml_to_value).collect::<Result<_>>().map(Value::Sequence),
        serde_yaml::Value::Mapping(m) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in m {
                let key = k
                    .as_str()
                    .ok_or_else(|| ConfigError::InvalidValue("general: mapping keys must be strings".into()))?
                    .to_string();
                out.insert(key, yaml_to_value(v)?);
            }
            Ok(Value::Mapping(out))
        }
        serde_yaml::Value::Tagged(t) => yaml_to_value(&t.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcgraph::{EnvConfig, Label};

    #[test]
    fn units_section_applies_immediately() {
        let mut c = Computer::new(EnvConfig::default());
        configure_str(&mut c, "units:\n  define: \"smoot = 1.7018 m\"\n").unwrap();
        assert!(c.env().parse("smoot").is_ok());
    }

    #[test]
    fn default_section_is_stored_in_config() {
        let mut c = Computer::new(EnvConfig::default());
        configure_str(&mut c, "default: total\n").unwrap();
        assert_eq!(c.config().get("default").and_then(Value::as_str), Some("total"));
    }

    #[test]
    fn unknown_and_iamc_sections_only_warn() {
        let mut c = Computer::new(EnvConfig::default());
        configure_str(&mut c, "iamc:\n  foo: bar\nbogus_section:\n  x: 1\n").unwrap();
    }

    #[test]
    fn alias_pair_and_mapping_forms_both_resolve() {
        let mut c = Computer::new(EnvConfig::default());
        c.add(Key::bare("raw"), AddSpec::Literal(Value::Scalar(3.0)), true, false).unwrap();
        configure_str(&mut c, "alias: [raw, aliased]\n").unwrap();
        assert_eq!(c.get(&Key::bare("aliased")).unwrap().as_scalar(), Some(3.0));
    }

    #[test]
    fn report_concatenates_members_sharing_a_dim() {
        let mut c = Computer::new(EnvConfig::default());
        let a = calcgraph::Quantity::series("x", vec![Label::from("i")], vec![1.0]).unwrap();
        let b = calcgraph::Quantity::series("x", vec![Label::from("j")], vec![2.0]).unwrap();
        c.add(Key::bare("a"), AddSpec::Literal(Value::Quantity(a)), true, false).unwrap();
        c.add(Key::bare("b"), AddSpec::Literal(Value::Quantity(b)), true, false).unwrap();
        configure_str(&mut c, "report:\n  key: combined\n  members: [a, b]\n").unwrap();
        let out = c.get(&Key::bare("combined")).unwrap();
        let q = out.as_quantity().unwrap();
        assert_eq!(q.get(&[Label::from("i")]), Some(1.0));
        assert_eq!(q.get(&[Label::from("j")]), Some(2.0));
    }

    #[test]
    fn general_section_with_sums_queues_partial_sums() {
        let mut c = Computer::new(EnvConfig::default());
        let raw = calcgraph::Quantity::from_entries(
            vec!["x".to_string(), "y".to_string()],
            vec![
                (vec![Label::from("i"), Label::from("p")], 1.0),
                (vec![Label::from("j"), Label::from("p")], 2.0),
            ],
        )
        .unwrap();
        c.add(Key::bare("raw"), AddSpec::Literal(Value::Quantity(raw)), true, false).unwrap();
        // comp "mul" by 1.0 leaves the full 2-d quantity unchanged at the
        // target key; `sums: true` additionally queues the partial sums
        // over each strict dim subset (here just `total:x` and `total:y`).
        configure_str(
            &mut c,
            "general:\n  - comp: mul\n    key: \"total:x-y\"\n    inputs: [raw]\n    args: [1.0]\n    sums: true\n",
        )
        .unwrap();
        let total = c.get(&Key::parse("total:x-y").unwrap()).unwrap();
        assert_eq!(total.as_quantity().unwrap().dims().len(), 2);
        let partial = c.get(&Key::parse("total:x").unwrap()).unwrap();
        let partial_q = partial.as_quantity().unwrap();
        assert_eq!(partial_q.dims(), &["x".to_string()]);
        assert_eq!(partial_q.get(&[Label::from("i")]), Some(1.0));
        assert_eq!(partial_q.get(&[Label::from("j")]), Some(2.0));
    }

    #[test]
    fn aggregate_section_builds_tagged_target_with_groups() {
        let mut c = Computer::new(EnvConfig::default());
        let raw = calcgraph::Quantity::series("x", vec![Label::from("coal"), Label::from("gas")], vec![1.0, 2.0]).unwrap();
        c.add(Key::bare("energy"), AddSpec::Literal(Value::Quantity(raw)), true, false).unwrap();
        configure_str(
            &mut c,
            "aggregate:\n  - _quantities: [energy]\n    _tag: grouped\n    _dim: x\n    fossil: [coal, gas]\n",
        )
        .unwrap();
        let out = c.get(&Key::parse("energy::grouped").unwrap()).unwrap();
        let q = out.as_quantity().unwrap();
        assert_eq!(q.get(&[Label::from("fossil")]), Some(3.0));
    }

    #[test]
    fn combine_section_weights_and_sums_inputs() {
        let mut c = Computer::new(EnvConfig::default());
        let a = calcgraph::Quantity::series("x", vec![Label::from("i")], vec![10.0]).unwrap();
        let b = calcgraph::Quantity::series("x", vec![Label::from("i")], vec![4.0]).unwrap();
        c.add(Key::bare("a"), AddSpec::Literal(Value::Quantity(a)), true, false).unwrap();
        c.add(Key::bare("b"), AddSpec::Literal(Value::Quantity(b)), true, false).unwrap();
        configure_str(
            &mut c,
            "combine:\n  - key: combined\n    inputs:\n      - quantity: a\n        weight: 2\n      - quantity: b\n        weight: -1\n",
        )
        .unwrap();
        let out = c.get(&Key::bare("combined")).unwrap();
        let q = out.as_quantity().unwrap();
        assert_eq!(q.get(&[Label::from("i")]), Some(16.0));
    }

    #[test]
    fn files_section_loads_csv_into_a_quantity() {
        use std::io::Write;
        let mut c = Computer::new(EnvConfig::default());
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "region,value").unwrap();
        writeln!(file, "north,1.5").unwrap();
        writeln!(file, "south,2.5").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let yaml = format!("files:\n  path: \"{path}\"\n  key: loaded\n");
        configure_str(&mut c, &yaml).unwrap();
        let out = c.get(&Key::bare("loaded")).unwrap();
        let q = out.as_quantity().unwrap();
        assert_eq!(q.get(&[Label::from("north")]), Some(1.5));
        assert_eq!(q.get(&[Label::from("south")]), Some(2.5));
    }
}
