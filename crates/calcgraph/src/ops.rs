//! The built-in operator registry (spec.md §4.4) plus [`OperatorRegistry`]
//! itself, which `Computer::require_compat` extends the same way the
//! original's `modules: List[ModuleType]` list did by searching additional
//! namespaces for a `get_comp`-resolvable name (`genno/core/computer.py`
//! `get_comp`/`require_compat`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::quantity::{Label, Quantity};
use crate::units::EnvConfig;
use crate::value::Value;

/// A built-in or user-registered operator: a pure function from positional
/// arguments (already resolved from keys to [`Value`]s by the caller) to a
/// single result value.
pub type OpFn = Arc<dyn Fn(&[Value], &EnvConfig) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct OperatorRegistry {
    ops: BTreeMap<String, OpFn>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("names", &self.ops.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        let mut reg = OperatorRegistry { ops: BTreeMap::new() };
        reg.register_builtins();
        reg
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry::default()
    }

    /// Register (or replace) an operator under `name`, mirroring
    /// `require_compat`'s effect of making a new name resolvable by
    /// `Computer::add` (spec.md §4.5).
    pub fn register(&mut self, name: impl Into<String>, f: OpFn) {
        self.ops.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Result<OpFn> {
        self.ops
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Name(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    fn register_builtins(&mut self) {
        self.register("add", Arc::new(op_add));
        self.register("sub", Arc::new(op_sub));
        self.register("subtract", Arc::new(op_sub));
        self.register("mul", Arc::new(op_mul));
        self.register("multiply", Arc::new(op_mul));
        // `"product"` is the name the "general" config section special-cases
        // (spec.md §6.2); it is a variadic alias for pairwise `mul`.
        self.register("product", Arc::new(op_mul));
        self.register("div", Arc::new(op_div));
        self.register("ratio", Arc::new(op_div));
        self.register("pow", Arc::new(op_pow));
        self.register("sum", Arc::new(op_sum));
        self.register("max", Arc::new(op_max));
        self.register("min", Arc::new(op_min));
        self.register("cumprod", Arc::new(op_cumprod));
        self.register("ffill", Arc::new(op_ffill));
        self.register("bfill", Arc::new(op_bfill));
        self.register("shift", Arc::new(op_shift));
        self.register("interpolate", Arc::new(op_interp));
        self.register("sel", Arc::new(op_sel));
        self.register("inverse", Arc::new(op_inverse));
        self.register("aggregate", Arc::new(op_aggregate));
        self.register("combine", Arc::new(op_combine));
        self.register("select", Arc::new(op_select));
        self.register("broadcast_map", Arc::new(op_broadcast_map));
        self.register("rename_dims", Arc::new(op_rename_dims));
        self.register("relabel", Arc::new(op_relabel));
        self.register("group_sum", Arc::new(op_group_sum));
        self.register("concat", Arc::new(op_concat));
        self.register("apply_units", Arc::new(op_apply_units));
        self.register("assign_units", Arc::new(op_assign_units));
        self.register("convert_units", Arc::new(op_convert_units));
        self.register("load_file", Arc::new(op_load_file));
        self.register("write_report", Arc::new(op_write_report));
    }
}

/// Coerce a value to a [`Quantity`], promoting a bare [`Value::Scalar`] to a
/// dimensionless 0-D quantity so arithmetic operators can mix plain numbers
/// (e.g. from expression-language literals) with labeled quantities.
fn as_quantity(v: &Value, what: &str) -> Result<Quantity> {
    if let Some(q) = v.as_quantity() {
        Ok(q.clone())
    } else if let Some(s) = v.as_scalar() {
        Ok(Quantity::scalar(s))
    } else {
        Err(Error::TypeMismatch(format!("{what}: expected a quantity or scalar")))
    }
}

fn fold_binary(
    args: &[Value],
    name: &str,
    f: impl Fn(&Quantity, &Quantity) -> Result<Quantity>,
) -> Result<Value> {
    if args.len() < 2 {
        return Err(Error::TypeMismatch(format!("{name}: expects at least 2 arguments")));
    }
    let mut acc = as_quantity(&args[0], name)?;
    for a in &args[1..] {
        acc = f(&acc, &as_quantity(a, name)?)?;
    }
    Ok(Value::Quantity(acc))
}

fn op_add(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    fold_binary(args, "add", |a, b| a.add(b))
}
fn op_sub(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    fold_binary(args, "sub", |a, b| a.sub(b))
}
fn op_mul(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    fold_binary(args, "mul", |a, b| a.mul(b))
}
fn op_div(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    fold_binary(args, "div", |a, b| a.div(b))
}

fn op_pow(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let [base, exp] = args else {
        return Err(Error::TypeMismatch("pow: expects (base, exponent)".into()));
    };
    let base_q = as_quantity(base, "pow")?;
    if let Some(scalar) = exp.as_scalar() {
        Ok(Value::Quantity(base_q.pow_scalar(scalar)?))
    } else if let Some(exp_q) = exp.as_quantity() {
        Ok(Value::Quantity(base_q.pow_quantity(exp_q)?))
    } else {
        Err(Error::TypeMismatch("pow: exponent must be a scalar or quantity".into()))
    }
}

fn dims_arg(args: &[Value], idx: usize, name: &str) -> Result<Vec<String>> {
    let v = args
        .get(idx)
        .ok_or_else(|| Error::TypeMismatch(format!("{name}: missing dims argument")))?;
    let seq = v
        .as_sequence()
        .ok_or_else(|| Error::TypeMismatch(format!("{name}: dims argument must be a sequence")))?;
    seq.iter()
        .map(|d| {
            d.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::TypeMismatch(format!("{name}: dim name must be a string")))
        })
        .collect()
}

fn op_sum(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("sum: missing quantity".into()))?, "sum")?;
    let dims = if args.len() > 1 { dims_arg(args, 1, "sum")? } else { q.dims().to_vec() };
    let weights = args.get(2).and_then(Value::as_quantity);
    Ok(Value::Quantity(q.sum(&dims, weights)?))
}

fn op_max(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("max: missing quantity".into()))?, "max")?;
    let dims = if args.len() > 1 { dims_arg(args, 1, "max")? } else { q.dims().to_vec() };
    Ok(Value::Quantity(q.max(&dims)?))
}

fn op_min(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("min: missing quantity".into()))?, "min")?;
    let dims = if args.len() > 1 { dims_arg(args, 1, "min")? } else { q.dims().to_vec() };
    Ok(Value::Quantity(q.min(&dims)?))
}

fn str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a str> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::TypeMismatch(format!("{name}: expected a string argument at position {idx}")))
}

fn op_cumprod(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("cumprod: missing quantity".into()))?, "cumprod")?;
    let dim = str_arg(args, 1, "cumprod")?;
    Ok(Value::Quantity(q.cumprod(dim)?))
}

fn op_ffill(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("ffill: missing quantity".into()))?, "ffill")?;
    let dim = str_arg(args, 1, "ffill")?;
    Ok(Value::Quantity(q.ffill(dim)?))
}

fn op_bfill(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("bfill: missing quantity".into()))?, "bfill")?;
    let dim = str_arg(args, 1, "bfill")?;
    Ok(Value::Quantity(q.bfill(dim)?))
}

fn op_shift(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("shift: missing quantity".into()))?, "shift")?;
    let dim = str_arg(args, 1, "shift")?;
    let n = args
        .get(2)
        .and_then(Value::as_scalar)
        .ok_or_else(|| Error::TypeMismatch("shift: expects an integer offset".into()))? as i64;
    let fill = args.get(3).and_then(Value::as_scalar);
    Ok(Value::Quantity(q.shift(dim, n, fill)?))
}

fn op_interp(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("interpolate: missing quantity".into()))?, "interpolate")?;
    let dim = str_arg(args, 1, "interpolate")?;
    let targets_v = args
        .get(2)
        .and_then(Value::as_sequence)
        .ok_or_else(|| Error::TypeMismatch("interpolate: expects a sequence of target coordinates".into()))?;
    let targets: Vec<f64> = targets_v
        .iter()
        .map(|v| v.as_scalar().ok_or_else(|| Error::TypeMismatch("interpolate: targets must be numeric".into())))
        .collect::<Result<_>>()?;
    let extrapolate = args.get(3).and_then(Value::as_scalar).map(|f| f != 0.0).unwrap_or(false);
    Ok(Value::Quantity(q.interp(dim, &targets, extrapolate)?))
}

fn selectors_arg(args: &[Value], idx: usize, name: &str) -> Result<BTreeMap<String, Vec<Label>>> {
    let m = args
        .get(idx)
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::TypeMismatch(format!("{name}: expects a {{dim: [labels]}} mapping")))?;
    m.iter()
        .map(|(dim, v)| {
            let labels = v
                .as_sequence()
                .ok_or_else(|| Error::TypeMismatch(format!("{name}: labels for {dim} must be a sequence")))?
                .iter()
                .map(value_to_label)
                .collect::<Result<Vec<_>>>()?;
            Ok((dim.clone(), labels))
        })
        .collect()
}

fn value_to_label(v: &Value) -> Result<Label> {
    if let Some(s) = v.as_str() {
        Ok(Label::Str(s.to_string()))
    } else if let Some(n) = v.as_scalar() {
        Ok(Label::Int(n as i64))
    } else {
        Err(Error::TypeMismatch("expected a string or integer coordinate label".into()))
    }
}

fn op_sel(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("sel: missing quantity".into()))?, "sel")?;
    let selectors = selectors_arg(args, 1, "sel")?;
    Ok(Value::Quantity(q.sel(&selectors, false)?))
}

fn op_inverse(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("inverse: missing quantity".into()))?, "inverse")?;
    let selectors = selectors_arg(args, 1, "inverse")?;
    Ok(Value::Quantity(q.sel(&selectors, true)?))
}

/// Sum `qty` over `group_dim`, first relabeling along it per `groups`
/// (`{new_label: [old_label, ...]}`), matching the original's `aggregate`
/// operator (spec.md §4.4, `genno/operator.py:aggregate`). A label not named
/// by any group is dropped, and if two groups would claim the same key
/// label (a name collision across groups) the later group in iteration
/// order wins, matching a plain dict-assignment relabel.
fn op_aggregate(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("aggregate: missing quantity".into()))?, "aggregate")?;
    let dim = str_arg(args, 1, "aggregate")?;
    let groups_v = args
        .get(2)
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::TypeMismatch("aggregate: expects a {new_label: [old_labels]} mapping".into()))?;
    // `keep=False` (the default): group members are relabeled and summed,
    // original labels not named by any group are dropped. `keep=True`:
    // original entries are retained as-is and the group sums are added
    // alongside them (spec.md §4.4 `aggregate`).
    let keep = args.get(3).and_then(Value::as_scalar).map(|f| f != 0.0).unwrap_or(false);

    let pos = q
        .dims()
        .iter()
        .position(|d| d == dim)
        .ok_or_else(|| Error::Dimension(format!("no such dimension {dim}")))?;

    let mut entries: BTreeMap<Vec<Label>, f64> = BTreeMap::new();
    if keep {
        for (labels, v) in q.to_series() {
            entries.insert(labels, v);
        }
    }

    let existing_labels: BTreeSet<Label> = q.coords().get(dim).cloned().unwrap_or_default().into_iter().collect();
    for (new_label, olds) in groups_v {
        let new_label = Label::Str(new_label.clone());
        if keep && existing_labels.contains(&new_label) {
            log::warn!("aggregate: {dim}={new_label:?} already present");
        }
        let olds = olds
            .as_sequence()
            .ok_or_else(|| Error::TypeMismatch("aggregate: group members must be a sequence".into()))?;
        let members: BTreeSet<Label> = olds.iter().map(value_to_label).collect::<Result<_>>()?;
        for (mut labels, v) in q.to_series() {
            if members.contains(&labels[pos]) {
                labels[pos] = new_label.clone();
                *entries.entry(labels).or_insert(0.0) += v;
            }
        }
    }

    let mut qty = Quantity::from_entries(q.dims().to_vec(), entries.into_iter().collect())?;
    qty.attrs_mut().extend(q.attrs().clone());
    Ok(Value::Quantity(qty))
}

fn combine_select(sel_v: &Value, name: &str) -> Result<BTreeMap<String, Vec<Label>>> {
    let sel_m = sel_v
        .as_mapping()
        .ok_or_else(|| Error::TypeMismatch(format!("{name}: 'select' must be a mapping")))?;
    sel_m
        .iter()
        .map(|(dim, v)| {
            let labels = v
                .as_sequence()
                .ok_or_else(|| Error::TypeMismatch(format!("{name}: select labels must be a sequence")))?
                .iter()
                .map(value_to_label)
                .collect::<Result<Vec<_>>>()?;
            Ok((dim.clone(), labels))
        })
        .collect()
}

fn combine_fold(acc: Option<Quantity>, mut q: Quantity, select: Option<&Value>, weight: f64) -> Result<Quantity> {
    if let Some(sel_v) = select {
        q = q.sel(&combine_select(sel_v, "combine")?, false)?;
    }
    let weighted = q.mul(&Quantity::scalar(weight))?;
    Ok(match acc {
        Some(a) => a.add(&weighted)?,
        None => weighted,
    })
}

/// For each `{quantity, select?, weight?}` entry, optionally `sel` the
/// quantity then scale by `weight` (default 1.0), and sum the results
/// (spec.md §4.4 `combine`). All inputs must be unit-compatible with the
/// first, mirroring `add`'s unit-conversion contract.
///
/// Accepts two argument shapes: a single `Value::Sequence` of
/// `{quantity, select?, weight?}` mappings (the shape callers building
/// combine by hand or through the expression language reach for), or a flat
/// run of `(quantity, select-or-scalar-0, weight)` triples — the shape
/// `calcgraph-config`'s `combine:` section must use, since each `quantity`
/// there is an upstream key reference that can only be threaded through as
/// a top-level [`crate::task::TaskArg::Ref`], not nested inside a literal
/// sequence.
fn op_combine(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    if args.len() == 1 {
        if let Some(items) = args[0].as_sequence() {
            if items.is_empty() {
                return Err(Error::TypeMismatch("combine: expects at least one entry".into()));
            }
            let mut acc: Option<Quantity> = None;
            for item in items {
                let m = item
                    .as_mapping()
                    .ok_or_else(|| Error::TypeMismatch("combine: each entry must be a mapping".into()))?;
                let q = m
                    .get("quantity")
                    .ok_or_else(|| Error::TypeMismatch("combine: entry missing 'quantity'".into()))?;
                let q = as_quantity(q, "combine")?;
                let weight = m.get("weight").and_then(Value::as_scalar).unwrap_or(1.0);
                acc = Some(combine_fold(acc, q, m.get("select"), weight)?);
            }
            return Ok(Value::Quantity(acc.expect("at least one entry checked above")));
        }
    }

    if args.is_empty() || args.len() % 3 != 0 {
        return Err(Error::TypeMismatch(
            "combine: expects a single sequence argument, or (quantity, select, weight) triples".into(),
        ));
    }
    let mut acc: Option<Quantity> = None;
    for triple in args.chunks_exact(3) {
        let [q, select, weight] = triple else { unreachable!() };
        let q = as_quantity(q, "combine")?;
        let select = select.as_mapping().map(|_| select);
        let weight = weight
            .as_scalar()
            .ok_or_else(|| Error::TypeMismatch("combine: weight must be a scalar".into()))?;
        acc = Some(combine_fold(acc, q, select, weight)?);
    }
    Ok(Value::Quantity(acc.expect("at least one triple checked above")))
}

/// Select (or, if a trailing boolean argument is `true`, exclude) labels by
/// dim — the unified entry point `select` names in spec.md §4.4, on top of
/// the `sel`/`inverse` operators most callers use directly.
fn op_select(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("select: missing quantity".into()))?, "select")?;
    let selectors = selectors_arg(args, 1, "select")?;
    let inverse = args.get(2).and_then(Value::as_scalar).map(|f| f != 0.0).unwrap_or(false);
    Ok(Value::Quantity(q.sel(&selectors, inverse)?))
}

/// Replace `q`'s dim shared with `map` by `map`'s other dim, weighting by
/// the (0/1, unless `strict=false`) entries of `map` and summing out the
/// shared dim — a matrix-multiply-shaped broadcast (spec.md §4.4
/// `broadcast_map`).
fn op_broadcast_map(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("broadcast_map: missing quantity".into()))?, "broadcast_map")?;
    let map = args
        .get(1)
        .and_then(Value::as_quantity)
        .ok_or_else(|| Error::TypeMismatch("broadcast_map: 'map' must be a quantity".into()))?;
    let strict = args.get(2).and_then(Value::as_scalar).map(|f| f != 0.0).unwrap_or(true);

    let shared: Vec<String> = map.dims().iter().filter(|d| q.dims().contains(d)).cloned().collect();
    let [shared_dim] = shared.as_slice() else {
        return Err(Error::Dimension(
            "broadcast_map: 'map' must share exactly one dimension with the input".into(),
        ));
    };
    if !map.dims().iter().any(|d| d != shared_dim) {
        return Err(Error::Dimension(
            "broadcast_map: 'map' must have a second dimension to broadcast onto".into(),
        ));
    }

    if strict {
        for (_, v) in map.to_series() {
            if v != 0.0 && v != 1.0 {
                return Err(Error::TypeMismatch(format!(
                    "broadcast_map: strict map must contain only 0/1 entries, found {v}"
                )));
            }
        }
    }

    let product = q.mul(map)?;
    let result = product.sum(std::slice::from_ref(shared_dim), None)?;
    Ok(Value::Quantity(result))
}

/// Rename dims per `{old: new}` (spec.md §4.4 `rename_dims`).
fn op_rename_dims(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("rename_dims: missing quantity".into()))?, "rename_dims")?;
    let map = args
        .get(1)
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::TypeMismatch("rename_dims: expects a {old: new} mapping".into()))?;

    let new_dims: Vec<String> = q
        .dims()
        .iter()
        .map(|d| match map.get(d) {
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::TypeMismatch("rename_dims: new name must be a string".into())),
            None => Ok(d.clone()),
        })
        .collect::<Result<_>>()?;

    let mut qty = Quantity::from_entries(new_dims, q.to_series())?;
    qty.attrs_mut().extend(q.attrs().clone());
    Ok(Value::Quantity(qty))
}

/// Rename coordinate labels per `{dim: {old_label: new_label}}` (spec.md
/// §4.4 `relabel`).
fn op_relabel(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("relabel: missing quantity".into()))?, "relabel")?;
    let map = args
        .get(1)
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::TypeMismatch("relabel: expects a {dim: {old: new}} mapping".into()))?;

    let mut per_dim: BTreeMap<String, BTreeMap<Label, Label>> = BTreeMap::new();
    for (dim, relabels) in map {
        let relabels = relabels
            .as_mapping()
            .ok_or_else(|| Error::TypeMismatch("relabel: per-dim value must be a {old: new} mapping".into()))?;
        let mut m = BTreeMap::new();
        for (old, new) in relabels {
            let new_label = new
                .as_str()
                .map(|s| Label::Str(s.to_string()))
                .or_else(|| new.as_scalar().map(|n| Label::Int(n as i64)))
                .ok_or_else(|| Error::TypeMismatch("relabel: new label must be a string or number".into()))?;
            m.insert(Label::Str(old.clone()), new_label);
        }
        per_dim.insert(dim.clone(), m);
    }

    let entries: Vec<(Vec<Label>, f64)> = q
        .to_series()
        .into_iter()
        .map(|(mut labels, v)| {
            for (i, dim) in q.dims().iter().enumerate() {
                if let Some(m) = per_dim.get(dim) {
                    if let Some(new_label) = m.get(&labels[i]) {
                        labels[i] = new_label.clone();
                    }
                }
            }
            (labels, v)
        })
        .collect();

    let mut qty = Quantity::from_entries(q.dims().to_vec(), entries)?;
    qty.attrs_mut().extend(q.attrs().clone());
    Ok(Value::Quantity(qty))
}

/// Sum `q` over `sum_dim`, keeping `group_dim` (and any other remaining
/// dims) intact (spec.md §4.4 `group_sum`). Equivalent to `sum(q, [sum_dim])`
/// but validates that `group_dim` actually exists, matching the original's
/// two-named-dims call signature (`genno/operator.py:group_sum`).
fn op_group_sum(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("group_sum: missing quantity".into()))?, "group_sum")?;
    let group_dim = str_arg(args, 1, "group_sum")?;
    let sum_dim = str_arg(args, 2, "group_sum")?;
    if !q.dims().iter().any(|d| d == group_dim) {
        return Err(Error::Dimension(format!("group_sum: no such dimension {group_dim}")));
    }
    Ok(Value::Quantity(q.sum(&[sum_dim.to_string()], None)?))
}

/// Relabel units, logging a warning (but not erroring) when the new unit's
/// dimension differs from the quantity's current one — distinct from
/// `assign_units`, which assigns silently (spec.md §4.4).
fn op_apply_units(args: &[Value], env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("apply_units: missing quantity".into()))?, "apply_units")?;
    let expr = str_arg(args, 1, "apply_units")?;
    let unit = env.parse(expr)?;
    if !q.units().compatible_with(&unit) {
        log::warn!("apply_units: relabeling {} as {} (incompatible dimensions)", q.units(), unit);
    }
    Ok(Value::Quantity(q.clone().with_units(unit)))
}

/// Concatenate quantities. When all inputs share the same dims, unions them
/// (later inputs win on overlapping coordinates); when a `dim` name is given
/// as a final string argument and inputs do *not* share that dim, stacks
/// them as new labels along it instead (spec.md §4.4 `concat`'s two modes,
/// `genno/operator.py:concat`).
fn op_concat(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let (qtys, stack_dim): (Vec<&Quantity>, Option<&str>) = match args.last().and_then(Value::as_str) {
        Some(dim) if args.len() > 1 => (
            args[..args.len() - 1]
                .iter()
                .map(|v| as_quantity(v, "concat"))
                .collect::<Result<_>>()?,
            Some(dim),
        ),
        _ => (
            args.iter().map(|v| as_quantity(v, "concat")).collect::<Result<_>>()?,
            None,
        ),
    };
    if qtys.is_empty() {
        return Err(Error::TypeMismatch("concat: expects at least one quantity".into()));
    }

    if let Some(dim) = stack_dim {
        let dims = q_dims_with_stack(qtys[0], dim);
        let mut entries = Vec::new();
        for (i, q) in qtys.iter().enumerate() {
            for (mut labels, v) in q.to_series() {
                labels.push(Label::Int(i as i64));
                entries.push((labels, v));
            }
        }
        let qty = Quantity::from_entries(dims, entries)?;
        return Ok(Value::Quantity(qty));
    }

    let mut acc: BTreeMap<Vec<Label>, f64> = BTreeMap::new();
    let dims = qtys[0].dims().to_vec();
    for q in &qtys {
        if q.dims() != dims.as_slice() {
            return Err(Error::Dimension("concat: dims must match across inputs without a stack dim".into()));
        }
        for (labels, v) in q.to_series() {
            acc.insert(labels, v);
        }
    }
    let qty = Quantity::from_entries(dims, acc.into_iter().collect())?;
    Ok(Value::Quantity(qty))
}

fn q_dims_with_stack(q: &Quantity, dim: &str) -> Vec<String> {
    let mut dims = q.dims().to_vec();
    if !dims.iter().any(|d| d == dim) {
        dims.push(dim.to_string());
    }
    dims
}

fn op_assign_units(args: &[Value], env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("assign_units: missing quantity".into()))?, "assign_units")?;
    let expr = str_arg(args, 1, "assign_units")?;
    let unit = env.parse(expr)?;
    Ok(Value::Quantity(q.clone().with_units(unit)))
}

fn op_convert_units(args: &[Value], env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("convert_units: missing quantity".into()))?, "convert_units")?;
    let expr = str_arg(args, 1, "convert_units")?;
    let target = env.parse(expr)?;
    let factor = q.units().conversion_factor_to(&target)?;
    let scaled: Vec<(Vec<Label>, f64)> = q.to_series().into_iter().map(|(l, v)| (l, v * factor)).collect();
    let mut out = Quantity::from_entries(q.dims().to_vec(), scaled)?;
    out.attrs_mut().extend(q.attrs().clone());
    out = out.with_units(target);
    Ok(Value::Quantity(out))
}

/// Read a CSV table into a [`Quantity`] (spec.md §4.4 `load_file`, §6.3's
/// wire format): one column per dim, plus `value` and optionally `unit`.
/// `args[1]`, if given, is a `{dims: {old_col: new_dim}, units: "<expr>"}`
/// mapping: `dims` renames selected columns, `units` is an explicit unit
/// that must agree with a `unit` column present in the file.
fn op_load_file(args: &[Value], env: &EnvConfig) -> Result<Value> {
    let path = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::TypeMismatch("load_file: missing path".into()))?;
    let opts = args.get(1).and_then(Value::as_mapping);
    let dims_rename: BTreeMap<String, String> = opts
        .and_then(|m| m.get("dims"))
        .and_then(Value::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let explicit_units = opts.and_then(|m| m.get("units")).and_then(Value::as_str);

    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let value_pos = headers
        .iter()
        .position(|h| h == "value")
        .ok_or_else(|| Error::Dimension("load_file: no 'value' column".into()))?;
    let unit_pos = headers.iter().position(|h| h == "unit");
    let dim_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != value_pos && Some(*i) != unit_pos && h.as_str() != "unit")
        .map(|(i, h)| (i, dims_rename.get(h).cloned().unwrap_or_else(|| h.clone())))
        .collect();

    let mut entries = Vec::new();
    let mut file_unit: Option<String> = None;
    for record in reader.records() {
        let record = record?;
        let labels: Vec<Label> = dim_cols
            .iter()
            .map(|(i, _)| Label::Str(record.get(*i).unwrap_or_default().to_string()))
            .collect();
        let value: f64 = record
            .get(value_pos)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::TypeMismatch("load_file: non-numeric 'value' entry".into()))?;
        if let Some(up) = unit_pos {
            let u = record.get(up).unwrap_or_default().to_string();
            match &file_unit {
                Some(existing) if existing != &u => {
                    return Err(Error::Dimension(format!(
                        "load_file: non-unique units in file ({existing:?} vs {u:?})"
                    )))
                }
                _ => file_unit = Some(u),
            }
        }
        entries.push((labels, value));
    }

    let dims: Vec<String> = dim_cols.into_iter().map(|(_, name)| name).collect();
    let mut qty = Quantity::from_entries(dims, entries)?;

    let unit = match (explicit_units, &file_unit) {
        (Some(explicit), Some(from_file)) if explicit != from_file => {
            return Err(Error::IncompatibleUnits(format!(
                "load_file: explicit units {explicit:?} do not match file's unit column {from_file:?}"
            )))
        }
        (Some(explicit), _) => Some(env.parse(explicit)?),
        (None, Some(from_file)) => Some(env.parse(from_file)?),
        (None, None) => None,
    };
    if let Some(unit) = unit {
        qty = qty.with_units(unit);
    }
    Ok(Value::Quantity(qty))
}

/// Serialize a [`Quantity`] to CSV at `path` (spec.md §4.4 `write_report`).
/// Only the `.csv` suffix is implemented; the XLSX adapter is out of scope
/// per spec.md §1's "ecosystem adapters" non-goal.
fn op_write_report(args: &[Value], _env: &EnvConfig) -> Result<Value> {
    let q = as_quantity(args.first().ok_or_else(|| Error::TypeMismatch("write_report: missing quantity".into()))?, "write_report")?;
    let path = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::TypeMismatch("write_report: missing path".into()))?;
    if !path.ends_with(".csv") {
        return Err(Error::TypeMismatch(format!(
            "write_report: unsupported report format for {path:?} (only .csv is implemented)"
        )));
    }

    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<String> = q.dims().to_vec();
    header.push("value".to_string());
    header.push("unit".to_string());
    writer.write_record(&header)?;

    let unit = q.units().to_string();
    for (labels, value) in q.to_series() {
        let mut row: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        row.push(value.to_string());
        row.push(unit.clone());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(Value::Scalar(q.nnz() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(labels: &[&str], values: &[f64]) -> Quantity {
        Quantity::series("x", labels.iter().map(|s| Label::from(*s)).collect(), values.to_vec()).unwrap()
    }

    #[test]
    fn add_via_registry() {
        let reg = OperatorRegistry::default();
        let env = EnvConfig::default();
        let f = reg.get("add").unwrap();
        let a = Value::Quantity(q(&["a", "b"], &[1.0, 2.0]));
        let b = Value::Quantity(q(&["a", "b"], &[10.0, 20.0]));
        let out = f(&[a, b], &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("a")]), Some(11.0));
    }

    #[test]
    fn unknown_operator_errors() {
        let reg = OperatorRegistry::default();
        assert!(matches!(reg.get("no_such_op"), Err(Error::Name(_))));
    }

    #[test]
    fn aggregate_sums_group_members() {
        let qty = q(&["a0", "a1", "b0"], &[1.0, 2.0, 5.0]);
        let mut groups = BTreeMap::new();
        groups.insert(
            "a".to_string(),
            Value::Sequence(vec![Value::Str("a0".into()), Value::Str("a1".into())]),
        );
        let args = [
            Value::Quantity(qty),
            Value::Str("x".into()),
            Value::Mapping(groups),
        ];
        let env = EnvConfig::default();
        let out = op_aggregate(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("a")]), Some(3.0));
        assert_eq!(out_q.get(&[Label::from("b0")]), None);
    }

    #[test]
    fn convert_units_scales_magnitude() {
        let env = EnvConfig::default();
        let qty = q(&["a"], &[2.0]).with_units(env.parse("MJ").unwrap());
        let args = [Value::Quantity(qty), Value::Str("J".into())];
        let out = op_convert_units(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("a")]), Some(2.0e6));
        assert_eq!(out_q.units().symbol, "J");
    }

    #[test]
    fn aggregate_keep_retains_originals_and_warns_on_collision() {
        let qty = q(&["foo1", "foo2", "bar1", "bar2"], &[1.0, 2.0, 3.0, 4.0]);
        let mut groups = BTreeMap::new();
        groups.insert(
            "foo".to_string(),
            Value::Sequence(vec![Value::Str("foo1".into()), Value::Str("foo2".into())]),
        );
        groups.insert(
            "bar".to_string(),
            Value::Sequence(vec![Value::Str("bar1".into()), Value::Str("bar2".into())]),
        );
        groups.insert("foo1".to_string(), Value::Sequence(vec![Value::Str("foo1".into())]));
        let args = [
            Value::Quantity(qty),
            Value::Str("x".into()),
            Value::Mapping(groups),
            Value::Scalar(1.0), // keep = true
        ];
        let env = EnvConfig::default();
        let out = op_aggregate(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        for label in ["foo1", "foo2", "bar1", "bar2", "foo", "bar"] {
            assert!(out_q.get(&[Label::from(label)]).is_some(), "missing {label}");
        }
        assert_eq!(out_q.get(&[Label::from("foo")]), Some(3.0));
    }

    #[test]
    fn combine_selects_weights_and_sums() {
        let a = q(&["i"], &[10.0]);
        let b = q(&["i"], &[4.0]);
        let mut entry_a = BTreeMap::new();
        entry_a.insert("quantity".to_string(), Value::Quantity(a));
        entry_a.insert("weight".to_string(), Value::Scalar(2.0));
        let mut entry_b = BTreeMap::new();
        entry_b.insert("quantity".to_string(), Value::Quantity(b));
        entry_b.insert("weight".to_string(), Value::Scalar(-1.0));
        let args = [Value::Sequence(vec![Value::Mapping(entry_a), Value::Mapping(entry_b)])];
        let env = EnvConfig::default();
        let out = op_combine(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("i")]), Some(16.0));
    }

    #[test]
    fn combine_flat_triples_match_sequence_form() {
        let a = q(&["i"], &[10.0]);
        let b = q(&["i"], &[4.0]);
        let args = [
            Value::Quantity(a),
            Value::Scalar(0.0), // no select
            Value::Scalar(2.0),
            Value::Quantity(b),
            Value::Scalar(0.0),
            Value::Scalar(-1.0),
        ];
        let env = EnvConfig::default();
        let out = op_combine(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("i")]), Some(16.0));
    }

    #[test]
    fn select_inverse_flag_matches_sel_and_inverse_ops() {
        let qty = q(&["a", "b", "c"], &[1.0, 2.0, 3.0]);
        let mut sel = BTreeMap::new();
        sel.insert("x".to_string(), Value::Sequence(vec![Value::Str("a".into())]));
        let args = [Value::Quantity(qty), Value::Mapping(sel), Value::Scalar(1.0)];
        let env = EnvConfig::default();
        let out = op_select(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("b")]), Some(2.0));
        assert_eq!(out_q.get(&[Label::from("c")]), Some(3.0));
        assert_eq!(out_q.get(&[Label::from("a")]), None);
    }

    #[test]
    fn rename_dims_and_relabel_round_trip() {
        let qty = q(&["a", "b"], &[1.0, 2.0]);
        let mut rename = BTreeMap::new();
        rename.insert("x".to_string(), Value::Str("y".into()));
        let env = EnvConfig::default();
        let renamed = op_rename_dims(&[Value::Quantity(qty), Value::Mapping(rename)], &env).unwrap();
        let renamed_q = renamed.as_quantity().unwrap();
        assert_eq!(renamed_q.dims(), &["y".to_string()]);

        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), Value::Str("alpha".into()));
        let mut per_dim = BTreeMap::new();
        per_dim.insert("y".to_string(), Value::Mapping(labels));
        let relabeled = op_relabel(&[renamed, Value::Mapping(per_dim)], &env).unwrap();
        let relabeled_q = relabeled.as_quantity().unwrap();
        assert_eq!(relabeled_q.get(&[Label::from("alpha")]), Some(1.0));
    }

    #[test]
    fn group_sum_keeps_group_dim_intact() {
        let qty = Quantity::from_entries(
            vec!["region".to_string(), "year".to_string()],
            vec![
                (vec![Label::from("north"), Label::from("2020")], 1.0),
                (vec![Label::from("north"), Label::from("2021")], 2.0),
                (vec![Label::from("south"), Label::from("2020")], 5.0),
            ],
        )
        .unwrap();
        let args = [Value::Quantity(qty), Value::Str("region".into()), Value::Str("year".into())];
        let env = EnvConfig::default();
        let out = op_group_sum(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("north")]), Some(3.0));
        assert_eq!(out_q.get(&[Label::from("south")]), Some(5.0));
    }

    #[test]
    fn broadcast_map_weights_and_sums_shared_dim() {
        let qty = q(&["a", "b"], &[1.0, 2.0]);
        let map = Quantity::from_entries(
            vec!["x".to_string(), "group".to_string()],
            vec![
                (vec![Label::from("a"), Label::from("g1")], 1.0),
                (vec![Label::from("b"), Label::from("g1")], 1.0),
                (vec![Label::from("b"), Label::from("g2")], 1.0),
            ],
        )
        .unwrap();
        let args = [Value::Quantity(qty), Value::Quantity(map), Value::Scalar(1.0)];
        let env = EnvConfig::default();
        let out = op_broadcast_map(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        assert_eq!(out_q.get(&[Label::from("g1")]), Some(3.0));
        assert_eq!(out_q.get(&[Label::from("g2")]), Some(2.0));
    }

    #[test]
    fn apply_units_relabels_without_converting() {
        let env = EnvConfig::default();
        let qty = q(&["a"], &[2.0]).with_units(env.parse("MJ").unwrap());
        let args = [Value::Quantity(qty), Value::Str("hour".into())];
        let out = op_apply_units(&args, &env).unwrap();
        let out_q = out.as_quantity().unwrap();
        // value is unchanged even though the new unit is dimensionally
        // incompatible with the old one (a warning is logged, not an error).
        assert_eq!(out_q.get(&[Label::from("a")]), Some(2.0));
        assert_eq!(out_q.units().symbol, "hour");
    }
}
