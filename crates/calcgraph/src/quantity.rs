//! Sparse labeled N-dimensional array with attached units.
//!
//! See spec.md §3.2 / §4.2. The representation follows the Design Note in
//! spec.md §9: "sparse COO with an ordered dim-name vector" rather than the
//! original's runtime choice between a dense `xarray.DataArray` and a
//! sparse-backed variant.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::{Error, Result};
use crate::units::Unit;
use crate::value::Value;

/// A single coordinate label: either a string category or an integer,
/// tracked separately so numeric-dim operators (`interp`, `shift`) can parse
/// it back out without guessing from string content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    Str(String),
    Int(i64),
}

impl Label {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Label::Int(i) => Some(*i as f64),
            Label::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Str(s) => write!(f, "{s}"),
            Label::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::Str(s.to_string())
    }
}
impl From<String> for Label {
    fn from(s: String) -> Self {
        Label::Str(s)
    }
}
impl From<i64> for Label {
    fn from(i: i64) -> Self {
        Label::Int(i)
    }
}

const UNIT_ATTR: &str = "_unit";

/// A sparse N-dimensional labeled array with physical units.
#[derive(Debug, Clone)]
pub struct Quantity {
    pub name: Option<String>,
    dims: Vec<String>,
    coords: BTreeMap<String, Vec<Label>>,
    /// Non-fill entries, keyed by the per-dim coordinate *index* (positions
    /// into `coords[dims[i]]`), in `dims` order.
    data: HashMap<Vec<usize>, f64>,
    attrs: BTreeMap<String, Value>,
}

impl Quantity {
    /// A dimensionless scalar.
    pub fn scalar(value: f64) -> Self {
        let mut data = HashMap::new();
        data.insert(Vec::new(), value);
        Quantity {
            name: None,
            dims: Vec::new(),
            coords: BTreeMap::new(),
            data,
            attrs: BTreeMap::new(),
        }
    }

    /// Build a 1-D quantity from parallel `labels`/`values` along `dim`.
    pub fn series(dim: impl Into<String>, labels: Vec<Label>, values: Vec<f64>) -> Result<Self> {
        if labels.len() != values.len() {
            return Err(Error::Dimension(
                "labels and values must have the same length".into(),
            ));
        }
        let dim = dim.into();
        let mut seen = BTreeSet::new();
        for l in &labels {
            if !seen.insert(l.clone()) {
                return Err(Error::Dimension(format!("duplicate coordinate {l}")));
            }
        }
        let mut data = HashMap::new();
        for (i, v) in values.into_iter().enumerate() {
            data.insert(vec![i], v);
        }
        let mut coords = BTreeMap::new();
        coords.insert(dim.clone(), labels);
        Ok(Quantity {
            name: None,
            dims: vec![dim],
            coords,
            data,
            attrs: BTreeMap::new(),
        })
    }

    /// Build directly from a full coordinate grid plus sparse entries. `dims`
    /// fixes axis order; `entries` maps a label tuple (one label per dim, in
    /// `dims` order) to a value.
    pub fn from_entries(
        dims: Vec<String>,
        entries: Vec<(Vec<Label>, f64)>,
    ) -> Result<Self> {
        let mut seen_dims = BTreeSet::new();
        for d in &dims {
            if !seen_dims.insert(d.clone()) {
                return Err(Error::Dimension(format!("duplicate dimension {d}")));
            }
        }
        let mut coords: BTreeMap<String, Vec<Label>> = dims.iter().map(|d| (d.clone(), Vec::new())).collect();
        let mut coord_index: BTreeMap<String, HashMap<Label, usize>> =
            dims.iter().map(|d| (d.clone(), HashMap::new())).collect();
        let mut data = HashMap::new();
        for (labels, value) in entries {
            if labels.len() != dims.len() {
                return Err(Error::Dimension(
                    "entry label count does not match dims".into(),
                ));
            }
            let mut idx = Vec::with_capacity(dims.len());
            for (d, l) in dims.iter().zip(labels.into_iter()) {
                let map = coord_index.get_mut(d).unwrap();
                let i = *map.entry(l.clone()).or_insert_with(|| {
                    coords.get_mut(d).unwrap().push(l.clone());
                    coords[d].len() - 1
                });
                idx.push(i);
            }
            data.insert(idx, value);
        }
        Ok(Quantity {
            name: None,
            dims,
            coords,
            data,
            attrs: BTreeMap::new(),
        })
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn coords(&self) -> &BTreeMap<String, Vec<Label>> {
        &self.coords
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attrs
    }

    pub fn units(&self) -> Unit {
        match self.attrs.get(UNIT_ATTR) {
            Some(Value::Mapping(_)) | None => Unit::dimensionless(),
            Some(v) => unit_from_value(v).unwrap_or_else(Unit::dimensionless),
        }
    }

    /// Assign units without converting magnitudes (operator `assign_units`).
    pub fn with_units(mut self, units: Unit) -> Self {
        self.attrs.insert(UNIT_ATTR.to_string(), value_from_unit(&units));
        self
    }

    /// Number of stored (non-fill) entries.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    fn dim_pos(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    fn label_pos(&self, dim: &str, label: &Label) -> Option<usize> {
        self.coords.get(dim)?.iter().position(|l| l == label)
    }

    /// Look up the scalar value at a full coordinate (one label per `dims`,
    /// in `dims` order). Returns `None` if absent (sparse fill).
    pub fn get(&self, labels: &[Label]) -> Option<f64> {
        if labels.len() != self.dims.len() {
            return None;
        }
        let mut idx = Vec::with_capacity(labels.len());
        for (d, l) in self.dims.iter().zip(labels) {
            idx.push(self.label_pos(d, l)?);
        }
        self.data.get(&idx).copied()
    }

    /// Iterate stored (label-tuple, value) entries, dims in `self.dims()` order.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<Label>, f64)> + '_ {
        self.data.iter().map(move |(idx, v)| {
            let labels = idx
                .iter()
                .zip(self.dims.iter())
                .map(|(&i, d)| self.coords[d][i].clone())
                .collect();
            (labels, *v)
        })
    }

    // -- Binary operators (spec.md §4.2) ------------------------------------

    pub fn add(&self, other: &Quantity) -> Result<Quantity> {
        self.binary(other, BinOp::Add)
    }
    pub fn sub(&self, other: &Quantity) -> Result<Quantity> {
        self.binary(other, BinOp::Sub)
    }
    pub fn mul(&self, other: &Quantity) -> Result<Quantity> {
        self.binary(other, BinOp::Mul)
    }
    pub fn div(&self, other: &Quantity) -> Result<Quantity> {
        self.binary(other, BinOp::Div)
    }

    /// `self ** exponent`. `exponent` is a plain scalar, except when raising
    /// to a per-element exponent Quantity, which requires `self` to be
    /// dimensionless (spec.md §4.2 item 2).
    pub fn pow_scalar(&self, exponent: f64) -> Result<Quantity> {
        let unit = self.units().pow(exponent as i32);
        let mut out = self.clone();
        out.data = self.data.iter().map(|(k, v)| (k.clone(), v.powf(exponent))).collect();
        out.attrs.insert(UNIT_ATTR.to_string(), value_from_unit(&unit));
        Ok(out)
    }

    pub fn pow_quantity(&self, exponent: &Quantity) -> Result<Quantity> {
        if !self.units().is_dimensionless() {
            return Err(Error::TypeMismatch(
                "base must be dimensionless when the exponent is a Quantity".into(),
            ));
        }
        let (dims, coords) = union_coords(self, exponent);
        let mut data = HashMap::new();
        for combo in CartesianIter::new(&dims, &coords) {
            let l = project(self, &dims, &combo);
            let r = project(exponent, &dims, &combo);
            if let (Some(l), Some(r)) = (l, r) {
                let idx = combo_index(&dims, &coords, &combo);
                data.insert(idx, l.powf(r));
            }
        }
        Ok(Quantity {
            name: self.name.clone(),
            dims,
            coords,
            data,
            attrs: self.attrs.clone(),
        })
    }

    fn binary(&self, other: &Quantity, op: BinOp) -> Result<Quantity> {
        let self_units = self.units();
        let other_units = other.units();

        let (result_units, factor) = match op {
            BinOp::Add | BinOp::Sub => {
                let factor = other_units.conversion_factor_to(&self_units)?;
                (self_units.clone(), factor)
            }
            BinOp::Mul => (self_units.mul(&other_units), 1.0),
            BinOp::Div => (self_units.div(&other_units), 1.0),
        };

        let (dims, coords) = union_coords(self, other);
        let mut data = HashMap::new();
        for combo in CartesianIter::new(&dims, &coords) {
            let l = project(self, &dims, &combo);
            let r = project(other, &dims, &combo).map(|v| v * factor);

            let value = match op {
                BinOp::Add => match (l, r) {
                    (None, None) => None,
                    (l, r) => Some(l.unwrap_or(0.0) + r.unwrap_or(0.0)),
                },
                BinOp::Sub => match (l, r) {
                    (None, None) => None,
                    (l, r) => Some(l.unwrap_or(0.0) - r.unwrap_or(0.0)),
                },
                BinOp::Mul => match (l, r) {
                    (Some(l), Some(r)) => Some(l * r),
                    _ => None,
                },
                BinOp::Div => match (l, r) {
                    (Some(l), Some(r)) => Some(l / r),
                    _ => None,
                },
            };
            if let Some(v) = value {
                let idx = combo_index(&dims, &coords, &combo);
                data.insert(idx, v);
            }
        }

        let mut attrs = self.attrs.clone();
        attrs.insert(UNIT_ATTR.to_string(), value_from_unit(&result_units));

        Ok(Quantity {
            name: self.name.clone(),
            dims,
            coords,
            data,
            attrs,
        })
    }

    // -- Reductions (spec.md §4.2) -------------------------------------------

    /// Sum out `dims_to_drop`. Identity (self, unchanged) if empty.
    pub fn sum(&self, dims_to_drop: &[String], weights: Option<&Quantity>) -> Result<Quantity> {
        self.reduce(dims_to_drop, weights, ReduceOp::Sum)
    }
    pub fn max(&self, dims_to_drop: &[String]) -> Result<Quantity> {
        self.reduce(dims_to_drop, None, ReduceOp::Max)
    }
    pub fn min(&self, dims_to_drop: &[String]) -> Result<Quantity> {
        self.reduce(dims_to_drop, None, ReduceOp::Min)
    }

    fn reduce(
        &self,
        dims_to_drop: &[String],
        weights: Option<&Quantity>,
        op: ReduceOp,
    ) -> Result<Quantity> {
        if dims_to_drop.is_empty() {
            return Ok(self.clone());
        }
        let drop: BTreeSet<&str> = dims_to_drop.iter().map(|s| s.as_str()).collect();
        let kept_positions: Vec<usize> = self
            .dims
            .iter()
            .enumerate()
            .filter(|(_, d)| !drop.contains(d.as_str()))
            .map(|(i, _)| i)
            .collect();
        let kept_dims: Vec<String> = kept_positions.iter().map(|&i| self.dims[i].clone()).collect();

        let mut grouped: HashMap<Vec<usize>, Vec<f64>> = HashMap::new();
        for (idx, &v) in &self.data {
            let w = match weights {
                Some(wq) => {
                    let labels: Vec<Label> = idx
                        .iter()
                        .zip(self.dims.iter())
                        .map(|(&i, d)| self.coords[d][i].clone())
                        .collect();
                    project(wq, &self.dims, &labels).unwrap_or(1.0)
                }
                None => 1.0,
            };
            let proj: Vec<usize> = kept_positions.iter().map(|&p| idx[p]).collect();
            grouped.entry(proj).or_default().push(v * w);
        }

        let mut data = HashMap::new();
        for (idx, values) in grouped {
            let v = match op {
                ReduceOp::Sum => values.iter().sum(),
                ReduceOp::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                ReduceOp::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            };
            data.insert(idx, v);
        }

        let coords = kept_dims
            .iter()
            .map(|d| (d.clone(), self.coords[d].clone()))
            .collect();

        Ok(Quantity {
            name: self.name.clone(),
            dims: kept_dims,
            coords,
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Cumulative product along `dim` in coordinate order; units become
    /// `unit**n` at the n-th (1-indexed) position, per spec.md §4.2.
    pub fn cumprod(&self, dim: &str) -> Result<Quantity> {
        let pos = self
            .dim_pos(dim)
            .ok_or_else(|| Error::Dimension(format!("no such dimension {dim}")))?;
        let labels = self.coords[dim].clone();
        let base_units = self.units();

        // Group entries by the "other dims" slice.
        let mut by_slice: HashMap<Vec<usize>, HashMap<usize, f64>> = HashMap::new();
        for (idx, &v) in &self.data {
            let mut slice = idx.clone();
            let along = slice.remove(pos);
            by_slice.entry(slice).or_default().insert(along, v);
        }

        let mut data = HashMap::new();
        for (slice, along_values) in &by_slice {
            let mut running = 1.0;
            for (i, _label) in labels.iter().enumerate() {
                if let Some(v) = along_values.get(&i) {
                    running *= v;
                    let mut idx = slice.clone();
                    idx.insert(pos, i);
                    data.insert(idx, running);
                }
            }
        }
        let mut attrs = self.attrs.clone();
        attrs.insert(
            UNIT_ATTR.to_string(),
            value_from_unit(&base_units.pow(labels.len() as i32)),
        );
        Ok(Quantity {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            data,
            attrs,
        })
    }

    // -- Alignment utilities (spec.md §4.2) ---------------------------------

    /// Forward-fill missing entries along `dim`, in coordinate order.
    pub fn ffill(&self, dim: &str) -> Result<Quantity> {
        self.fill(dim, true)
    }
    /// Backward-fill missing entries along `dim`, in coordinate order.
    pub fn bfill(&self, dim: &str) -> Result<Quantity> {
        self.fill(dim, false)
    }

    fn fill(&self, dim: &str, forward: bool) -> Result<Quantity> {
        let pos = self
            .dim_pos(dim)
            .ok_or_else(|| Error::Dimension(format!("no such dimension {dim}")))?;
        let n = self.coords[dim].len();
        let mut by_slice: HashMap<Vec<usize>, HashMap<usize, f64>> = HashMap::new();
        for (idx, &v) in &self.data {
            let mut slice = idx.clone();
            let along = slice.remove(pos);
            by_slice.entry(slice).or_default().insert(along, v);
        }
        let mut data = HashMap::new();
        for (slice, mut along_values) in by_slice {
            let order: Box<dyn Iterator<Item = usize>> = if forward {
                Box::new(0..n)
            } else {
                Box::new((0..n).rev())
            };
            let mut last = None;
            for i in order {
                if let Some(&v) = along_values.get(&i) {
                    last = Some(v);
                } else if let Some(v) = last {
                    along_values.insert(i, v);
                }
            }
            for (i, v) in along_values {
                let mut idx = slice.clone();
                idx.insert(pos, i);
                data.insert(idx, v);
            }
        }
        Ok(Quantity {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Shift entries `n` integer positions along `dim`, filling vacated
    /// positions with `fill`.
    pub fn shift(&self, dim: &str, n: i64, fill: Option<f64>) -> Result<Quantity> {
        let pos = self
            .dim_pos(dim)
            .ok_or_else(|| Error::Dimension(format!("no such dimension {dim}")))?;
        let len = self.coords[dim].len() as i64;
        let mut data = HashMap::new();
        for (idx, &v) in &self.data {
            let new_pos = idx[pos] as i64 + n;
            if (0..len).contains(&new_pos) {
                let mut new_idx = idx.clone();
                new_idx[pos] = new_pos as usize;
                data.insert(new_idx, v);
            }
        }
        if let Some(fill) = fill {
            let vacated: Vec<i64> = if n >= 0 { (0..n).collect() } else { (len + n..len).collect() };
            // Only fill vacated positions that have no entry from other dims already
            // iterate existing slices to know which "other dims" combos exist
            let mut slices: BTreeSet<Vec<usize>> = BTreeSet::new();
            for idx in self.data.keys() {
                let mut s = idx.clone();
                s.remove(pos);
                slices.insert(s);
            }
            for slice in slices {
                for &v_pos in &vacated {
                    let mut idx = slice.clone();
                    idx.insert(pos, v_pos as usize);
                    data.entry(idx).or_insert(fill);
                }
            }
        }
        Ok(Quantity {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Linear interpolation along a single numeric `dim`, evaluated at
    /// `targets`. `extrapolate = false` drops out-of-range targets.
    pub fn interp(&self, dim: &str, targets: &[f64], extrapolate: bool) -> Result<Quantity> {
        let pos = self
            .dim_pos(dim)
            .ok_or_else(|| Error::Dimension(format!("no such dimension {dim}")))?;
        let labels = &self.coords[dim];
        let mut points: Vec<(f64, usize)> = labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.as_f64().map(|f| (f, i)))
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let mut by_slice: HashMap<Vec<usize>, HashMap<usize, f64>> = HashMap::new();
        for (idx, &v) in &self.data {
            let mut slice = idx.clone();
            let along = slice.remove(pos);
            by_slice.entry(slice).or_default().insert(along, v);
        }

        let mut new_labels = Vec::new();
        let mut data = HashMap::new();
        for (ti, &target) in targets.iter().enumerate() {
            if !extrapolate
                && (target < points.first().map(|p| p.0).unwrap_or(f64::NAN)
                    || target > points.last().map(|p| p.0).unwrap_or(f64::NAN))
            {
                continue;
            }
            new_labels.push(Label::Str(format_float(target)));
            let new_i = new_labels.len() - 1;
            for (slice, along_values) in &by_slice {
                if let Some(v) = interpolate_at(&points, along_values, target) {
                    let mut idx = slice.clone();
                    idx.insert(pos, new_i);
                    data.insert(idx, v);
                }
            }
            let _ = ti;
        }

        let mut coords = self.coords.clone();
        coords.insert(dim.to_string(), new_labels);
        Ok(Quantity {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords,
            data,
            attrs: self.attrs.clone(),
        })
    }

    // -- Selection (spec.md §4.2) --------------------------------------------

    /// Select (or, if `inverse`, exclude) the given labels per dim. Labels
    /// absent from `coords` are silently dropped (spec.md §4.2 `sel`); a
    /// single-label selection on a dim removes that dim from the result.
    pub fn sel(&self, selectors: &BTreeMap<String, Vec<Label>>, inverse: bool) -> Result<Quantity> {
        let mut kept: BTreeMap<String, BTreeSet<Label>> = BTreeMap::new();
        let mut drop_dim: BTreeSet<String> = BTreeSet::new();
        for (dim, labels) in selectors {
            let coord_labels = match self.coords.get(dim) {
                Some(c) => c,
                None => continue,
            };
            let present: Vec<Label> = labels
                .iter()
                .filter(|l| coord_labels.contains(l))
                .cloned()
                .collect();
            if present.len() < labels.len() {
                log::warn!("sel: dropped labels not present in dimension {dim:?}");
            }
            if labels.len() == 1 && !inverse {
                drop_dim.insert(dim.clone());
            }
            kept.insert(dim.clone(), present.into_iter().collect());
        }

        let mut data = HashMap::new();
        for (idx, &v) in &self.data {
            let mut ok = true;
            for (dim, wanted) in &kept {
                let pos = self.dim_pos(dim).unwrap();
                let label = &self.coords[dim][idx[pos]];
                let is_in = wanted.contains(label);
                if is_in == inverse {
                    ok = false;
                    break;
                }
            }
            if ok {
                data.insert(idx.clone(), v);
            }
        }

        // Reindex coords/dims, optionally dropping scalar-selected dims.
        let mut new_dims = Vec::new();
        let mut new_coords = BTreeMap::new();
        let mut remap: Vec<Option<usize>> = Vec::new(); // per old dim pos -> new pos, or None if dropped
        for (i, d) in self.dims.iter().enumerate() {
            if drop_dim.contains(d) {
                remap.push(None);
                continue;
            }
            let labels = if let Some(wanted) = kept.get(d) {
                self.coords[d]
                    .iter()
                    .filter(|l| wanted.contains(l))
                    .cloned()
                    .collect()
            } else {
                self.coords[d].clone()
            };
            remap.push(Some(new_dims.len()));
            new_dims.push(d.clone());
            new_coords.insert(d.clone(), labels);
            let _ = i;
        }

        // Remap stored entries onto the (possibly re-labeled/dropped) coords.
        let mut final_data = HashMap::new();
        for (idx, v) in data {
            let mut new_idx = Vec::with_capacity(new_dims.len());
            let mut valid = true;
            for (pos, &old_i) in idx.iter().enumerate() {
                if remap[pos].is_none() {
                    continue;
                }
                let dim = &self.dims[pos];
                let label = &self.coords[dim][old_i];
                match new_coords[dim].iter().position(|l| l == label) {
                    Some(ni) => new_idx.push(ni),
                    None => {
                        valid = false;
                        break;
                    }
                }
            }
            if valid {
                final_data.insert(new_idx, v);
            }
        }

        Ok(Quantity {
            name: self.name.clone(),
            dims: new_dims,
            coords: new_coords,
            data: final_data,
            attrs: self.attrs.clone(),
        })
    }

    // -- Tabular round-trip (spec.md §4.2) -----------------------------------

    pub fn to_series(&self) -> Vec<(Vec<Label>, f64)> {
        self.iter().collect()
    }

    pub fn from_series(dims: Vec<String>, rows: Vec<(Vec<Label>, f64)>) -> Result<Self> {
        Quantity::from_entries(dims, rows)
    }
}

fn unit_from_value(v: &Value) -> Option<Unit> {
    let m = v.as_mapping()?;
    let symbol = m.get("symbol")?.as_str()?.to_string();
    let scale = m.get("scale")?.as_scalar()?;
    let exps = m.get("exponents")?.as_sequence()?;
    let mut exponents = [0i8; 7];
    for (i, e) in exps.iter().enumerate().take(7) {
        exponents[i] = e.as_scalar().unwrap_or(0.0) as i8;
    }
    Some(Unit { symbol, scale, exponents })
}

fn value_from_unit(u: &Unit) -> Value {
    let mut m = BTreeMap::new();
    m.insert("symbol".to_string(), Value::Str(u.symbol.clone()));
    m.insert("scale".to_string(), Value::Scalar(u.scale));
    m.insert(
        "exponents".to_string(),
        Value::Sequence(u.exponents.iter().map(|&e| Value::Scalar(e as f64)).collect()),
    );
    Value::Mapping(m)
}

enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

enum ReduceOp {
    Sum,
    Max,
    Min,
}

/// Compute the sorted union of dims and the merged coordinate lists (`a`'s
/// coords first, then any labels unique to `b`, order preserved within each
/// source) used by binary operators and `pow_quantity`.
fn union_coords(a: &Quantity, b: &Quantity) -> (Vec<String>, BTreeMap<String, Vec<Label>>) {
    let mut dim_set: BTreeSet<String> = a.dims.iter().cloned().collect();
    dim_set.extend(b.dims.iter().cloned());
    let dims: Vec<String> = dim_set.into_iter().collect();

    let mut coords = BTreeMap::new();
    for d in &dims {
        let mut labels: Vec<Label> = a.coords.get(d).cloned().unwrap_or_default();
        if let Some(bl) = b.coords.get(d) {
            for l in bl {
                if !labels.contains(l) {
                    labels.push(l.clone());
                }
            }
        }
        coords.insert(d.clone(), labels);
    }
    (dims, coords)
}

/// Look up `q`'s value at the sub-tuple of `combo` corresponding to `q`'s own
/// dims (broadcast over dims `q` does not have at all).
fn project(q: &Quantity, result_dims: &[String], combo: &[Label]) -> Option<f64> {
    if q.dims.is_empty() {
        return q.data.get(&Vec::new()).copied();
    }
    let mut labels = Vec::with_capacity(q.dims.len());
    for d in &q.dims {
        let pos = result_dims.iter().position(|rd| rd == d)?;
        labels.push(combo[pos].clone());
    }
    q.get(&labels)
}

fn combo_index(
    dims: &[String],
    coords: &BTreeMap<String, Vec<Label>>,
    combo: &[Label],
) -> Vec<usize> {
    dims.iter()
        .zip(combo)
        .map(|(d, l)| coords[d].iter().position(|x| x == l).unwrap())
        .collect()
}

/// Iterates the full cartesian product of `coords[dims[0]] x coords[dims[1]] x …`.
struct CartesianIter<'a> {
    dims: &'a [String],
    coords: &'a BTreeMap<String, Vec<Label>>,
    counters: Vec<usize>,
    sizes: Vec<usize>,
    done: bool,
}

impl<'a> CartesianIter<'a> {
    fn new(dims: &'a [String], coords: &'a BTreeMap<String, Vec<Label>>) -> Self {
        let sizes: Vec<usize> = dims.iter().map(|d| coords[d].len().max(1)).collect();
        let done = sizes.iter().any(|&s| s == 0) || (dims.is_empty() && false);
        CartesianIter {
            dims,
            coords,
            counters: vec![0; dims.len()],
            sizes,
            done,
        }
    }
}

impl<'a> Iterator for CartesianIter<'a> {
    type Item = Vec<Label>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.dims.is_empty() {
            self.done = true;
            return Some(Vec::new());
        }
        let combo: Vec<Label> = self
            .dims
            .iter()
            .zip(self.counters.iter())
            .map(|(d, &i)| self.coords[d][i].clone())
            .collect();

        // Advance odometer.
        let mut k = self.counters.len();
        loop {
            if k == 0 {
                self.done = true;
                break;
            }
            k -= 1;
            self.counters[k] += 1;
            if self.counters[k] < self.sizes[k] {
                break;
            }
            self.counters[k] = 0;
            if k == 0 {
                self.done = true;
                break;
            }
        }
        Some(combo)
    }
}

fn interpolate_at(points: &[(f64, usize)], values: &HashMap<usize, f64>, target: f64) -> Option<f64> {
    let pts: Vec<(f64, f64)> = points
        .iter()
        .filter_map(|&(x, i)| values.get(&i).map(|&v| (x, v)))
        .collect();
    if pts.is_empty() {
        return None;
    }
    if pts.len() == 1 {
        return Some(pts[0].1);
    }
    if target <= pts[0].0 {
        let (x0, y0) = pts[0];
        let (x1, y1) = pts[1];
        return Some(y0 + (target - x0) * (y1 - y0) / (x1 - x0));
    }
    if target >= pts[pts.len() - 1].0 {
        let (x0, y0) = pts[pts.len() - 2];
        let (x1, y1) = pts[pts.len() - 1];
        return Some(y0 + (target - x0) * (y1 - y0) / (x1 - x0));
    }
    for w in pts.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        if target >= x0 && target <= x1 {
            return Some(y0 + (target - x0) * (y1 - y0) / (x1 - x0));
        }
    }
    None
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::EnvConfig;

    fn xq(labels: &[&str], values: &[f64], unit: &str, env: &EnvConfig) -> Quantity {
        let q = Quantity::series(
            "x",
            labels.iter().map(|s| Label::from(*s)).collect(),
            values.to_vec(),
        )
        .unwrap();
        q.with_units(env.parse(unit).unwrap())
    }

    #[test]
    fn sum_over_all_dims_matches_series_sum() {
        let env = EnvConfig::default();
        let q = xq(&["a", "b", "c"], &[1.0, 3.0, 8.0], "MJ", &env);
        let total = q.sum(&["x".to_string()], None).unwrap();
        assert_eq!(total.dims(), &Vec::<String>::new());
        assert_eq!(total.get(&[]), Some(12.0));
        assert_eq!(total.units().symbol, "MJ");
    }

    #[test]
    fn division_produces_compound_units() {
        let env = EnvConfig::default();
        let energy = xq(&["a", "b", "c"], &[1.0, 2.0, 3.0], "MJ", &env);
        let time = xq(&["a", "b", "c"], &[1.0, 1.0, 1.0], "hour", &env);
        let power = energy.div(&time).unwrap();
        assert_eq!(power.units().symbol, "MJ/hour");
        assert_eq!(power.get(&[Label::from("a")]), Some(1.0));
    }

    #[test]
    fn product_preserves_dim_labels() {
        let a = Quantity::series(
            "x",
            vec![Label::from("a0"), Label::from("a1")],
            vec![1.0, 2.0],
        )
        .unwrap();
        let b = Quantity::series(
            "b",
            vec![Label::from("b0"), Label::from("b1")],
            vec![3.0, 4.0],
        )
        .unwrap();
        let prod = a.mul(&b).unwrap();
        assert_eq!(prod.dims(), &["b".to_string(), "x".to_string()]);
        assert_eq!(
            prod.get(&[Label::from("b0"), Label::from("a0")]),
            Some(3.0)
        );
        assert_eq!(
            prod.get(&[Label::from("b1"), Label::from("a1")]),
            Some(8.0)
        );
    }

    #[test]
    fn unit_conversion_round_trip_preserves_values() {
        let env = EnvConfig::default();
        let q = xq(&["a"], &[2.0], "MJ", &env);
        let j_unit = env.parse("J").unwrap();
        let factor = q.units().conversion_factor_to(&j_unit).unwrap();
        let converted = Quantity::series("x", vec![Label::from("a")], vec![2.0 * factor])
            .unwrap()
            .with_units(j_unit.clone());
        let back_factor = converted.units().conversion_factor_to(&q.units()).unwrap();
        let back_value = converted.get(&[Label::from("a")]).unwrap() * back_factor;
        assert!((back_value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sel_drops_missing_labels_and_scalar_selection_removes_dim() {
        let q = Quantity::series(
            "x",
            vec![Label::from("a"), Label::from("b"), Label::from("c")],
            vec![1.0, 2.0, 3.0],
        )
        .unwrap();
        let mut sel = BTreeMap::new();
        sel.insert("x".to_string(), vec![Label::from("b"), Label::from("zzz")]);
        let r = q.sel(&sel, false).unwrap();
        assert_eq!(r.dims(), &["x".to_string()]);
        assert_eq!(r.nnz(), 1);

        let mut sel_scalar = BTreeMap::new();
        sel_scalar.insert("x".to_string(), vec![Label::from("b")]);
        let r2 = q.sel(&sel_scalar, false).unwrap();
        assert!(r2.dims().is_empty());
        assert_eq!(r2.get(&[]), Some(2.0));
    }
}
