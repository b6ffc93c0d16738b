//! A minimal pint-like unit system: each unit is a scale factor relative to
//! an SI base, plus a vector of base-dimension exponents. This is the
//! concrete choice spec.md §9 asks for in place of the original's dependency
//! on `pint`: "move [global unit state] into a single `EnvConfig` passed to
//! `Computer::new`".

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// The seven SI base dimensions, in canonical order.
pub const BASE_DIMS: [&str; 7] = ["m", "kg", "s", "A", "K", "mol", "cd"];

/// A unit expressed as a scale factor (relative to SI base units) and a
/// vector of exponents over [`BASE_DIMS`].
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    /// Human-readable symbol, e.g. `"MJ"`, `"MJ/hour"`, `""` for dimensionless.
    pub symbol: String,
    /// Multiplicative factor to convert a magnitude in this unit to SI base
    /// units, e.g. `"MJ"` has `scale = 1.0e6` (joules).
    pub scale: f64,
    /// Exponents of the SI base dimensions.
    pub exponents: [i8; 7],
}

impl Unit {
    pub fn dimensionless() -> Self {
        Unit {
            symbol: String::new(),
            scale: 1.0,
            exponents: [0; 7],
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.exponents.iter().all(|&e| e == 0)
    }

    pub fn compatible_with(&self, other: &Unit) -> bool {
        self.exponents == other.exponents
    }

    /// Factor to multiply a magnitude in `self` by to get the equivalent
    /// magnitude in `other`. Errors if the units are not dimension-compatible.
    pub fn conversion_factor_to(&self, other: &Unit) -> Result<f64> {
        if !self.compatible_with(other) {
            return Err(Error::IncompatibleUnits(format!(
                "cannot convert {self} to {other}"
            )));
        }
        Ok(self.scale / other.scale)
    }

    pub fn mul(&self, other: &Unit) -> Unit {
        let mut exponents = [0i8; 7];
        for i in 0..7 {
            exponents[i] = self.exponents[i] + other.exponents[i];
        }
        Unit {
            symbol: combine_symbol(&self.symbol, &other.symbol, 1),
            scale: self.scale * other.scale,
            exponents,
        }
    }

    pub fn div(&self, other: &Unit) -> Unit {
        let mut exponents = [0i8; 7];
        for i in 0..7 {
            exponents[i] = self.exponents[i] - other.exponents[i];
        }
        Unit {
            symbol: combine_symbol(&self.symbol, &other.symbol, -1),
            scale: self.scale / other.scale,
            exponents,
        }
    }

    pub fn pow(&self, n: i32) -> Unit {
        let mut exponents = [0i8; 7];
        for i in 0..7 {
            exponents[i] = (self.exponents[i] as i32 * n) as i8;
        }
        let symbol = if self.symbol.is_empty() {
            String::new()
        } else {
            format!("{}^{}", self.symbol, n)
        };
        Unit {
            symbol,
            scale: self.scale.powi(n),
            exponents,
        }
    }
}

fn combine_symbol(a: &str, b: &str, sign: i32) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => String::new(),
        (false, true) => a.to_string(),
        (true, false) if sign > 0 => b.to_string(),
        (true, false) => format!("1/{b}"),
        (false, false) if sign > 0 => format!("{a}*{b}"),
        (false, false) => format!("{a}/{b}"),
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.symbol.is_empty() {
            write!(f, "dimensionless")
        } else {
            write!(f, "{}", self.symbol)
        }
    }
}

/// Per-[`crate::Computer`] unit environment: known unit definitions plus a
/// table of unit-string replacements applied before lookup, replacing the
/// process-wide `pint` registry and `REPLACE_UNITS` table of the original
/// implementation (spec.md §5, §9).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    defined: Arc<BTreeMap<String, Unit>>,
    replace: Arc<BTreeMap<String, String>>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        let mut defined = BTreeMap::new();
        for (sym, scale, dim_idx) in [
            ("m", 1.0, 0),
            ("kg", 1.0, 1),
            ("g", 1.0e-3, 1),
            ("s", 1.0, 2),
            ("sec", 1.0, 2),
            ("minute", 60.0, 2),
            ("hour", 3600.0, 2),
            ("day", 86400.0, 2),
            ("A", 1.0, 3),
            ("K", 1.0, 4),
            ("mol", 1.0, 5),
            ("cd", 1.0, 6),
        ] {
            let mut exponents = [0i8; 7];
            exponents[dim_idx] = 1;
            defined.insert(
                sym.to_string(),
                Unit {
                    symbol: sym.to_string(),
                    scale,
                    exponents,
                },
            );
        }
        // Derived energy/power units in common use by the test suite.
        defined.insert(
            "J".into(),
            Unit {
                symbol: "J".into(),
                scale: 1.0,
                exponents: [2, 1, -2, 0, 0, 0, 0],
            },
        );
        defined.insert(
            "MJ".into(),
            Unit {
                symbol: "MJ".into(),
                scale: 1.0e6,
                exponents: [2, 1, -2, 0, 0, 0, 0],
            },
        );
        defined.insert(
            "W".into(),
            Unit {
                symbol: "W".into(),
                scale: 1.0,
                exponents: [2, 1, -3, 0, 0, 0, 0],
            },
        );
        EnvConfig {
            defined: Arc::new(defined),
            replace: Arc::new(BTreeMap::new()),
        }
    }
}

impl EnvConfig {
    /// Apply a pint-syntax-like block of definitions, one per line:
    /// `symbol = scale * base_symbol [/ base_symbol...]`. Unsupported lines
    /// are logged and skipped, matching the source's tolerant
    /// `pint.DefinitionSyntaxError` handling (`genno/config.py:343`).
    pub fn define(&mut self, block: &str) {
        let mut defined = (*self.defined).clone();
        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_definition(line, &defined) {
                Some((name, unit)) => {
                    defined.insert(name, unit);
                }
                None => log::warn!("could not parse unit definition: {line:?}"),
            }
        }
        self.defined = Arc::new(defined);
    }

    /// Register a unit-string replacement, applied before lookup
    /// (`genno/config.py:349`, `REPLACE_UNITS`).
    pub fn replace(&mut self, old: impl Into<String>, new: impl Into<String>) {
        let mut replace = (*self.replace).clone();
        replace.insert(old.into(), new.into());
        self.replace = Arc::new(replace);
    }

    /// Resolve a unit expression string to a [`Unit`]. Supports a bare
    /// symbol, `a*b`, `a/b`, and `a^n`.
    pub fn parse(&self, expr: &str) -> Result<Unit> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Unit::dimensionless());
        }
        let expr = self.replace.get(expr).map(|s| s.as_str()).unwrap_or(expr);

        if let Some((num, den)) = expr.split_once('/') {
            let n = self.parse(num)?;
            let d = self.parse(den)?;
            return Ok(n.div(&d));
        }
        let mut acc: Option<Unit> = None;
        for factor in expr.split('*') {
            let u = self.parse_factor(factor.trim())?;
            acc = Some(match acc {
                Some(a) => a.mul(&u),
                None => u,
            });
        }
        Ok(acc.unwrap_or_else(Unit::dimensionless))
    }

    fn parse_factor(&self, expr: &str) -> Result<Unit> {
        if let Some((base, exp)) = expr.split_once('^') {
            let n: i32 = exp
                .parse()
                .map_err(|_| Error::IncompatibleUnits(format!("bad exponent in {expr:?}")))?;
            return Ok(self.lookup(base.trim())?.pow(n));
        }
        self.lookup(expr)
    }

    fn lookup(&self, symbol: &str) -> Result<Unit> {
        if symbol.is_empty() {
            return Ok(Unit::dimensionless());
        }
        self.defined
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::IncompatibleUnits(format!("unknown unit {symbol:?}")))
    }
}

fn parse_definition(line: &str, existing: &BTreeMap<String, Unit>) -> Option<(String, Unit)> {
    let (name, rhs) = line.split_once('=')?;
    let name = name.trim().to_string();
    let rhs = rhs.trim();
    let (scale_str, base) = rhs.split_once('*').unwrap_or(("1", rhs));
    let scale: f64 = scale_str.trim().parse().ok()?;
    let base_unit = existing.get(base.trim())?;
    Some((
        name.clone(),
        Unit {
            symbol: name,
            scale: scale * base_unit.scale,
            exponents: base_unit.exponents,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_round_trip() {
        let env = EnvConfig::default();
        let mj = env.parse("MJ").unwrap();
        let j = env.parse("J").unwrap();
        let factor = mj.conversion_factor_to(&j).unwrap();
        assert!((factor - 1.0e6).abs() < 1e-9);
        // round trip
        let back = j.conversion_factor_to(&mj).unwrap();
        assert!((factor * back - 1.0).abs() < 1e-9);
    }

    #[test]
    fn division_builds_compound_unit() {
        let env = EnvConfig::default();
        let mj = env.parse("MJ").unwrap();
        let hour = env.parse("hour").unwrap();
        let power = mj.div(&hour);
        assert_eq!(power.symbol, "MJ/hour");
    }

    #[test]
    fn incompatible_units_rejected() {
        let env = EnvConfig::default();
        let mj = env.parse("MJ").unwrap();
        let kg = env.parse("kg").unwrap();
        assert!(mj.conversion_factor_to(&kg).is_err());
    }
}
