//! Hyperparameter grids and their Cartesian expansion.
//!
//! A grid is an ordered list of named axes. Expansion follows product order
//! with the **last** axis varying fastest, so combination `i` is stable for a
//! given grid and can be recomputed from its index alone:
//!
//! ```text
//! axes:  cl = [25, 30, None]   ch = [72.2, 60]   sample_method = [balance, extreme, average]
//!
//! 0: (25.0, 72.2, 'balance')
//! 1: (25.0, 72.2, 'extreme')
//! 2: (25.0, 72.2, 'average')
//! 3: (25.0, 60.0, 'balance')
//! ...
//! 17: (None, 60.0, 'average')
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A typed hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Numeric view; integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("None"),
            ParamValue::Int(v) => write!(f, "{v}"),
            // Debug keeps the trailing `.0` on whole floats
            ParamValue::Float(v) => write!(f, "{v:?}"),
            ParamValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// One named axis of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamAxis {
    pub name: String,
    pub values: Vec<ParamValue>,
}

impl ParamAxis {
    pub fn new<V: Into<ParamValue>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Ordered axes whose product is the set of combinations to evaluate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterGrid {
    axes: Vec<ParamAxis>,
}

impl ParameterGrid {
    /// Build a grid. Every axis must hold at least one value, names must
    /// be unique and the number of combinations must fit in a `usize`.
    pub fn new(axes: Vec<ParamAxis>) -> Result<Self, ConfigError> {
        for (i, axis) in axes.iter().enumerate() {
            if axis.values.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "grid axis `{}` has no values",
                    axis.name
                )));
            }
            if axes[..i].iter().any(|a| a.name == axis.name) {
                return Err(ConfigError::Invalid(format!(
                    "grid axis `{}` appears twice",
                    axis.name
                )));
            }
        }
        let total = axes
            .iter()
            .try_fold(1usize, |n, axis| n.checked_mul(axis.values.len()));
        if total.is_none() {
            return Err(ConfigError::Invalid(format!(
                "grid of {} axes has too many combinations to enumerate",
                axes.len()
            )));
        }
        Ok(Self { axes })
    }

    pub fn axes(&self) -> &[ParamAxis] {
        &self.axes
    }

    /// Number of combinations. Cannot overflow: `new` checks the product.
    pub fn len(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The combination at `index`, or `None` past the end.
    pub fn combination(&self, index: usize) -> Option<Combination> {
        if index >= self.len() {
            return None;
        }
        // Linear index to multi-index, last axis fastest
        let mut remaining = index;
        let mut picks = vec![0usize; self.axes.len()];
        for (slot, axis) in picks.iter_mut().zip(&self.axes).rev() {
            *slot = remaining % axis.values.len();
            remaining /= axis.values.len();
        }

        let fields = self
            .axes
            .iter()
            .zip(picks)
            .map(|(axis, pick)| (axis.name.clone(), axis.values[pick].clone()))
            .collect();
        Some(Combination { fields })
    }

    /// All combinations in product order.
    pub fn expand(&self) -> Vec<Combination> {
        (0..self.len()).filter_map(|i| self.combination(i)).collect()
    }
}

/// An ordered tuple of named hyperparameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combination {
    fields: Vec<(String, ParamValue)>,
}

impl Combination {
    pub fn new(fields: Vec<(String, ParamValue)>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, ParamValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Tuple label used as the summary row key, e.g. `(None, 72.2, 'balance')`.
    pub fn label(&self) -> String {
        let parts: Vec<String> = self.fields.iter().map(|(_, v)| v.to_string()).collect();
        if parts.len() == 1 {
            format!("({},)", parts[0])
        } else {
            format!("({})", parts.join(", "))
        }
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ro_grid() -> ParameterGrid {
        ParameterGrid::new(vec![
            ParamAxis::new("cl", [Some(25.0), Some(30.0), None]),
            ParamAxis::new("ch", [72.2, 60.0]),
            ParamAxis::new("sample_method", ["balance", "extreme", "average"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_len_is_product() {
        assert_eq!(ro_grid().len(), 18);
        assert_eq!(ro_grid().expand().len(), 18);
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let axes: Vec<ParamAxis> = (0..65)
            .map(|i| ParamAxis::new(format!("a{i}"), [1.0, 2.0]))
            .collect();
        let err = ParameterGrid::new(axes).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err}");

        let axes: Vec<ParamAxis> = (0..20)
            .map(|i| ParamAxis::new(format!("a{i}"), [1.0, 2.0]))
            .collect();
        assert_eq!(ParameterGrid::new(axes).unwrap().len(), 1 << 20);
    }

    #[test]
    fn test_last_axis_varies_fastest() {
        let combos = ro_grid().expand();
        assert_eq!(combos[0].label(), "(25.0, 72.2, 'balance')");
        assert_eq!(combos[1].label(), "(25.0, 72.2, 'extreme')");
        assert_eq!(combos[3].label(), "(25.0, 60.0, 'balance')");
        assert_eq!(combos[17].label(), "(None, 60.0, 'average')");
    }

    #[test]
    fn test_combination_by_index_matches_expand() {
        let grid = ro_grid();
        for (i, c) in grid.expand().iter().enumerate() {
            assert_eq!(grid.combination(i).as_ref(), Some(c));
        }
        assert!(grid.combination(18).is_none());
    }

    #[test]
    fn test_empty_axis_rejected() {
        let err = ParameterGrid::new(vec![ParamAxis::new("k", Vec::<i64>::new())]);
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_axis_rejected() {
        let err = ParameterGrid::new(vec![
            ParamAxis::new("k", [5i64]),
            ParamAxis::new("k", [10i64]),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_field_lookup() {
        let c = ro_grid().combination(12).unwrap();
        assert!(c.get("cl").unwrap().is_null());
        assert_eq!(c.get("ch").and_then(|v| v.as_f64()), Some(72.2));
        assert_eq!(c.get("sample_method").and_then(|v| v.as_str()), Some("balance"));
        assert!(c.get("k").is_none());
    }

    #[test]
    fn test_combination_bincode_roundtrip() {
        let c = ro_grid().combination(5).unwrap();
        let bytes = bincode::serialize(&c).unwrap();
        let back: Combination = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, c);
    }
}
