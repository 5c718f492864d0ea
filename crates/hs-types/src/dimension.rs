//! Hyperparameter dimensions and the values drawn from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HsResult, SpaceError};

/// Sampling prior for real-valued dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Prior {
    Uniform,
    LogUniform,
}

impl Default for Prior {
    fn default() -> Self {
        Self::Uniform
    }
}

impl std::fmt::Display for Prior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::LogUniform => write!(f, "log-uniform"),
        }
    }
}

impl std::str::FromStr for Prior {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Self::Uniform),
            "log-uniform" => Ok(Self::LogUniform),
            _ => Err(()),
        }
    }
}

/// The domain of a single hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionKind {
    /// Integer range [low, high] inclusive.
    Integer { low: i64, high: i64 },
    /// Real range [low, high], sampled according to `prior`.
    Real { low: f64, high: f64, prior: Prior },
    /// Ordered category list with optional per-category probabilities.
    Categorical {
        values: Vec<Value>,
        prior: Option<Vec<f64>>,
    },
}

/// A named hyperparameter dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
}

impl Dimension {
    pub fn integer(name: impl Into<String>, low: i64, high: i64) -> HsResult<Self> {
        let name = name.into();
        if low >= high {
            return Err(SpaceError::InvertedBounds {
                name,
                low: low.to_string(),
                high: high.to_string(),
            }
            .into());
        }
        Ok(Self {
            name,
            kind: DimensionKind::Integer { low, high },
        })
    }

    pub fn real(name: impl Into<String>, low: f64, high: f64) -> HsResult<Self> {
        Self::real_with_prior(name, low, high, Prior::Uniform)
    }

    pub fn log_uniform(name: impl Into<String>, low: f64, high: f64) -> HsResult<Self> {
        Self::real_with_prior(name, low, high, Prior::LogUniform)
    }

    pub fn real_with_prior(
        name: impl Into<String>,
        low: f64,
        high: f64,
        prior: Prior,
    ) -> HsResult<Self> {
        let name = name.into();
        // NaN bounds fail this comparison as well.
        if !(low < high) {
            return Err(SpaceError::InvertedBounds {
                name,
                low: low.to_string(),
                high: high.to_string(),
            }
            .into());
        }
        if prior == Prior::LogUniform && low <= 0.0 {
            return Err(SpaceError::InvalidDimension {
                name,
                spec: format!("log-uniform prior requires positive bounds, got ({low}, {high})"),
            }
            .into());
        }
        Ok(Self {
            name,
            kind: DimensionKind::Real { low, high, prior },
        })
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Value>) -> HsResult<Self> {
        Self::categorical_with_prior(name, values, None)
    }

    pub fn categorical_with_prior(
        name: impl Into<String>,
        values: Vec<Value>,
        prior: Option<Vec<f64>>,
    ) -> HsResult<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(SpaceError::InvalidDimension {
                name,
                spec: "empty category list".to_string(),
            }
            .into());
        }
        if let Some(p) = &prior {
            if p.len() != values.len() || p.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(SpaceError::InvalidDimension {
                    name,
                    spec: format!(
                        "prior must hold {} non-negative weights, got {:?}",
                        values.len(),
                        p
                    ),
                }
                .into());
            }
        }
        Ok(Self {
            name,
            kind: DimensionKind::Categorical { values, prior },
        })
    }

    /// Interpret a raw dimension description.
    ///
    /// Accepted shapes:
    /// - `[low, high]` with two integers → integer range
    /// - `[low, high]` with at least one float → uniform real range
    /// - `[low, high, "uniform" | "log-uniform"]` → real range with prior
    /// - any list containing strings/bools, or any other list of three or more
    ///   entries → categories
    pub fn from_spec(name: impl Into<String>, spec: &Value) -> HsResult<Self> {
        let name = name.into();
        let invalid = |name: String| -> crate::HsError {
            SpaceError::InvalidDimension {
                name,
                spec: spec.to_string(),
            }
            .into()
        };

        let items = match spec.as_array() {
            Some(items) => items,
            None => return Err(invalid(name)),
        };

        match items.len() {
            2 => {
                if items.iter().any(|v| v.is_string() || v.is_boolean()) {
                    return Self::categorical(name, items.clone());
                }
                if items.iter().all(|v| v.is_i64()) {
                    let low = items[0].as_i64().unwrap_or_default();
                    let high = items[1].as_i64().unwrap_or_default();
                    return Self::integer(name, low, high);
                }
                match (items[0].as_f64(), items[1].as_f64()) {
                    (Some(low), Some(high)) => Self::real(name, low, high),
                    _ => Err(invalid(name)),
                }
            }
            3 => {
                let prior = items[2].as_str().and_then(|s| s.parse::<Prior>().ok());
                match (items[0].as_f64(), items[1].as_f64(), prior) {
                    (Some(low), Some(high), Some(prior)) => {
                        Self::real_with_prior(name, low, high, prior)
                    }
                    _ => Self::categorical(name, items.clone()),
                }
            }
            n if n > 3 => Self::categorical(name, items.clone()),
            _ => Err(invalid(name)),
        }
    }

    /// Human-readable bounds, used in error messages and logs.
    pub fn bounds_repr(&self) -> String {
        match &self.kind {
            DimensionKind::Integer { low, high } => format!("({low}, {high})"),
            DimensionKind::Real { low, high, prior } => format!("({low}, {high}, {prior})"),
            DimensionKind::Categorical { values, .. } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }

    /// Whether `value` lies inside this dimension.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (&self.kind, value) {
            (DimensionKind::Integer { low, high }, ParamValue::Int(v)) => v >= low && v <= high,
            (DimensionKind::Real { low, high, .. }, ParamValue::Real(v)) => {
                *v >= *low && *v <= *high
            }
            (DimensionKind::Categorical { values, .. }, ParamValue::Category(v)) => {
                values.contains(v)
            }
            _ => false,
        }
    }

    /// Raw bounds of this dimension.
    pub fn bound(&self) -> Bound {
        match &self.kind {
            DimensionKind::Integer { low, high } => Bound::Integer {
                low: *low,
                high: *high,
            },
            DimensionKind::Real { low, high, .. } => Bound::Real {
                low: *low,
                high: *high,
            },
            DimensionKind::Categorical { values, .. } => Bound::Categorical {
                values: values.clone(),
            },
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            DimensionKind::Integer { .. } => "Integer",
            DimensionKind::Real { .. } => "Real",
            DimensionKind::Categorical { .. } => "Categorical",
        };
        write!(f, "{}{}{}", self.name, kind, self.bounds_repr())
    }
}

/// Raw bounds of a dimension, without sampling metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Bound {
    Integer { low: i64, high: i64 },
    Real { low: f64, high: f64 },
    Categorical { values: Vec<Value> },
}

/// A concrete hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Int(i64),
    Real(f64),
    Category(Value),
}

impl ParamValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Category(v) => v.as_f64(),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Category(v) => write!(f, "{v}"),
        }
    }
}

/// One configuration: a value per dimension, in dimension order.
pub type Point = Vec<ParamValue>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_spec_parses() {
        let dim = Dimension::from_spec("trees", &json!([10, 200])).unwrap();
        assert_eq!(dim.kind, DimensionKind::Integer { low: 10, high: 200 });
    }

    #[test]
    fn mixed_numeric_spec_is_real() {
        let dim = Dimension::from_spec("x", &json!([0, 10.5])).unwrap();
        assert_eq!(
            dim.kind,
            DimensionKind::Real {
                low: 0.0,
                high: 10.5,
                prior: Prior::Uniform
            }
        );
    }

    #[test]
    fn prior_spec_parses() {
        let dim = Dimension::from_spec("lr", &json!([1e-5, 1e-1, "log-uniform"])).unwrap();
        match dim.kind {
            DimensionKind::Real { prior, .. } => assert_eq!(prior, Prior::LogUniform),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn string_pairs_and_long_lists_are_categorical() {
        let pair = Dimension::from_spec("act", &json!(["relu", "tanh"])).unwrap();
        assert!(matches!(pair.kind, DimensionKind::Categorical { .. }));

        let triple = Dimension::from_spec("depth", &json!([1, 2, 3])).unwrap();
        assert!(matches!(triple.kind, DimensionKind::Categorical { .. }));

        let long = Dimension::from_spec("opt", &json!(["a", "b", "c", "d"])).unwrap();
        match long.kind {
            DimensionKind::Categorical { values, .. } => assert_eq!(values.len(), 4),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn invalid_specs_are_rejected() {
        for spec in [json!(5), json!([1]), json!([]), json!({"low": 1})] {
            let err = Dimension::from_spec("bad", &spec).unwrap_err();
            assert!(
                matches!(err, crate::HsError::Space(SpaceError::InvalidDimension { .. })),
                "spec {spec} produced {err:?}"
            );
        }
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(Dimension::integer("n", 5, 5).is_err());
        assert!(Dimension::real("x", 1.0, 0.5).is_err());
        assert!(Dimension::log_uniform("lr", 0.0, 1.0).is_err());
    }

    #[test]
    fn contains_checks_kind_and_range() {
        let dim = Dimension::integer("n", 0, 10).unwrap();
        assert!(dim.contains(&ParamValue::Int(10)));
        assert!(!dim.contains(&ParamValue::Int(11)));
        assert!(!dim.contains(&ParamValue::Real(5.0)));
    }

    #[test]
    fn param_value_serialization_keeps_kind() {
        let point: Point = vec![
            ParamValue::Int(3),
            ParamValue::Real(3.0),
            ParamValue::Category(json!(3)),
        ];
        let json = serde_json::to_string(&point).unwrap();
        let back: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(point, back);
    }
}
