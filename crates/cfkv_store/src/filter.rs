//! Single-column predicates and value-type comparison semantics.
//!
//! A scan filter is a conjunction of [`Predicate`]s; an empty list means no
//! filtering. Each predicate compares the cell at one column against a
//! literal using the ordering of a [`ValueType`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Column, Row};

/// Declared value type of a column, used only for comparison semantics.
///
/// Integer and float types compare numerically when both operands parse as
/// decimal text and fall back to raw bytes otherwise. Unrecognised type names
/// decode as [`ValueType::Bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Int,
    Long,
    Short,
    Byte,
    Float,
    Double,
    Char,
    #[default]
    #[serde(other)]
    Bytes,
}

impl ValueType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "int" | "integer" => Self::Int,
            "long" => Self::Long,
            "short" => Self::Short,
            "byte" => Self::Byte,
            "float" => Self::Float,
            "double" => Self::Double,
            "char" => Self::Char,
            _ => Self::Bytes,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Short | Self::Byte)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Orders `left` against `right` under this type's semantics.
    pub fn compare(self, left: &[u8], right: &[u8]) -> Ordering {
        if self.is_integer() {
            if let (Some(l), Some(r)) = (parse_integer(left), parse_integer(right)) {
                return l.cmp(&r);
            }
        } else if self.is_float() {
            if let (Some(l), Some(r)) = (parse_float(left), parse_float(right)) {
                if let Some(ordering) = l.partial_cmp(&r) {
                    return ordering;
                }
            }
        }
        left.cmp(right)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Short => "short",
            Self::Byte => "byte",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// Decimal text as `i64`, if the bytes are one.
pub fn parse_integer(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse::<i64>().ok()
}

/// Decimal text as a non-NaN `f64`, if the bytes are one.
pub fn parse_float(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes)
        .ok()?
        .parse::<f64>()
        .ok()
        .filter(|value| !value.is_nan())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::Less => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Greater => ordering == Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
        }
    }
}

/// One column condition of a scan filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Equality {
        column: Column,
        literal: Vec<u8>,
        value_type: Option<ValueType>,
    },
    Comparison {
        column: Column,
        op: CompareOp,
        literal: Vec<u8>,
        value_type: Option<ValueType>,
    },
}

impl Predicate {
    pub fn equals(
        family: impl Into<String>,
        qualifier: impl Into<String>,
        literal: impl Into<Vec<u8>>,
    ) -> Self {
        Self::Equality {
            column: Column::new(family, qualifier),
            literal: literal.into(),
            value_type: None,
        }
    }

    /// Builds a predicate for any operator; `Equal` becomes [`Predicate::Equality`].
    pub fn compare(
        family: impl Into<String>,
        qualifier: impl Into<String>,
        op: CompareOp,
        literal: impl Into<Vec<u8>>,
    ) -> Self {
        let column = Column::new(family, qualifier);
        let literal = literal.into();
        match op {
            CompareOp::Equal => Self::Equality {
                column,
                literal,
                value_type: None,
            },
            op => Self::Comparison {
                column,
                op,
                literal,
                value_type: None,
            },
        }
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        match &mut self {
            Self::Equality { value_type: ty, .. } | Self::Comparison { value_type: ty, .. } => {
                *ty = Some(value_type)
            }
        }
        self
    }

    pub fn column(&self) -> &Column {
        match self {
            Self::Equality { column, .. } | Self::Comparison { column, .. } => column,
        }
    }

    pub fn op(&self) -> CompareOp {
        match self {
            Self::Equality { .. } => CompareOp::Equal,
            Self::Comparison { op, .. } => *op,
        }
    }

    pub fn literal(&self) -> &[u8] {
        match self {
            Self::Equality { literal, .. } | Self::Comparison { literal, .. } => literal,
        }
    }

    /// Value type set explicitly on the predicate, if any.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Equality { value_type, .. } | Self::Comparison { value_type, .. } => *value_type,
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, Self::Equality { .. })
    }

    /// Evaluates against `row` with the given semantics. A missing cell never
    /// matches, whatever the operator.
    pub fn evaluate(&self, row: &Row, value_type: ValueType) -> bool {
        match row.cell(self.column()) {
            Some(cell) => self
                .op()
                .matches(value_type.compare(&cell.value, self.literal())),
            None => false,
        }
    }

    /// Evaluates with the predicate's own type, or raw bytes when unset.
    pub fn matches(&self, row: &Row) -> bool {
        self.evaluate(row, self.value_type().unwrap_or_default())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.column(),
            self.op().symbol(),
            String::from_utf8_lossy(self.literal())
        )
    }
}

/// Logical AND of `predicates` over `row`; true for an empty list.
pub fn matches_all(predicates: &[Predicate], row: &Row) -> bool {
    predicates.iter().all(|predicate| predicate.matches(row))
}
