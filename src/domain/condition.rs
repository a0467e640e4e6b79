//! Strategy condition data structures.
//!
//! - `IndicatorRef`: a declared indicator name plus the component to read
//! - `Comparison`: threshold or crossover relation
//! - `Target`: literal value or another indicator's current value
//! - `Condition`: one `<ref> <comparison> <target>` clause

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::ParseError;
use crate::domain::indicator::IndicatorField;
use crate::domain::strategy_parser;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndicatorRef {
    pub name: String,
    pub field: IndicatorField,
}

impl IndicatorRef {
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: IndicatorField::Value,
        }
    }

    pub fn with_field(name: impl Into<String>, field: IndicatorField) -> Self {
        Self {
            name: name.into(),
            field,
        }
    }
}

impl fmt::Display for IndicatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.field {
            IndicatorField::Value => "",
            IndicatorField::MacdSignal => ".signal",
            IndicatorField::MacdHistogram => ".histogram",
            IndicatorField::BollingerUpper => ".upper",
            IndicatorField::BollingerLower => ".lower",
        };
        write!(f, "{}{}", self.name, suffix)
    }
}

impl TryFrom<String> for IndicatorRef {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        strategy_parser::parse_indicator_ref(&value)
    }
}

impl From<IndicatorRef> for String {
    fn from(value: IndicatorRef) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
    CrossesAbove,
    CrossesBelow,
}

impl Comparison {
    pub fn keyword(&self) -> &'static str {
        match self {
            Comparison::Above => "above",
            Comparison::Below => "below",
            Comparison::CrossesAbove => "crosses_above",
            Comparison::CrossesBelow => "crosses_below",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Value(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub indicator: IndicatorRef,
    pub comparison: Comparison,
    pub target: Target,
}

impl Condition {
    /// Every indicator name this condition reads.
    pub fn referenced_names(&self) -> impl Iterator<Item = &str> {
        let target = match &self.target {
            Target::Indicator(r) => Some(r.name.as_str()),
            Target::Value(_) => None,
        };
        std::iter::once(self.indicator.name.as_str()).chain(target)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.indicator, self.comparison.keyword())?;
        match &self.target {
            Target::Value(v) => write!(f, "{}", v),
            Target::Indicator(r) => write!(f, "{}", r),
        }
    }
}

/// How a list of condition results is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    All,
    Any,
}
