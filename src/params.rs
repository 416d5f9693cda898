use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::value::{Direction, SqlType, Value};

/// Plain name → value pairs produced by a value source (a map, or a record
/// run through [`crate::bean::to_named_values`]).
pub type NamedValueMap = BTreeMap<String, Value>;

/// One entry of a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    /// `None` when unknown; NULLs of unknown type bind as VARCHAR.
    pub sql_type: Option<SqlType>,
    pub direction: Direction,
}

impl Parameter {
    pub fn new(name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            name: name.to_lowercase(),
            sql_type: value.sql_type(),
            value,
            direction: Direction::In,
        }
    }

    pub fn typed(name: &str, value: impl Into<Value>, sql_type: SqlType, direction: Direction) -> Self {
        Self {
            name: name.to_lowercase(),
            value: value.into(),
            sql_type: Some(sql_type),
            direction,
        }
    }
}

/// A labelled value source taking part in [`ParameterSet::merge`].
#[derive(Debug, Clone, Default)]
pub struct Source {
    pub label: Option<String>,
    pub values: NamedValueMap,
}

impl Source {
    /// Keys are stored as-is.
    pub fn bare(values: NamedValueMap) -> Self {
        Self { label: None, values }
    }

    /// Keys are stored as `label.key`.
    pub fn labeled(label: impl Into<String>, values: NamedValueMap) -> Self {
        Self {
            label: Some(label.into()),
            values,
        }
    }
}

/// Ordered parameter container: insertion order is binding order, names are
/// lower-cased and matched case-insensitively, and the first entry wins on
/// lookup. Names may repeat (row data, repeated placeholders).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Builds an IN-only set from plain pairs.
    pub fn from_map(values: &NamedValueMap) -> Self {
        let mut set = Self::with_capacity(values.len());
        for (name, value) in values {
            set.set(name, value.clone());
        }
        set
    }

    /// Combines several sources. Labelled sources are namespaced as
    /// `label.key`. An existing entry is never overwritten by a later source
    /// unless it is NULL, so the first non-null writer wins.
    pub fn merge<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Source>,
    {
        let mut set = Self::new();
        for source in sources {
            for (key, value) in source.values {
                let name = match &source.label {
                    Some(label) => format!("{}.{}", label.to_lowercase(), key.to_lowercase()),
                    None => key.to_lowercase(),
                };
                match set.position(&name) {
                    Some(i) if set.entries[i].value.is_null() && !value.is_null() => {
                        set.entries[i].sql_type = value.sql_type();
                        set.entries[i].value = value;
                    }
                    Some(_) => {}
                    None => set.entries.push(Parameter::new(&name, value)),
                }
            }
        }
        set
    }

    /// Replaces the value of the first entry called `name`, or appends an IN
    /// entry. Direction and declared type of an existing entry are kept.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        match self.position(name) {
            Some(i) => {
                let entry = &mut self.entries[i];
                if entry.sql_type.is_none() {
                    entry.sql_type = value.sql_type();
                }
                entry.value = value;
            }
            None => self.entries.push(Parameter::new(name, value)),
        }
        self
    }

    /// Like [`set`](Self::set) but with explicit type and direction.
    pub fn set_typed(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        sql_type: SqlType,
        direction: Direction,
    ) -> &mut Self {
        let param = Parameter::typed(name, value, sql_type, direction);
        match self.position(name) {
            Some(i) => self.entries[i] = param,
            None => self.entries.push(param),
        }
        self
    }

    /// Declares an OUT parameter with no input value.
    pub fn set_out(&mut self, name: &str, sql_type: SqlType) -> &mut Self {
        self.set_typed(name, Value::Null, sql_type, Direction::Out)
    }

    /// Appends without looking for an existing entry, so the set may end up
    /// holding the same name twice. Lookups still see the first one.
    ///
    /// ```
    /// use sqlx_named_runner::params::{Parameter, ParameterSet};
    /// use sqlx_named_runner::value::Value;
    ///
    /// let mut row = ParameterSet::new();
    /// row.push(Parameter::new("id", 1));
    /// row.push(Parameter::new("ID", 2));
    /// assert_eq!(row.len(), 2);
    /// assert_eq!(row.value("id"), Some(&Value::Int(1)));
    /// ```
    pub fn push(&mut self, param: Parameter) {
        self.entries.push(Parameter {
            name: param.name.to_lowercase(),
            ..param
        });
    }

    /// First entry called `name`, compared case-insensitively.
    ///
    /// ```
    /// use sqlx_named_runner::params::ParameterSet;
    /// use sqlx_named_runner::value::{Direction, SqlType};
    ///
    /// let mut params = ParameterSet::new();
    /// params.set_out("Total", SqlType::Integer);
    /// let total = params.get("TOTAL").unwrap();
    /// assert_eq!(total.name, "total");
    /// assert_eq!(total.direction, Direction::Out);
    /// ```
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.position(name).map(|i| &self.entries[i])
    }

    /// Value of the first entry called `name`.
    ///
    /// ```
    /// use sqlx_named_runner::params::ParameterSet;
    /// use sqlx_named_runner::value::Value;
    ///
    /// let mut params = ParameterSet::new();
    /// params.set("studentName", "alice").set("age", 20);
    /// assert_eq!(params.value("studentname"), Some(&Value::from("alice")));
    /// assert_eq!(params.value("missing"), None);
    /// ```
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Entry at a 0-based position.
    pub fn at(&self, index: usize) -> Result<&Parameter> {
        self.entries.get(index).ok_or_else(|| {
            Error::Internal(format!(
                "parameter index {index} out of range (size {})",
                self.entries.len()
            ))
        })
    }

    /// Number of entries, repeats included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.entries.iter()
    }

    /// Entry names in binding order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }

    /// OUT and INOUT entries only, in binding order.
    ///
    /// ```
    /// use sqlx_named_runner::params::ParameterSet;
    /// use sqlx_named_runner::value::{Direction, SqlType};
    ///
    /// let mut params = ParameterSet::new();
    /// params
    ///     .set_typed("x", 5, SqlType::Integer, Direction::In)
    ///     .set_out("y", SqlType::Integer);
    /// assert_eq!(params.outputs().names().collect::<Vec<_>>(), vec!["y"]);
    /// ```
    pub fn outputs(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|p| p.direction.is_output())
                .cloned()
                .collect(),
        }
    }

    /// Plain pairs; repeated names keep their first value.
    pub fn to_map(&self) -> NamedValueMap {
        let mut map = NamedValueMap::new();
        for p in &self.entries {
            map.entry(p.name.clone()).or_insert_with(|| p.value.clone());
        }
        map
    }

    // Stored names are already lower-cased.
    fn position(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.entries.iter().position(|p| p.name == name)
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<Parameter> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = Parameter>>(iter: T) -> Self {
        let mut set = Self::new();
        for p in iter {
            set.push(p);
        }
        set
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, p) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match p.direction {
                Direction::In => write!(f, "{}={}", p.name, p.value)?,
                Direction::Out => write!(f, "{}=OUT", p.name)?,
                Direction::InOut => write!(f, "{}=INOUT {}", p.name, p.value)?,
            }
        }
        f.write_str("}")
    }
}
