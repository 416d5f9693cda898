//! Input handlers: turn a caller's value source into SQL plus parameters.
//!
//! Every handler exposes a named-parameter template and a [`ParameterSet`];
//! [`InputHandler::resolve`] encodes the template and lines the parameters up
//! in placeholder order, failing on any name the set cannot satisfy.

use serde::Serialize;

use crate::bean::{to_named_values, type_label};
use crate::builder::{build_query_with, count_placeholders, restyle, EncodedQuery, PlaceholderStyle};
use crate::error::{Error, Result, TemplateError};
use crate::params::{NamedValueMap, Parameter, ParameterSet, Source};
use crate::value::Value;

/// SQL ready to prepare, with one parameter per placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub query: EncodedQuery,
    pub parameters: ParameterSet,
}

/// Lines `params` up with the placeholders of `query`. Repeated names repeat.
///
/// # Errors
///
/// `MissingParameter` for the first name `params` does not contain.
pub fn positional(query: &EncodedQuery, params: &ParameterSet) -> Result<ParameterSet> {
    let mut ordered = ParameterSet::with_capacity(query.order.len());
    for name in &query.order {
        let param = params.get(name).ok_or_else(|| Error::MissingParameter {
            name: name.clone(),
            expected: query.order.len(),
            supplied: params.len(),
        })?;
        ordered.push(param.clone());
    }
    Ok(ordered)
}

/// A named-parameter template plus the values that fill it.
///
/// Implementors supply [`sql`](Self::sql) and
/// [`parameters`](Self::parameters); the provided
/// [`resolve`](Self::resolve) encodes the template for the connection's
/// placeholder style and orders the values to match.
///
/// # Examples
///
/// ```
/// use sqlx_named_runner::builder::PlaceholderStyle;
/// use sqlx_named_runner::input::{InputHandler, MapInput};
/// use sqlx_named_runner::value::Value;
///
/// let input = MapInput::new(
///     "UPDATE cats SET age = :age WHERE name = :name",
///     [("name", Value::from("tom")), ("age", Value::from(4))],
/// );
/// let resolved = input.resolve(PlaceholderStyle::Dollar)?;
/// assert_eq!(resolved.query.sql, "UPDATE cats SET age = $1 WHERE name = $2");
/// assert_eq!(resolved.parameters.to_string(), "{age=4, name='tom'}");
/// # Ok::<(), sqlx_named_runner::Error>(())
/// ```
pub trait InputHandler {
    /// The named-parameter template.
    fn sql(&self) -> &str;

    /// Every value this handler can supply, keyed by name.
    fn parameters(&self) -> Result<ParameterSet>;

    fn resolve(&self, style: PlaceholderStyle) -> Result<ResolvedInput> {
        let query = build_query_with(self.sql(), style)?;
        let params = self.parameters()?;
        let parameters = positional(&query, &params)?;
        Ok(ResolvedInput { query, parameters })
    }
}

impl InputHandler for str {
    fn sql(&self) -> &str {
        self
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::new())
    }
}

impl InputHandler for String {
    fn sql(&self) -> &str {
        self
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::new())
    }
}

impl<H: InputHandler + ?Sized> InputHandler for &H {
    fn sql(&self) -> &str {
        (**self).sql()
    }

    fn parameters(&self) -> Result<ParameterSet> {
        (**self).parameters()
    }

    fn resolve(&self, style: PlaceholderStyle) -> Result<ResolvedInput> {
        (**self).resolve(style)
    }
}

fn collect_map<K, V, I>(values: I) -> NamedValueMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    values
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Values from plain key/value pairs, passed through unmodified.
#[derive(Debug, Clone)]
pub struct MapInput {
    sql: String,
    values: NamedValueMap,
}

impl MapInput {
    pub fn new<K, V, I>(sql: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            sql: sql.into(),
            values: collect_map(values),
        }
    }
}

impl InputHandler for MapInput {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::from_map(&self.values))
    }
}

/// Values from a record's fields.
#[derive(Debug, Clone)]
pub struct BeanInput<T> {
    sql: String,
    bean: T,
}

impl<T: Serialize> BeanInput<T> {
    pub fn new(sql: impl Into<String>, bean: T) -> Self {
        Self {
            sql: sql.into(),
            bean,
        }
    }
}

impl<T: Serialize> InputHandler for BeanInput<T> {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::from_map(&to_named_values(&self.bean)?))
    }
}

/// A pre-built parameter set; the way to declare OUT / INOUT parameters.
#[derive(Debug, Clone)]
pub struct ParamsInput {
    sql: String,
    params: ParameterSet,
}

impl ParamsInput {
    pub fn new(sql: impl Into<String>, params: ParameterSet) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl InputHandler for ParamsInput {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(self.params.clone())
    }
}

/// Already-positional SQL and its values in order. Named tokens are
/// rejected; the values are named `param1`, `param2`, ...
#[derive(Debug, Clone)]
pub struct ArrayInput {
    sql: String,
    values: Vec<Value>,
}

impl ArrayInput {
    pub fn new<V, I>(sql: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            sql: sql.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl InputHandler for ArrayInput {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| Parameter::new(&format!("param{}", i + 1), v.clone()))
            .collect())
    }

    fn resolve(&self, style: PlaceholderStyle) -> Result<ResolvedInput> {
        let placeholders = count_placeholders(&self.sql)?;
        if placeholders != self.values.len() {
            return Err(Error::ParameterCountMismatch {
                expected: placeholders,
                actual: self.values.len(),
            });
        }
        let parameters = self.parameters()?;
        Ok(ResolvedInput {
            query: EncodedQuery {
                sql: restyle(&self.sql, style)?,
                order: parameters.names().map(str::to_owned).collect(),
            },
            parameters,
        })
    }
}

/// Several sources merged into one parameter set. Records are namespaced by
/// their type name (`:cat.name`), aliased maps by their alias; the first
/// source to supply a non-null value for a name wins.
#[derive(Debug, Clone)]
pub struct MergedInput {
    sql: String,
    sources: Vec<Source>,
}

impl MergedInput {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            sources: Vec::new(),
        }
    }

    /// Adds pairs under their own names.
    pub fn map<K, V, I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.sources.push(Source::bare(collect_map(values)));
        self
    }

    /// Adds pairs as `alias.key`.
    pub fn aliased<K, V, I>(mut self, alias: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.sources.push(Source::labeled(alias, collect_map(values)));
        self
    }

    /// Adds a record's fields as `typename.field`.
    pub fn bean<T: Serialize>(self, bean: &T) -> Result<Self> {
        self.bean_as(&type_label::<T>(), bean)
    }

    /// Adds a record's fields as `alias.field`.
    pub fn bean_as<T: Serialize>(mut self, alias: &str, bean: &T) -> Result<Self> {
        self.sources
            .push(Source::labeled(alias, to_named_values(bean)?));
        Ok(self)
    }
}

impl InputHandler for MergedInput {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::merge(self.sources.iter().cloned()))
    }
}

/// A batch: one template, one parameter set per row.
///
/// Every row is ordered against the same encoded query, and a row missing a
/// referenced name fails the whole batch before anything is sent.
///
/// # Examples
///
/// ```
/// use sqlx_named_runner::builder::PlaceholderStyle;
/// use sqlx_named_runner::input::{BatchInput, MapListInput};
///
/// let mut students = MapListInput::new(
///     "INSERT INTO students (name, age) VALUES (:name, :age)",
///     Vec::new(),
/// );
/// students.push([("name", "alice")]);
/// students.push([("name", "bob")]);
/// assert!(students.resolve_rows(PlaceholderStyle::QuestionMark).is_err());
/// ```
pub trait BatchInput {
    fn sql(&self) -> &str;

    fn rows(&self) -> Result<Vec<ParameterSet>>;

    fn resolve_rows(&self, style: PlaceholderStyle) -> Result<(EncodedQuery, Vec<ParameterSet>)> {
        let query = build_query_with(self.sql(), style)?;
        let rows = self
            .rows()?
            .iter()
            .map(|row| positional(&query, row))
            .collect::<Result<Vec<_>>>()?;
        Ok((query, rows))
    }
}

#[derive(Debug, Clone)]
pub struct MapListInput {
    sql: String,
    rows: Vec<NamedValueMap>,
}

impl MapListInput {
    pub fn new(sql: impl Into<String>, rows: Vec<NamedValueMap>) -> Self {
        Self {
            sql: sql.into(),
            rows,
        }
    }

    pub fn push<K, V, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.rows.push(collect_map(values));
    }
}

impl BatchInput for MapListInput {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn rows(&self) -> Result<Vec<ParameterSet>> {
        Ok(self.rows.iter().map(ParameterSet::from_map).collect())
    }
}

#[derive(Debug, Clone)]
pub struct BeanListInput<T> {
    sql: String,
    beans: Vec<T>,
}

impl<T: Serialize> BeanListInput<T> {
    pub fn new(sql: impl Into<String>, beans: Vec<T>) -> Self {
        Self {
            sql: sql.into(),
            beans,
        }
    }
}

impl<T: Serialize> BatchInput for BeanListInput<T> {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn rows(&self) -> Result<Vec<ParameterSet>> {
        self.beans
            .iter()
            .map(|bean| Ok(ParameterSet::from_map(&to_named_values(bean)?)))
            .collect()
    }
}

/// Resolves several single-row handlers as one batch.
///
/// # Errors
///
/// `MixedBatch` when the handlers do not share one template.
pub fn resolve_batch<H: InputHandler>(
    handlers: &[H],
    style: PlaceholderStyle,
) -> Result<(EncodedQuery, Vec<ParameterSet>)> {
    let Some(first) = handlers.first() else {
        return Err(TemplateError::NullTemplate.into());
    };
    let mut rows = Vec::with_capacity(handlers.len());
    let mut query = None;
    for handler in handlers {
        if handler.sql() != first.sql() {
            return Err(TemplateError::MixedBatch {
                expected: first.sql().to_owned(),
                found: handler.sql().to_owned(),
            }
            .into());
        }
        let resolved = handler.resolve(style)?;
        rows.push(resolved.parameters);
        query.get_or_insert(resolved.query);
    }
    let query = query.ok_or(TemplateError::NullTemplate)?;
    Ok((query, rows))
}
