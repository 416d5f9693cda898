//! Output handlers shape unwrapped rows into what the caller asked for.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::bean::from_row;
use crate::error::{Error, Result};
use crate::params::ParameterSet;
use crate::value::Value;

/// Rows keyed by lower-cased column name, either buffered or streamed from a
/// live statement.
pub trait RowSource {
    fn next_row(&mut self) -> Result<Option<ParameterSet>>;
}

impl RowSource for std::vec::IntoIter<ParameterSet> {
    fn next_row(&mut self) -> Result<Option<ParameterSet>> {
        Ok(self.next())
    }
}

/// Turns the rows of one result set into a caller-facing value.
///
/// Implement it to shape rows in a way the built-in handlers do not.
///
/// # Examples
///
/// ```
/// use sqlx_named_runner::error::Result;
/// use sqlx_named_runner::output::{OutputHandler, RowSource};
/// use sqlx_named_runner::params::ParameterSet;
/// use sqlx_named_runner::value::Value;
///
/// /// Counts rows without keeping them.
/// struct RowCount;
///
/// impl OutputHandler for RowCount {
///     type Output = usize;
///
///     fn handle(&self, rows: &mut dyn RowSource) -> Result<usize> {
///         let mut count = 0;
///         while rows.next_row()?.is_some() {
///             count += 1;
///         }
///         Ok(count)
///     }
/// }
///
/// let mut row = ParameterSet::new();
/// row.set("id", Value::Int(1));
/// let mut rows = vec![row.clone(), row].into_iter();
/// assert_eq!(RowCount.handle(&mut rows)?, 2);
/// # Ok::<(), sqlx_named_runner::Error>(())
/// ```
pub trait OutputHandler {
    type Output;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output>;
}

impl<H: OutputHandler + ?Sized> OutputHandler for &H {
    type Output = H::Output;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        (**self).handle(rows)
    }
}

/// First row, as an ordered column → value set.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapHandler;

impl OutputHandler for MapHandler {
    type Output = Option<ParameterSet>;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        rows.next_row()
    }
}

/// Every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapListHandler;

impl OutputHandler for MapListHandler {
    type Output = Vec<ParameterSet>;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        let mut all = Vec::new();
        while let Some(row) = rows.next_row()? {
            all.push(row);
        }
        Ok(all)
    }
}

/// First row, deserialized into `T`.
pub struct BeanHandler<T> {
    _pd: PhantomData<fn() -> T>,
}

impl<T> BeanHandler<T> {
    pub fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<T> Default for BeanHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> OutputHandler for BeanHandler<T> {
    type Output = Option<T>;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        rows.next_row()?.as_ref().map(from_row).transpose()
    }
}

/// Every row, deserialized into `T`.
pub struct BeanListHandler<T> {
    _pd: PhantomData<fn() -> T>,
}

impl<T> BeanListHandler<T> {
    pub fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<T> Default for BeanListHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> OutputHandler for BeanListHandler<T> {
    type Output = Vec<T>;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        let mut all = Vec::new();
        while let Some(row) = rows.next_row()? {
            all.push(from_row(&row)?);
        }
        Ok(all)
    }
}

fn pick(row: &ParameterSet, column: Option<&str>) -> Result<Value> {
    match column {
        Some(name) => row
            .value(name)
            .cloned()
            .ok_or_else(|| Error::Conversion(format!("no column '{name}' in result"))),
        None => Ok(row.at(0)?.value.clone()),
    }
}

/// One value of the first row: the named column, or the first one.
#[derive(Debug, Clone, Default)]
pub struct ScalarHandler {
    column: Option<String>,
}

impl ScalarHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(name: impl Into<String>) -> Self {
        Self {
            column: Some(name.into()),
        }
    }
}

impl OutputHandler for ScalarHandler {
    type Output = Option<Value>;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        rows.next_row()?
            .map(|row| pick(&row, self.column.as_deref()))
            .transpose()
    }
}

/// One column of every row.
#[derive(Debug, Clone, Default)]
pub struct ColumnListHandler {
    column: Option<String>,
}

impl ColumnListHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(name: impl Into<String>) -> Self {
        Self {
            column: Some(name.into()),
        }
    }
}

impl OutputHandler for ColumnListHandler {
    type Output = Vec<Value>;

    fn handle(&self, rows: &mut dyn RowSource) -> Result<Self::Output> {
        let mut values = Vec::new();
        while let Some(row) = rows.next_row()? {
            values.push(pick(&row, self.column.as_deref())?);
        }
        Ok(values)
    }
}
