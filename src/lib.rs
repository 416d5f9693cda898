//! # sqlx-named-runner
//!
//! A synchronous query runner with named parameters, built on SQLx.
//!
//! ## Features
//!
//! - **Named Placeholders**: Write `:param_name` and `:bean.field` instead of `?`; quotes and
//!   comments are left alone
//! - **Parameter Sets**: Ordered, case-insensitive, with IN / OUT / INOUT directions and
//!   first-writer-wins merging of several sources
//! - **Input and Output Handlers**: Maps, serde records, raw arrays and lists in; first row,
//!   all rows, records, scalars and columns out
//! - **Full Unwrapping**: Update counts, generated keys and every result set of a statement,
//!   eagerly or streamed on demand
//! - **Transactions**: A unit of work runs on one connection that it cannot close; failures
//!   roll back and report both errors if the rollback fails too
//! - **Diagnosable Errors**: Driver failures carry the SQL, the bound parameters and the
//!   vendor code, through a pluggable translator
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx-named-runner = "0.1"
//! serde = { version = "1.0", features = ["derive"] }
//! ```
//!
//! ## Examples
//!
//! ### Updates and Queries
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use sqlx_named_runner::prelude::*;
//!
//! #[derive(Deserialize)]
//! struct Cat {
//!     id: i64,
//!     name: String,
//! }
//!
//! # fn example() -> sqlx_named_runner::Result<()> {
//! let runner = QueryRunner::new(create_data_source(DataSourceConfig::new(
//!     "sqlite://cats.db?mode=rwc",
//! ))?);
//!
//! runner.update(&MapInput::new(
//!     "INSERT INTO cats (name, age) VALUES (:name, :age)",
//!     [("name", Value::from("whiskers")), ("age", Value::from(5))],
//! ))?;
//!
//! let cats: Vec<Cat> = runner.query(
//!     &MapInput::new("SELECT id, name FROM cats WHERE age >= :age", [("age", 5)]),
//!     &BeanListHandler::<Cat>::new(),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Transactions
//!
//! ```rust,no_run
//! use sqlx_named_runner::prelude::*;
//!
//! # fn example(runner: &QueryRunner<SqlxDataSource>) -> sqlx_named_runner::Result<()> {
//! runner.transaction(|tx| {
//!     tx.update(&MapInput::new(
//!         "UPDATE accounts SET balance = balance - :amount WHERE id = :id",
//!         [("amount", 100), ("id", 1)],
//!     ))?;
//!     tx.update(&MapInput::new(
//!         "UPDATE accounts SET balance = balance + :amount WHERE id = :id",
//!         [("amount", 100), ("id", 2)],
//!     ))?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Procedures
//!
//! ```rust,no_run
//! use sqlx_named_runner::prelude::*;
//!
//! # fn example<S: ConnectionSource>(runner: &QueryRunner<S>) -> sqlx_named_runner::Result<()> {
//! let mut params = ParameterSet::new();
//! params.set_typed("x", 5, SqlType::Integer, Direction::In);
//! params.set_out("y", SqlType::Integer);
//!
//! let result = runner.call(&ParamsInput::new("{call double_it(:x, :y)}", params))?;
//! println!("y = {:?}", result.out_parameters.value("y"));
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Resolve**: An input handler encodes the template to positional SQL and lines its
//!    parameter set up with the placeholders
//! 2. **Bind**: A statement handler checks the count against driver metadata and binds each
//!    entry by position and SQL type
//! 3. **Unwrap**: Generated keys, then result sets in driver order, then OUT parameters
//! 4. **Shape**: An output handler turns rows into the requested type
//!
//! The engine talks to databases through the [`driver`] traits. [`driver::sqlx_any`]
//! implements them over SQLx's `Any` driver and blocks on its own Tokio runtime, so it must
//! not be called from inside an async context.
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod bean;
pub mod builder;
pub mod config;
pub mod driver;
pub mod error;
pub mod input;
pub mod output;
pub mod params;
pub mod profiling;
pub mod runner;
pub mod statement;
pub mod transaction;
pub mod translator;
pub mod value;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use params::{Parameter, ParameterSet};
pub use runner::{QueryRunner, Transaction};
pub use value::{Direction, SqlType, Value};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::driver::sqlx_any::{create_data_source, DataSourceConfig, SqlxDataSource};
    pub use crate::driver::{Connection, ConnectionSource, IsolationLevel};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::input::{
        ArrayInput, BeanInput, BeanListInput, InputHandler, MapInput, MapListInput, MergedInput,
        ParamsInput,
    };
    pub use crate::output::{
        BeanHandler, BeanListHandler, ColumnListHandler, MapHandler, MapListHandler,
        OutputHandler, ScalarHandler,
    };
    pub use crate::params::{Parameter, ParameterSet};
    pub use crate::runner::{QueryRunner, Transaction};
    pub use crate::statement::{CallResult, Strategy};
    pub use crate::transaction::TransactionOptions;
    pub use crate::value::{Direction, SqlType, Value};
}
