mod common;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serial_test::serial;
use sqlx_named_runner::driver::{Connection, DriverError, DriverErrorKind, IsolationLevel};
use sqlx_named_runner::error::TemplateError;
use sqlx_named_runner::prelude::*;
use sqlx_named_runner::translator::{self, ExceptionTranslator, SqlStateTranslator, TranslationFailure};

use common::{MockSource, Outcome, Reply};

fn runner(source: &MockSource) -> QueryRunner<MockSource> {
    QueryRunner::new(source.clone())
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Cat {
    name: String,
    age: i64,
}

#[test]
fn test_query_binds_in_placeholder_order() {
    let source = MockSource::new();
    source
        .param_count(Some(2))
        .reply(Reply::rows(&["ID"], vec![vec![Value::Int(7)], vec![Value::Int(8)]]));

    let ids = runner(&source)
        .query(
            &MapInput::new(
                "SELECT id FROM cats WHERE age = :age AND name = :name",
                [("name", Value::from("whiskers")), ("age", Value::from(5))],
            ),
            &ColumnListHandler::column("id"),
        )
        .unwrap();

    assert_eq!(ids, vec![Value::Int(7), Value::Int(8)]);
    assert_eq!(
        source.events(),
        vec![
            "open",
            "prepare SELECT id FROM cats WHERE age = ? AND name = ?",
            "parameter_count",
            "bind 1 5",
            "bind 2 'whiskers'",
            "execute",
            "stmt close",
            "close",
        ]
    );
}

#[test]
fn test_batch_of_map_inputs() {
    let source = MockSource::new();
    source.param_count(Some(1));
    let sql = "INSERT INTO students (name) VALUES (:studentName)";

    let counts = runner(&source)
        .batch(&[
            MapInput::new(sql, [("studentName", "a")]),
            MapInput::new(sql, [("studentName", "b")]),
        ])
        .unwrap();

    assert_eq!(counts, vec![1, 1]);
    assert_eq!(source.count("add_batch"), 2);
    assert!(source.has("prepare INSERT INTO students (name) VALUES (?)"));
    assert!(source.has("bind 1 'a'") && source.has("bind 1 'b'"));
}

#[test]
fn test_batch_rejects_mixed_templates() {
    let source = MockSource::new();
    let err = runner(&source)
        .batch(&[
            MapInput::new("INSERT INTO a (x) VALUES (:x)", [("x", 1)]),
            MapInput::new("INSERT INTO b (x) VALUES (:x)", [("x", 2)]),
        ])
        .unwrap_err();
    assert!(matches!(err, Error::Template(TemplateError::MixedBatch { .. })));
    assert!(!source.events().iter().any(|e| e.starts_with("prepare")));
    assert!(source.has("close"));
}

#[test]
fn test_batch_rows_from_beans() {
    let source = MockSource::new();
    source.param_count(Some(2)).reply(Reply {
        batch: vec![1, 1, 1],
        ..Reply::default()
    });
    let cats = vec![
        Cat { name: "a".into(), age: 1 },
        Cat { name: "b".into(), age: 2 },
        Cat { name: "c".into(), age: 3 },
    ];

    let counts = runner(&source)
        .batch_rows(&BeanListInput::new(
            "INSERT INTO cats (name, age) VALUES (:name, :age)",
            cats,
        ))
        .unwrap();

    assert_eq!(counts, vec![1, 1, 1]);
    assert!(source.has("bind 2 3"));
}

#[test]
fn test_batch_failure_reports_the_failing_row() {
    let source = MockSource::new();
    source.param_count(Some(1)).reply(Reply {
        failed_row: Some(1),
        ..Reply::error("UNIQUE constraint failed: cats.name", Some("2067"), DriverErrorKind::Constraint)
    });

    let err = runner(&source)
        .batch(&[
            MapInput::new("INSERT INTO cats (name) VALUES (:name)", [("name", "fresh")]),
            MapInput::new("INSERT INTO cats (name) VALUES (:name)", [("name", "dup")]),
        ])
        .unwrap_err();

    let Error::Execution(exec) = &err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(exec.params, "{name='dup'}");
    assert!(err.to_string().ends_with("Parameters: {name='dup'}"));
}

#[test]
fn test_call_refreshes_out_parameters() {
    let source = MockSource::new();
    source.param_count(Some(2)).reply(Reply {
        results: vec![Outcome::Count(0)],
        out_values: vec![(2, Value::Int(10))],
        ..Reply::default()
    });
    let mut params = ParameterSet::new();
    params.set_typed("x", 5, SqlType::Integer, Direction::In);
    params.set_out("y", SqlType::Integer);

    let result = runner(&source)
        .call(&ParamsInput::new("{call double_it(:x, :y)}", params))
        .unwrap();

    assert!(source.has("prepare_call {call double_it(?, ?)}"));
    assert!(source.has("out 2 Integer"));
    assert_eq!(result.out_parameters.value("x"), Some(&Value::Int(5)));
    assert_eq!(result.out_parameters.value("y"), Some(&Value::Int(10)));
    assert_eq!(result.outputs().names().collect::<Vec<_>>(), vec!["y"]);
}

#[test]
fn test_call_with_shapes_every_result_set() {
    let source = MockSource::new();
    source.reply(Reply {
        results: vec![
            Outcome::rows(1, &["name", "age"], vec![vec![Value::from("a"), Value::Int(1)]]),
            Outcome::Count(4),
            Outcome::rows(
                2,
                &["name", "age"],
                vec![
                    vec![Value::from("b"), Value::Int(2)],
                    vec![Value::from("c"), Value::Int(3)],
                ],
            ),
        ],
        ..Reply::default()
    });

    let (result, shaped) = runner(&source)
        .call_with("{call list_cats()}", &BeanListHandler::<Cat>::new())
        .unwrap();

    assert_eq!(result.result_sets.len(), 2);
    assert_eq!(shaped[0], vec![Cat { name: "a".into(), age: 1 }]);
    assert_eq!(shaped[1].len(), 2);
}

#[test]
fn test_insert_reads_generated_keys_once() {
    let source = MockSource::new();
    source.reply(Reply {
        results: vec![
            Outcome::Count(1),
            Outcome::rows(1, &["generated_key"], vec![vec![Value::Int(42)]]),
        ],
        keys: Some((1, vec![vec![Value::Int(42)]])),
        ..Reply::default()
    });

    let key = runner(&source)
        .insert(
            &MapInput::new("INSERT INTO cats (name) VALUES (:name)", [("name", "tom")]),
            &ScalarHandler::new(),
        )
        .unwrap();
    assert_eq!(key, Some(Value::Int(42)));
}

#[test]
fn test_update_maps_missing_count_to_zero() {
    let source = MockSource::new();
    source.reply(Reply::count(-1)).reply(Reply::count(3));
    let runner = runner(&source);
    assert_eq!(runner.update("DELETE FROM cats").unwrap(), 0);
    assert_eq!(runner.update("DELETE FROM cats").unwrap(), 3);
}

#[test]
fn test_merged_input_namespaces_beans() {
    let source = MockSource::new();
    source.reply(Reply::count(1));
    let input = MergedInput::new("UPDATE cats SET age = :cat.age WHERE name = :cat.name AND :owner = 'jo'")
        .bean(&Cat { name: "tom".into(), age: 4 })
        .unwrap()
        .map([("owner", "jo")]);

    assert_eq!(runner(&source).update(&input).unwrap(), 1);
    assert!(source.has("bind 1 4"));
    assert!(source.has("bind 2 'tom'"));
    assert!(source.has("bind 3 'jo'"));
}

#[test]
fn test_missing_parameter_fails_before_prepare() {
    let source = MockSource::new();
    let err = runner(&source)
        .update(&MapInput::new("UPDATE cats SET age = :age WHERE name = :name", [("age", 1)]))
        .unwrap_err();

    assert!(matches!(err, Error::MissingParameter { ref name, .. } if name == "name"));
    assert_eq!(source.events(), vec!["open", "close"]);
}

#[test]
fn test_null_without_type_binds_as_varchar() {
    let source = MockSource::new();
    source.reply(Reply::count(1));
    runner(&source)
        .update(&MapInput::new("UPDATE cats SET owner = :owner", [("owner", Value::Null)]))
        .unwrap();
    assert!(source.has("bind 1 NULL Varchar"));
}

#[test]
fn test_metadata_failure_falls_back_for_the_runner() {
    let source = MockSource::new();
    source.reply(Reply::count(1)).reply(Reply::count(1));
    let runner = runner(&source);

    runner.update(&MapInput::new("UPDATE cats SET age = :age", [("age", 1)])).unwrap();
    assert!(!runner.metadata_enabled());
    runner.update(&MapInput::new("UPDATE cats SET age = :age", [("age", 2)])).unwrap();

    assert_eq!(source.count("parameter_count"), 1);
    assert!(QueryRunner::new(source.clone()).metadata_enabled());
}

#[test]
fn test_strict_count_mismatch_is_an_error() {
    let source = MockSource::new();
    source.param_count(Some(3));
    let strict = QueryRunner::with_config(
        source.clone(),
        Config::new().with_strict_parameter_count(true),
    );

    let err = strict
        .update(&MapInput::new("UPDATE cats SET age = :age", [("age", 1)]))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ParameterCountMismatch { expected: 3, actual: 1 }
    ));
    assert!(!source.has("execute"));
    assert!(source.has("stmt close") && source.has("close"));
}

#[test]
fn test_lenient_count_mismatch_executes() {
    let source = MockSource::new();
    source.param_count(Some(3)).reply(Reply::count(1));
    let updated = runner(&source)
        .update(&MapInput::new("UPDATE cats SET age = :age", [("age", 1)]))
        .unwrap();
    assert_eq!(updated, 1);
}

#[test]
fn test_driver_error_carries_sql_and_parameters() {
    let source = MockSource::new();
    source.reply(Reply::error(
        "UNIQUE constraint failed: cats.name",
        Some("23505"),
        DriverErrorKind::Other,
    ));
    let runner = QueryRunner::with_config(
        source.clone(),
        Config::new().with_translator(Arc::new(SqlStateTranslator)),
    );

    let err = runner
        .update(&MapInput::new("INSERT INTO cats (name) VALUES (:name)", [("name", "tom")]))
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::IntegrityViolation));
    let Error::Execution(exec) = &err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(exec.sql, "INSERT INTO cats (name) VALUES (?)");
    assert_eq!(exec.params, "{name='tom'}");
    assert_eq!(exec.vendor_code(), Some("23505"));
    assert!(source.has("stmt close") && source.has("close"));
}

#[test]
fn test_lifecycle_misuse_surfaces_as_execution_error() {
    let source = MockSource::new();
    let mut params = ParameterSet::new();
    params.set_out("y", SqlType::Integer);

    let err = runner(&source)
        .update(&ParamsInput::new("UPDATE cats SET age = :y", params))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Internal));
}

struct Exploding;

impl ExceptionTranslator for Exploding {
    fn translate(
        &self,
        _backend: &str,
        _cause: DriverError,
        _sql: &str,
        _params: &ParameterSet,
    ) -> std::result::Result<Error, TranslationFailure> {
        Err(TranslationFailure("translator exploded".into()))
    }
}

#[test]
#[serial]
fn test_installed_translator_is_used_until_reset() {
    let source = MockSource::new();
    source
        .reply(Reply::error("boom", None, DriverErrorKind::Other))
        .reply(Reply::error("boom", None, DriverErrorKind::Other));
    let runner = runner(&source);

    translator::install(Arc::new(Exploding));
    let first = runner.update("DELETE FROM cats");
    translator::reset();
    let second = runner.update("DELETE FROM cats");

    assert!(matches!(first, Err(Error::Translation { ref message, .. }) if message == "translator exploded"));
    assert_eq!(second.unwrap_err().kind(), Some(ErrorKind::Execution));
}

#[test]
#[serial]
fn test_configured_translator_wins_over_installed() {
    let source = MockSource::new();
    source.reply(Reply::error("lost", None, DriverErrorKind::Connection));
    let runner = QueryRunner::with_config(
        source.clone(),
        Config::new().with_translator(Arc::new(SqlStateTranslator)),
    );

    translator::install(Arc::new(Exploding));
    let err = runner.update("DELETE FROM cats");
    translator::reset();

    assert_eq!(err.unwrap_err().kind(), Some(ErrorKind::Connectivity));
}

#[test]
fn test_transaction_commits_on_success() {
    let source = MockSource::new();
    source.reply(Reply::count(1)).reply(Reply::count(1));

    let total = runner(&source)
        .transaction(|tx| {
            let a = tx.update(&MapInput::new("UPDATE a SET x = :x", [("x", 1)]))?;
            let b = tx.update(&MapInput::new("UPDATE b SET x = :x", [("x", 1)]))?;
            Ok(a + b)
        })
        .unwrap();

    assert_eq!(total, 2);
    assert_eq!(source.count("open"), 1);
    assert_eq!(source.count("close"), 1);
    assert!(source.has("commit"));
    assert!(!source.has("rollback"));
    let events = source.events();
    assert_eq!(events[1], "auto_commit false");
    assert_eq!(events.last().map(String::as_str), Some("close"));
    assert!(source.has("auto_commit true"));
}

#[test]
fn test_transaction_rolls_back_and_returns_the_original_error() {
    let source = MockSource::new();
    source.reply(Reply::count(1));

    let err = runner(&source)
        .transaction(|tx| {
            tx.update(&MapInput::new("UPDATE cats SET age = :age", [("age", 6)]))?;
            Err::<(), _>(Error::Aborted("unit of work failed".into()))
        })
        .unwrap_err();

    assert!(matches!(err, Error::Aborted(ref m) if m == "unit of work failed"));
    assert!(source.has("rollback"));
    assert!(!source.has("commit"));
    assert_eq!(source.count("close"), 1);
}

#[test]
#[serial]
fn test_failed_rollback_reports_both_errors() {
    let source = MockSource::new();
    source.fail_rollback();

    let err = runner(&source)
        .transaction(|_tx| Err::<(), _>(Error::Aborted("first".into())))
        .unwrap_err();

    let Error::Rollback { cause, rollback } = &err else {
        panic!("expected rollback error, got {err:?}");
    };
    assert!(matches!(**cause, Error::Aborted(ref m) if m == "first"));
    assert_eq!(rollback.kind(), Some(ErrorKind::Connectivity));
    assert_eq!(err.kind(), None);
}

#[test]
#[serial]
fn test_failed_commit_rolls_back() {
    let source = MockSource::new();
    source.fail_commit();

    let err = runner(&source).transaction(|_tx| Ok(())).unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::Execution));
    assert!(err.to_string().contains("Query: COMMIT"));
    assert!(source.has("rollback"));
}

#[test]
fn test_transaction_connection_ignores_close() {
    let source = MockSource::new();

    runner(&source)
        .transaction_with(
            TransactionOptions::default().isolation(IsolationLevel::Serializable),
            |tx| {
                let mut conn = tx.connection();
                conn.close().unwrap();
                assert!(!conn.is_closed());
                assert_eq!(conn.isolation().unwrap(), IsolationLevel::Serializable);
                assert_eq!(conn.catalog().unwrap().as_deref(), Some("main"));
                conn.commit().unwrap();
                Ok(())
            },
        )
        .unwrap();

    assert_eq!(source.count("close"), 1);
    assert_eq!(source.count("commit"), 2);
    assert!(source.has("isolation Serializable"));
    // Settings restored on the way out.
    assert!(source.has("isolation ReadCommitted"));
}

#[test]
fn test_savepoints_inside_transaction() {
    let source = MockSource::new();

    runner(&source)
        .transaction(|tx| {
            tx.savepoint("before_update")?;
            tx.rollback_to_savepoint("before_update")?;
            assert!(tx.savepoint("bad name").is_err());
            Ok(())
        })
        .unwrap();

    assert!(source.has("savepoint before_update"));
    assert!(source.has("rollback_to before_update"));
    assert!(!source.has("savepoint bad name"));
}

#[test]
fn test_lazy_strategy_streams_rows() {
    let source = MockSource::new();
    source.reply(Reply::rows(
        &["name", "age"],
        vec![
            vec![Value::from("a"), Value::Int(1)],
            vec![Value::from("b"), Value::Int(2)],
        ],
    ));
    let runner = QueryRunner::with_config(
        source.clone(),
        Config::new().with_strategy(Strategy::Lazy).with_profiling(true),
    );

    let cat = runner
        .query("SELECT name, age FROM cats", &BeanHandler::<Cat>::new())
        .unwrap();
    assert_eq!(cat, Some(Cat { name: "a".into(), age: 1 }));
}

#[test]
fn test_empty_result_shapes_to_none() {
    let source = MockSource::new();
    source.reply(Reply::count(0));
    let row = runner(&source)
        .query("SELECT name FROM cats WHERE 1 = 0", &MapHandler)
        .unwrap();
    assert!(row.is_none());
}
