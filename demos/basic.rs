//! Basic example demonstrating QueryRunner usage
//!
//! Run with: cargo run --example basic
//!
//! Uses a local SQLite file unless DATABASE_URL is set:
//! export DATABASE_URL="sqlite://demo.db?mode=rwc"

use serde::{Deserialize, Serialize};
use sqlx_named_runner::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct User {
    id: Option<i64>,
    name: String,
    email: String,
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://basic_demo.db?mode=rwc".to_string());

    println!("Connecting to database...");
    let runner = QueryRunner::new(create_data_source(DataSourceConfig::new(&database_url))?);

    println!("\nCreating users table...");
    runner.update("DROP TABLE IF EXISTS users")?;
    runner.update(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name VARCHAR(100) NOT NULL,
            email VARCHAR(100) NOT NULL UNIQUE
        )",
    )?;

    // Example 1: Insert from key/value pairs, reading back the generated key
    println!("\n--- Example 1: Inserting users ---");
    for (name, email) in [("Alice", "alice@example.com"), ("Bob", "bob@example.com")] {
        let id = runner.insert(
            &MapInput::new(
                "INSERT INTO users (name, email) VALUES (:name, :email)",
                [("name", name), ("email", email)],
            ),
            &ScalarHandler::new(),
        )?;
        println!("Inserted user '{}': generated key={:?}", name, id);
    }

    // Example 2: Insert from a serializable record
    let charlie = User {
        id: None,
        name: "Charlie".into(),
        email: "charlie@example.com".into(),
    };
    runner.update(&BeanInput::new(
        "INSERT INTO users (name, email) VALUES (:name, :email)",
        &charlie,
    ))?;

    // Example 3: Query all users into records
    println!("\n--- Example 3: Fetching all users ---");
    let users = runner.query(
        "SELECT id, name, email FROM users ORDER BY id",
        &BeanListHandler::<User>::new(),
    )?;
    println!("Found {} users:", users.len());
    for user in &users {
        println!("  - {} (id={:?}, email={})", user.name, user.id, user.email);
    }

    // Example 4: Query a single user by email
    println!("\n--- Example 4: Finding user by email ---");
    let found = runner.query(
        &MapInput::new(
            "SELECT id, name, email FROM users WHERE email = :email",
            [("email", "alice@example.com")],
        ),
        &BeanHandler::<User>::new(),
    )?;
    match found {
        Some(user) => println!("Found user: {} ({})", user.name, user.email),
        None => println!("User not found"),
    }

    // Example 5: The same name may appear several times
    println!("\n--- Example 5: Repeated parameters ---");
    let matches = runner.query(
        &MapInput::new(
            "SELECT name FROM users WHERE name = :who OR email LIKE :who || '%'",
            [("who", "bob")],
        ),
        &ColumnListHandler::new(),
    )?;
    println!("Matched: {:?}", matches);

    // Example 6: Batch update
    println!("\n--- Example 6: Batch rename ---");
    let sql = "UPDATE users SET name = :name WHERE email = :email";
    let counts = runner.batch(&[
        MapInput::new(sql, [("name", "Robert"), ("email", "bob@example.com")]),
        MapInput::new(sql, [("name", "Chuck"), ("email", "charlie@example.com")]),
    ])?;
    println!("Updated rows per entry: {:?}", counts);

    // Example 7: Failures carry the SQL and parameters
    println!("\n--- Example 7: Constraint violation ---");
    if let Err(e) = runner.update(&MapInput::new(
        "INSERT INTO users (name, email) VALUES (:name, :email)",
        [("name", "Alice again"), ("email", "alice@example.com")],
    )) {
        println!("Rejected ({:?}):\n{}", e.kind(), e);
    }

    let remaining = runner.query("SELECT COUNT(*) FROM users", &ScalarHandler::new())?;
    println!("\nUsers in table: {:?}", remaining);

    // Cleanup
    println!("\nCleaning up...");
    runner.update("DROP TABLE IF EXISTS users")?;

    println!("\nExample completed successfully!");
    Ok(())
}
