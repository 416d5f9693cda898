//! Transaction example demonstrating units of work on QueryRunner
//!
//! Run with: cargo run --example transaction
//!
//! Uses a local SQLite file unless DATABASE_URL is set:
//! export DATABASE_URL="sqlite://demo.db?mode=rwc"

use serde::Deserialize;
use sqlx_named_runner::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Account {
    id: i64,
    name: String,
    balance: i64,
}

fn transfer_money(tx: &mut Transaction<'_>, from_id: i64, to_id: i64, amount: i64) -> Result<()> {
    println!("  Transferring ${} from account {} to account {}", amount, from_id, to_id);

    // Debit from source account
    let debited = tx.update(&MapInput::new(
        "UPDATE accounts SET balance = balance - :amount WHERE id = :id",
        [("amount", amount), ("id", from_id)],
    ))?;
    if debited == 0 {
        return Err(Error::Aborted("Source account not found".into()));
    }

    // Check for negative balance
    let balance = tx
        .query(
            &MapInput::new("SELECT balance FROM accounts WHERE id = :id", [("id", from_id)]),
            &ScalarHandler::new(),
        )?
        .and_then(|v| v.as_i64())
        .unwrap_or_default();
    if balance < 0 {
        return Err(Error::Aborted(format!("Insufficient funds (balance: ${})", balance)));
    }

    // Credit to destination account
    let credited = tx.update(&MapInput::new(
        "UPDATE accounts SET balance = balance + :amount WHERE id = :id",
        [("amount", amount), ("id", to_id)],
    ))?;
    if credited == 0 {
        return Err(Error::Aborted("Destination account not found".into()));
    }

    println!("  Transfer completed");
    Ok(())
}

fn show_accounts<S: ConnectionSource>(runner: &QueryRunner<S>) -> Result<()> {
    let accounts = runner.query(
        "SELECT id, name, balance FROM accounts ORDER BY id",
        &BeanListHandler::<Account>::new(),
    )?;
    println!("\nCurrent account balances:");
    for account in &accounts {
        println!("  {} (id={}): ${}", account.name, account.id, account.balance);
    }
    Ok(())
}

fn report(outcome: Result<()>) {
    match outcome {
        Ok(()) => println!("  Transaction committed"),
        Err(e) => println!("  Transaction rolled back: {}", e),
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://transaction_demo.db?mode=rwc".to_string());

    println!("Connecting to database...");
    let runner = QueryRunner::new(create_data_source(DataSourceConfig::new(&database_url))?);

    // Setup: Create accounts table
    println!("\nSetting up accounts table...");
    runner.update("DROP TABLE IF EXISTS accounts")?;
    runner.update(
        "CREATE TABLE accounts (
            id INTEGER PRIMARY KEY,
            name VARCHAR(100) NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0
        )",
    )?;

    // Insert initial accounts in one batch
    println!("\nCreating test accounts...");
    let mut accounts = MapListInput::new(
        "INSERT INTO accounts (id, name, balance) VALUES (:id, :name, :balance)",
        Vec::new(),
    );
    for (id, name, balance) in [(1, "Alice", 1000), (2, "Bob", 500), (3, "Charlie", 750)] {
        accounts.push([
            ("id", Value::from(id)),
            ("name", Value::from(name)),
            ("balance", Value::from(balance)),
        ]);
    }
    runner.batch_rows(&accounts)?;

    show_accounts(&runner)?;

    // Example 1: Successful transaction
    println!("\n--- Example 1: Successful transfer ---");
    report(runner.transaction(|tx| transfer_money(tx, 1, 2, 200)));
    show_accounts(&runner)?;

    // Example 2: Failed transaction (insufficient funds)
    println!("\n--- Example 2: Failed transfer (insufficient funds) ---");
    report(runner.transaction(|tx| transfer_money(tx, 2, 1, 1000)));
    show_accounts(&runner)?;

    // Example 3: Multiple transfers in one transaction
    println!("\n--- Example 3: Multiple transfers in one transaction ---");
    report(runner.transaction(|tx| {
        transfer_money(tx, 1, 3, 100)?; // Alice -> Charlie
        transfer_money(tx, 3, 2, 50) // Charlie -> Bob
    }));
    show_accounts(&runner)?;

    // Example 4: Savepoints keep part of a unit of work
    println!("\n--- Example 4: Partial rollback to a savepoint ---");
    let options = TransactionOptions::default().isolation(IsolationLevel::Serializable);
    report(runner.transaction_with(options, |tx| {
        transfer_money(tx, 2, 3, 10)?;
        tx.savepoint("after_first")?;
        if let Err(e) = transfer_money(tx, 3, 99, 10) {
            println!("  Undoing second transfer: {}", e);
            tx.rollback_to_savepoint("after_first")?;
        }
        Ok(())
    }));
    show_accounts(&runner)?;

    // Cleanup
    println!("\nCleaning up...");
    runner.update("DROP TABLE IF EXISTS accounts")?;

    println!("\nExample completed successfully!");
    Ok(())
}
