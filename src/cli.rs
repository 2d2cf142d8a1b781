/*!
sqlview Command Line Interface

Inspects and queries a local SQLite file with the same rules the REST server
applies to session databases. Results are printed as pretty JSON.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

use sqlview::gateway::{SqlGateway, MAX_SELECT_ROWS};
use sqlview::{schema, AccessMode, SqlOutcome, SqliteReader, VERSION};

#[derive(Parser)]
#[command(name = "sqlview")]
#[command(about = "Browse and query SQLite database files")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the tables of a database
    Tables {
        /// Path to the SQLite file
        #[arg(long)]
        db: PathBuf,
    },

    /// Show the columns of a table
    Describe {
        /// Path to the SQLite file
        #[arg(long)]
        db: PathBuf,

        /// Table to describe
        table: String,
    },

    /// Execute a single SQL statement
    Sql {
        /// Path to the SQLite file
        #[arg(long)]
        db: PathBuf,

        /// Maximum rows printed for a SELECT
        #[arg(long, default_value_t = MAX_SELECT_ROWS)]
        max_rows: usize,

        /// The statement to execute
        sql: String,
    },
}

/// JSON summary of an executed statement
fn outcome_to_json(outcome: &SqlOutcome) -> Value {
    match outcome {
        SqlOutcome::Select(select) => json!({
            "queryType": outcome.query_type(),
            "message": outcome.message(),
            "columns": select.columns,
            "rows": select.rows,
            "totalRows": select.total_rows,
            "hasMoreRows": select.has_more_rows,
        }),
        SqlOutcome::Mutation(mutation) => json!({
            "queryType": outcome.query_type(),
            "message": outcome.message(),
            "affectedRows": mutation.affected_rows,
            "lastInsertRowid": mutation.last_insert_rowid,
        }),
    }
}

fn run(command: Commands) -> anyhow::Result<Value> {
    match command {
        Commands::Tables { db } => {
            let reader = SqliteReader::open(&db, AccessMode::ReadOnly)
                .with_context(|| format!("Failed to open {}", db.display()))?;
            Ok(json!(schema::list_tables(reader.connection())?))
        }
        Commands::Describe { db, table } => {
            let reader = SqliteReader::open(&db, AccessMode::ReadOnly)
                .with_context(|| format!("Failed to open {}", db.display()))?;
            schema::ensure_table_exists(reader.connection(), &table)?;
            Ok(json!(schema::describe_table(reader.connection(), &table)?))
        }
        Commands::Sql { db, max_rows, sql } => {
            let outcome = SqlGateway::new(max_rows).execute(&db, &sql)?;
            Ok(outcome_to_json(&outcome))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output = run(cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
