//! Inspect and edit the coordinator's store.
//!
//! Never run this against a store owned by a running coordinator. The store
//! lock makes the tool fail after a short wait if one is.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Arg, ArgMatches, Command};

use spv_rescan::client::config::{default_home_dir, STORE_DIR_NAME};
use spv_rescan::storage::{inspect, Store};
use spv_rescan::SpvError;

fn cli() -> Command {
    let top = || {
        Arg::new("top").value_name("TOP_BUCKET").required(true).help("Top-level bucket name")
    };
    let sub = || {
        Arg::new("sub")
            .value_name("SUB_BUCKET")
            .required(true)
            .help("Nested bucket id: raw string, or hex with a 0x prefix")
    };
    let key = || Arg::new("key").value_name("KEY_HEX").required(true).help("Key as hex");

    Command::new("spv-store")
        .version(spv_rescan::VERSION)
        .about("Read and edit nested buckets of the spv-rescan store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("PATH")
                .global(true)
                .help("Path to the store (defaults to ~/.spv-rescan/data/filters.db)"),
        )
        .subcommand(
            Command::new("list")
                .about("Print every entry of a nested bucket")
                .arg(top())
                .arg(sub()),
        )
        .subcommand(Command::new("get").about("Print one entry").arg(top()).arg(sub()).arg(key()))
        .subcommand(
            Command::new("delete").about("Delete one entry").arg(top()).arg(sub()).arg(key()),
        )
        .subcommand(
            Command::new("put")
                .about("Overwrite the value of an existing entry")
                .arg(top())
                .arg(sub())
                .arg(key())
                .arg(
                    Arg::new("value")
                        .value_name("VALUE_HEX")
                        .required(true)
                        .help("New value as hex"),
                ),
        )
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str, SpvError> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| SpvError::Config(format!("missing argument {}", name)))
}

async fn run(matches: &ArgMatches) -> Result<(), SpvError> {
    let db = matches
        .get_one::<String>("db")
        .map(PathBuf::from)
        .unwrap_or_else(|| default_home_dir().join("data").join(STORE_DIR_NAME));

    let (command, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| SpvError::Config("no subcommand given".to_string()))?;

    let top = arg(sub_matches, "top")?;
    let sub = inspect::parse_bucket_arg(arg(sub_matches, "sub")?)?;

    if !db.is_dir() {
        return Err(SpvError::Config(format!("no store at {}", db.display())));
    }
    let store = Store::open(&db, Duration::from_secs(1)).await?;

    match command {
        "list" => {
            for entry in inspect::list(&store, top, &sub)? {
                println!("{}", entry);
            }
        }
        "get" => {
            let key = inspect::parse_hex_arg("key", arg(sub_matches, "key")?)?;
            println!("{}", inspect::get(&store, top, &sub, &key)?);
        }
        "delete" => {
            let key = inspect::parse_hex_arg("key", arg(sub_matches, "key")?)?;
            inspect::delete(&store, top, &sub, &key)?;
            println!("Deleted successfully");
        }
        "put" => {
            let key = inspect::parse_hex_arg("key", arg(sub_matches, "key")?)?;
            let value = inspect::parse_hex_arg("value", arg(sub_matches, "value")?)?;
            inspect::overwrite(&store, top, &sub, &key, &value)?;
            println!("Updated successfully");
        }
        other => return Err(SpvError::Config(format!("unknown subcommand {}", other))),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    if let Err(e) = run(&matches).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
