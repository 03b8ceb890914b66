use std::path::Path;

use ev_logbook::adapters::db::{open_connection, run_migrations, schema_version, set_value};
use ev_logbook::adapters::legacy_migration::{
    LEGACY_DATA_KEY, LEGACY_LANG_KEY, LEGACY_LOCATIONS_KEY, LEGACY_SETTINGS_KEY,
};

const DEFAULT_PATH: &str = "./data/ev_logbook_test.db";
const SEEDED_AT: &str = "2024-05-01T00:00:00.000Z";

// Records in the first-generation shape, so the startup migration has
// something to convert.
const LEGACY_SAMPLE: &[(&str, &str)] = &[
    (
        LEGACY_DATA_KEY,
        r#"[{"id":"legacy1","timestamp":"2024-04-30T22:10","battery":35,"batteryAfter":80,"odometer":"15200","efficiency":6.4},{"id":"legacy2","timestamp":"2024-04-27T08:00","battery":"50","batteryAfter":"65"}]"#,
    ),
    (
        LEGACY_SETTINGS_KEY,
        r#"{"batteryCapacity":40,"electricityRate":0,"useNightRate":true}"#,
    ),
    (
        LEGACY_LOCATIONS_KEY,
        r#"[{"id":"home","name":"Home 200V","voltage":200,"amperage":16,"kw":"3.2"}]"#,
    ),
    (LEGACY_LANG_KEY, "ja"),
];

struct Options {
    path: String,
    force: bool,
    legacy_sample: bool,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create test db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        print_help();
        return Ok(());
    };

    let path_ref = Path::new(&options.path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if options.force && path_ref.exists() {
        std::fs::remove_file(path_ref)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&options.path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let version = schema_version(&connection).map_err(|error| error.to_string())?;

    if options.legacy_sample {
        for (key, value) in LEGACY_SAMPLE {
            set_value(&connection, key, value, SEEDED_AT).map_err(|error| error.to_string())?;
        }
        println!("seeded {} legacy keys", LEGACY_SAMPLE.len());
    }

    println!("created/updated test db at: {}", options.path);
    println!("schema version: {version}");
    Ok(())
}

/// `Ok(None)` means help was requested.
fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    let mut options = Options {
        path: DEFAULT_PATH.to_string(),
        force: false,
        legacy_sample: false,
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--path" => {
                options.path = args
                    .next()
                    .ok_or_else(|| "--path requires a value".to_string())?;
            }
            "--force" => options.force = true,
            "--legacy-sample" => options.legacy_sample = true,
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Some(options))
}

fn print_help() {
    println!("create_test_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin create_test_db -- [--path <file>] [--force] [--legacy-sample]");
    println!();
    println!("Options:");
    println!("  --path <file>     target sqlite file (default: {DEFAULT_PATH})");
    println!("  --force           delete existing file before creating");
    println!("  --legacy-sample   write first-generation keys for migration testing");
}
