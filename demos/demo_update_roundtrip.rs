//! demo_update_roundtrip - Bump the main release of an update descriptor.
//!
//! Reads an update XML file, sets a new main release version, prepends a
//! changelog entry and writes the result to a second path (creating its
//! directories). Pass `--lenient` to accept input that does not conform to
//! the schema; the output is always validated.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example demo_update_roundtrip <in.xml> <out.xml> <version> [--lenient]
//! ```

use std::env;
use std::process;

use chrono::Local;
use updater_xml::{ChangelogEntry, UpdateXmlCodec};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: {} <in.xml> <out.xml> <version> [--lenient]",
            args.first().map(String::as_str).unwrap_or("demo_update_roundtrip")
        );
        process::exit(1);
    }
    let validate = !args[4..].iter().any(|a| a == "--lenient");

    if let Err(e) = run(&args[1], &args[2], &args[3], validate) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(input: &str, output: &str, version: &str, validate: bool) -> updater_xml::Result<()> {
    let codec = UpdateXmlCodec::new()?;
    let mut update = codec.read_path(input, validate)?;

    let today = Local::now().date_naive();
    if let Some(ref mut main) = update.main_release {
        println!(
            "{}: {} -> {}",
            main.name.as_deref().unwrap_or("<unnamed>"),
            main.version.as_deref().unwrap_or("?"),
            version
        );
        main.version = Some(version.to_string());
        main.release_date = Some(today);
    }

    update.changelog.insert(
        0,
        ChangelogEntry::new(version)
            .with_date(today)
            .with_change(format!("Release {}", version)),
    );

    codec.write_path(output, &update)?;
    println!("Wrote {}", output);
    Ok(())
}
