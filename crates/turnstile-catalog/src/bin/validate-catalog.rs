//! Catalog validation CLI tool
//!
//! Validates a turnstiled catalog file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use turnstile_api::Tier;
use turnstile_util::default_catalog_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let catalog_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_catalog_path();
            eprintln!("Usage: validate-catalog [catalog-file]");
            eprintln!();
            eprintln!("Validates a turnstiled catalog file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !catalog_path.exists() {
        eprintln!("Error: Catalog file not found: {}", catalog_path.display());
        return ExitCode::from(1);
    }

    match turnstile_catalog::load_catalog(&catalog_path) {
        Ok(catalog) => {
            println!("✓ Catalog is valid");
            println!();
            println!("Summary:");
            println!("  Catalog version: {}", turnstile_catalog::CURRENT_CATALOG_VERSION);
            println!("  Components: {}", catalog.component_count());
            println!();
            println!("Entries:");
            for entry in catalog.to_view().entries {
                let gate = match entry.min_tier {
                    Some(tier) => format!(", min tier {}", tier),
                    None => String::new(),
                };
                println!("  - {} [{} credits{}]", entry.component, entry.cost, gate);
                for window in entry.windows {
                    let metered = if window.unmetered { " (unmetered)" } else { "" };
                    println!(
                        "      {}: {}{}",
                        window.tier,
                        turnstile_util::format_duration(std::time::Duration::from_secs(
                            window.window_secs
                        )),
                        metered
                    );
                }
            }
            println!();
            println!("Tiers: {}", Tier::ALL.map(|t| t.as_str()).join(", "));

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Catalog validation failed");
            eprintln!();
            match &e {
                turnstile_catalog::CatalogError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                turnstile_catalog::CatalogError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                turnstile_catalog::CatalogError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                turnstile_catalog::CatalogError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported catalog version: {} (expected {})",
                        ver,
                        turnstile_catalog::CURRENT_CATALOG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
