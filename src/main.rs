// Familiar Market - CLI
// Bootstrap and seed the marketplace database

use anyhow::{Context, Result};

use familiar_market::{db_path_from_env, open_database, seed_demo, VERSION};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(),
        Some("seed") => run_seed(),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn run_init() -> Result<()> {
    let path = db_path_from_env();

    println!("Initializing marketplace database...");
    open_database(&path).with_context(|| format!("failed to open database at {}", path))?;
    println!("✓ Database ready: {}", path);

    Ok(())
}

fn run_seed() -> Result<()> {
    let path = db_path_from_env();

    println!("Seeding demo marketplace...");
    let conn =
        open_database(&path).with_context(|| format!("failed to open database at {}", path))?;
    let summary = seed_demo(&conn).context("seeding failed")?;

    println!("✓ Inserted: {} wizards", summary.wizards);
    println!("✓ Inserted: {} groups", summary.groups);
    println!("✓ Inserted: {} familiars", summary.familiars);
    println!("✓ Inserted: {} customers", summary.customers);
    println!("\nDatabase: {}", path);

    Ok(())
}

fn print_usage() {
    println!("familiar-market {}", VERSION);
    println!();
    println!("Usage:");
    println!("  familiar-market init    Create the database schema");
    println!("  familiar-market seed    Load the demo marketplace");
    println!();
    println!("Environment:");
    println!("  FAMILIAR_MARKET_DB      Database file (default: familiar-market.db)");
    println!();
    println!("API server: cargo run --bin market-server --features server");
}
