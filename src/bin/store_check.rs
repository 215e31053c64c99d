use anyhow::Context;
use chain_sentry::db;

/// Quick sanity check of the local store: opens it, prints the row count and
/// the latest few transactions.
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let path = std::env::var("DATABASE_URL").unwrap_or_else(|_| "mempool_data.db".to_string());
    println!("Opening store at {}...", path);

    let conn = db::connect(&path).with_context(|| format!("cannot open {path}"))?;
    db::run_migrations(&conn).context("cannot create schema")?;

    let total = db::count_transactions(&conn)?;
    println!("Stored transactions: {}", total);

    for row in db::recent_transactions(&conn, None, 5)? {
        let tx = &row.record;
        let eth = tx
            .value_eth()
            .map(|v| format!("{} ETH", v.normalize()))
            .unwrap_or_else(|| format!("{} wei", tx.value));
        println!(
            "Tx: {} | To: {} | From: {} | Value: {} | Stored: {}",
            tx.hash, tx.to, tx.from, eth, row.stored_at
        );
    }

    Ok(())
}
