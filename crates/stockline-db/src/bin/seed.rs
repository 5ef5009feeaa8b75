//! # Seed Data Generator
//!
//! Creates a demo tenant with two branches, a supplier and a stocked
//! catalog at the main branch.
//!
//! ## Usage
//! ```bash
//! cargo run -p stockline-db --bin seed
//!
//! # Tenant id and database path
//! cargo run -p stockline-db --bin seed -- --tenant demo --db ./data/stockline.db
//! ```
//!
//! Opening stock is booked as `adjustment` movements with reference
//! `OPENING`, so the ledger of every seeded product replays to its stock.

use std::env;
use stockline_core::MovementType;
use stockline_db::{Database, DbConfig, NewMovement, NewProduct, StockLedger};

/// (sku, name, category, price cents, cost cents, opening stock)
const CATALOG: &[(&str, &str, &str, i64, i64, i64)] = &[
    ("BEV-COKE-330", "Coca-Cola 330ml", "Beverages", 150, 90, 120),
    ("BEV-WATER-500", "Still Water 500ml", "Beverages", 100, 40, 200),
    ("BEV-OJ-1L", "Orange Juice 1L", "Beverages", 350, 210, 24),
    ("SNK-CHIPS-150", "Salted Chips 150g", "Snacks", 250, 140, 60),
    ("SNK-CHOC-50", "Milk Chocolate 50g", "Snacks", 120, 70, 8),
    ("DRY-RICE-5KG", "Basmati Rice 5kg", "Grocery", 1899, 1350, 15),
    ("DRY-PASTA-500", "Penne 500g", "Grocery", 199, 110, 40),
    ("DAI-MILK-1L", "Whole Milk 1L", "Dairy", 189, 120, 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./stockline_dev.db");
    let mut tenant_id = String::from("demo");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--tenant" | "-t" => {
                if i + 1 < args.len() {
                    tenant_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockline Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -t, --tenant <ID>  Tenant id to seed (default: demo)");
                println!("  -d, --db <PATH>    Database file path (default: ./stockline_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Stockline Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!("Tenant:   {}", tenant_id);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.catalog().list_branches(&tenant_id).await?;
    if !existing.is_empty() {
        println!("⚠ Tenant already has {} branches", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    let main = db.catalog().create_branch(&tenant_id, "Main Street").await?;
    let annex = db.catalog().create_branch(&tenant_id, "Harbour Annex").await?;
    let supplier = db.catalog().create_supplier(&tenant_id, "Acme Wholesale").await?;
    let customer = db.catalog().create_customer(&tenant_id, Some(&main.id), "Walk-in Customer").await?;

    println!();
    println!("Branches:");
    println!("  {}  {}", main.id, main.name);
    println!("  {}  {}", annex.id, annex.name);
    println!("Supplier: {}  {}", supplier.id, supplier.name);
    println!("Customer: {}  {}", customer.id, customer.name);

    println!();
    println!("Products ({}):", main.name);

    for (sku, name, category, price, cost, opening) in CATALOG {
        let product = db
            .products()
            .create(
                NewProduct::new(&tenant_id, &main.id, *sku, *name)
                    .category(*category)
                    .price(*price)
                    .cost(*cost),
            )
            .await?;

        if *opening > 0 {
            let mut tx = db.begin().await?;
            StockLedger::record(
                &mut tx,
                NewMovement::new(&tenant_id, &product.id, *opening, MovementType::Adjustment, "OPENING")
                    .notes(Some("Opening stock")),
            )
            .await?;
            tx.commit().await?;
        }

        println!("  {}  {:<14} stock {:>4}", product.id, sku, opening);
    }

    let low = db.products().low_stock(&tenant_id, &main.id).await?;
    println!();
    println!("✓ {} products below their low-stock threshold", low.len());
    println!("✓ Seed complete!");

    Ok(())
}
