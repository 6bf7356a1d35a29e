//! # Seed Data Generator
//!
//! Populates a ledger database with products, stock levels and lots for
//! local development.
//!
//! ## Usage
//! ```bash
//! cargo run -p saleledger-db --bin seed
//! cargo run -p saleledger-db --bin seed -- --count 200 --db ./data/ledger.db
//! ```
//!
//! Each product gets a stock level equal to the sum of its lots. Roughly
//! one lot in four is undated.

use chrono::{Duration, Utc};
use saleledger_db::{Database, DbConfig, NewProduct};
use std::env;

const CATALOG: &[(&str, &str, i64)] = &[
    ("MILK", "Whole Milk 1L", 249),
    ("YOGT", "Greek Yogurt 500g", 389),
    ("BRED", "Sourdough Loaf", 450),
    ("EGGS", "Free Range Eggs x12", 599),
    ("COFF", "Ground Coffee 250g", 899),
    ("RICE", "Basmati Rice 1kg", 325),
    ("OLIV", "Olive Oil 500ml", 1099),
    ("TEAB", "Green Tea x40", 475),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 40;
    let mut db_path = String::from("./saleledger_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(count);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("saleledger seed data generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 40)");
                println!("  -d, --db <PATH>    Database file path (default: ./saleledger_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Database: {}", db_path);
    println!("Products: {}", count);

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("Database already has {} products; skipping.", existing);
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let start = std::time::Instant::now();
    let mut lots_created = 0;

    for n in 0..count {
        let (code, name, base_price) = CATALOG[n % CATALOG.len()];
        let batch = n / CATALOG.len();

        let product = db
            .products()
            .insert(&NewProduct {
                sku: format!("{}-{:03}", code, n),
                name: if batch == 0 {
                    name.to_string()
                } else {
                    format!("{} #{}", name, batch + 1)
                },
                price_cents: base_price + (batch as i64) * 25,
            })
            .await?;

        let mut on_hand = 0;
        for lot_idx in 0..(1 + n % 3) {
            let quantity = 5 + ((n * 7 + lot_idx * 3) % 20) as i64;
            let expiry = if (n + lot_idx) % 4 == 3 {
                None
            } else {
                Some(today + Duration::days(10 + (n as i64 * 13 + lot_idx as i64 * 29) % 180))
            };
            let lot_code = format!("L{:04}-{}", n, lot_idx);

            db.lots()
                .insert(product.id, Some(&lot_code), quantity, expiry)
                .await?;
            on_hand += quantity;
            lots_created += 1;
        }

        db.stock().set(product.id, on_hand).await?;
    }

    println!(
        "Generated {} products and {} lots in {:?}",
        count,
        lots_created,
        start.elapsed()
    );

    db.close().await;
    Ok(())
}
