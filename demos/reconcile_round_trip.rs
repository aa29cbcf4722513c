//! Keeping undeclared server fields across a typed round trip.
//!
//! This example shows how to:
//! - Deserialize server JSON into a type that models only some fields
//! - Modify the typed value
//! - Produce JSON for re-submission that still carries the other fields
//! - Inspect operations that no longer apply after a modification
//!
//! Run with: `cargo run --example reconcile_round_trip`

use restkeep::{Error, Reconciled};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct Contact {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Customer {
    id: u64,
    name: String,
    contact: Option<Contact>,
}

const SERVER_JSON: &str = r#"{
    "id": 81,
    "name": "Ada Industries",
    "etag": "W/\"5e1\"",
    "contact": { "email": "ops@ada.example", "verified": true },
    "segments": ["manufacturing", "emea"]
}"#;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("restkeep=warn")),
        )
        .init();

    let mut customer = Reconciled::<Customer>::from_json(SERVER_JSON)?;
    println!("Typed view: {:?}", *customer);
    println!(
        "Captured {} operations for undeclared fields",
        customer.reconciler().patch().len()
    );
    println!();

    println!("=== Rename ===");
    customer.name = "Ada Industries GmbH".to_string();
    println!("{}", customer.to_json()?);
    println!();

    println!("=== Drop contact ===");
    customer.contact = None;
    let replay = customer.to_json_with_report()?;
    println!("{}", replay.json);
    for skipped in &replay.skipped {
        println!(
            "Skipped #{} {} {}: {}",
            skipped.index,
            skipped.operation.name(),
            skipped.operation.path(),
            skipped.error
        );
    }

    Ok(())
}
