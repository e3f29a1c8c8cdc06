//! Shared helpers for the integration suites.
//!
//! Every test runs against a fresh in-memory store; the returned `Barrel`
//! must be kept alive for the database handle to stay usable.

use std::sync::Arc;

use barrel::{Barrel, Database};

pub async fn fresh_db(name: &str) -> (Barrel, Arc<Database>) {
    let barrel = Barrel::memory();
    let db = barrel.open(Barrel::DEFAULT_STORE, name).await.unwrap();
    (barrel, db)
}
