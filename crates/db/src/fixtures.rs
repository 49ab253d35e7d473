use serde_json::{json, Value};

use foodlink_core::records::{Collection, Record};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlRecordStore};

/// Deterministic demo records: a handful of users across roles and the partner
/// organizations that receive donations.
struct SeedRecord {
    collection: Collection,
    id: &'static str,
    body: fn() -> Value,
}

const SEED_RECORDS: &[SeedRecord] = &[
    SeedRecord {
        collection: Collection::Users,
        id: "user-admin-001",
        body: || {
            json!({
                "id": "user-admin-001",
                "email": "coordinator@foodlink.example",
                "display_name": "Dana Coordinator",
                "role": "Admin",
            })
        },
    },
    SeedRecord {
        collection: Collection::Users,
        id: "user-donor-001",
        body: || {
            json!({
                "id": "user-donor-001",
                "email": "orders@cornerbakery.example",
                "display_name": "Corner Bakery",
                "role": "Donor",
            })
        },
    },
    SeedRecord {
        collection: Collection::Users,
        id: "user-volunteer-001",
        body: || {
            json!({
                "id": "user-volunteer-001",
                "email": "sam@volunteers.example",
                "display_name": "Sam Driver",
                "role": "Volunteer",
            })
        },
    },
    SeedRecord {
        collection: Collection::Partners,
        id: "partner-001",
        body: || {
            json!({
                "id": "partner-001",
                "name": "Eastside Community Pantry",
                "contact_email": "intake@eastside.example",
                "contact_phone": "512-555-0141",
                "max_capacity": 400,
            })
        },
    },
    SeedRecord {
        collection: Collection::Partners,
        id: "partner-002",
        body: || {
            json!({
                "id": "partner-002",
                "name": "Riverside Family Shelter",
                "contact_email": "kitchen@riverside.example",
                "contact_phone": "512-555-0177",
                "max_capacity": 150,
            })
        },
    },
];

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// Seed records as `(collection, record)` pairs, for stores that are not SQL backed.
    pub fn records() -> Vec<(Collection, Record)> {
        SEED_RECORDS
            .iter()
            .filter_map(|seed| match (seed.body)() {
                Value::Object(record) => Some((seed.collection, record)),
                _ => None,
            })
            .collect()
    }

    /// Upserts the demo records. Loading twice leaves the same rows.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let store = SqlRecordStore::new(pool.clone());
        let mut records_seeded = Vec::with_capacity(SEED_RECORDS.len());

        for (collection, record) in Self::records() {
            let id = store.upsert(collection, &record).await?;
            records_seeded.push((collection, id));
        }

        tracing::info!(
            event_name = "db.fixtures.demo_loaded",
            records = records_seeded.len(),
            "demo records loaded"
        );
        Ok(SeedResult { records_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_RECORDS.len());

        for seed in SEED_RECORDS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM records WHERE collection = ?1 AND id = ?2)",
            )
            .bind(seed.collection.as_str())
            .bind(seed.id)
            .fetch_one(pool)
            .await?;
            checks.push((seed.id, exists == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for seed in SEED_RECORDS {
            sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
                .bind(seed.collection.as_str())
                .bind(seed.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub records_seeded: Vec<(Collection, String)>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
