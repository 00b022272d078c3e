//! Metadata store bootstrap
//!
//! SQLite holds the read-mostly inputs of the pipeline (glossary, schema
//! catalog) and the human-review queue. The warehouse itself is reached
//! through `services::warehouse`, never through this pool.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(path) = url
        .strip_prefix("sqlite://")
        .filter(|p| *p != ":memory:" && !p.is_empty())
        && let Some(parent) = std::path::Path::new(path).parent()
    {
        let _ = std::fs::create_dir_all(parent);
    }

    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Create the metadata tables if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS glossary (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            synonym TEXT NOT NULL UNIQUE,
            canonical_term TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            sql_fragment TEXT NOT NULL DEFAULT '',
            locale_variants TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_catalog (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schema_name TEXT NOT NULL DEFAULT '',
            table_name TEXT NOT NULL,
            columns TEXT NOT NULL,
            embedding TEXT NOT NULL DEFAULT '[]',
            access_tags TEXT NOT NULL DEFAULT '[]',
            indexed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(schema_name, table_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            query TEXT NOT NULL,
            sql TEXT NOT NULL,
            confidence REAL NOT NULL,
            routing TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Install a starter glossary and schema catalog on an empty metadata store
/// so a fresh deployment can answer questions before the offline indexer has
/// run. Real deployments overwrite these rows from the warehouse.
pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let glossary_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM glossary")
        .fetch_one(pool)
        .await?;

    if glossary_count == 0 {
        tracing::info!("Seeding default glossary");
        for (synonym, canonical, category, fragment, ar_variants) in seed_glossary() {
            let variants = serde_json::json!({ "ar": ar_variants }).to_string();
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO glossary
                    (synonym, canonical_term, category, sql_fragment, locale_variants)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(synonym)
            .bind(canonical)
            .bind(category)
            .bind(fragment)
            .bind(variants)
            .execute(pool)
            .await?;
        }
    }

    let catalog_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_catalog")
        .fetch_one(pool)
        .await?;

    if catalog_count == 0 {
        tracing::info!("Seeding default schema catalog");
        for (table, columns) in seed_catalog() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO schema_catalog (schema_name, table_name, columns)
                VALUES ('', ?, ?)
                "#,
            )
            .bind(table)
            .bind(columns.to_string())
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

type GlossarySeed = (&'static str, &'static str, &'static str, &'static str, Vec<&'static str>);

fn seed_glossary() -> Vec<GlossarySeed> {
    vec![
        (
            "total revenue",
            "billing.total_amount",
            "accounting",
            "SUM(billing.total_amount)",
            vec!["إجمالي الإيرادات"],
        ),
        (
            "revenue",
            "billing.total_amount",
            "accounting",
            "SUM(billing.total_amount)",
            vec!["الإيرادات", "الايرادات"],
        ),
        ("invoices", "billing", "accounting", "", vec!["الفواتير"]),
        (
            "expenses",
            "expenses.amount",
            "accounting",
            "SUM(expenses.amount)",
            vec!["المصروفات", "النفقات"],
        ),
        ("patients", "patients", "healthcare", "", vec!["المرضى", "مرضى"]),
        (
            "patient visits",
            "patient_visits",
            "healthcare",
            "COUNT(patient_visits.visit_id)",
            vec!["زيارات المرضى"],
        ),
        (
            "visits",
            "patient_visits",
            "healthcare",
            "COUNT(patient_visits.visit_id)",
            vec!["زيارات", "الزيارات"],
        ),
        ("appointments", "appointments", "healthcare", "", vec!["المواعيد"]),
        ("departments", "departments", "general", "", vec!["الأقسام"]),
        (
            "insurance claims",
            "claims",
            "accounting",
            "COUNT(claims.claim_id)",
            vec!["مطالبات التأمين"],
        ),
    ]
}

fn seed_catalog() -> Vec<(&'static str, serde_json::Value)> {
    use serde_json::json;
    vec![
        (
            "billing",
            json!([
                {"name": "billing_id", "semantic_type": "identifier", "description": "invoice identifier"},
                {"name": "patient_id", "semantic_type": "identifier", "description": "patient reference"},
                {"name": "total_amount", "semantic_type": "currency", "description": "invoiced amount"},
                {"name": "billing_date", "semantic_type": "date", "description": "invoice date"},
                {"name": "department", "semantic_type": "category", "description": "issuing department"},
                {"name": "payment_status", "semantic_type": "category", "description": "paid, pending or overdue",
                 "sample_values": ["paid", "pending", "overdue"]}
            ]),
        ),
        (
            "patient_visits",
            json!([
                {"name": "visit_id", "semantic_type": "identifier", "description": "visit identifier"},
                {"name": "patient_id", "semantic_type": "identifier", "description": "patient reference"},
                {"name": "visit_date", "semantic_type": "date", "description": "date of the visit"},
                {"name": "department", "semantic_type": "category", "description": "treating department"},
                {"name": "visit_type", "semantic_type": "category", "description": "outpatient, inpatient or emergency",
                 "sample_values": ["outpatient", "inpatient", "emergency"]}
            ]),
        ),
        (
            "patients",
            json!([
                {"name": "patient_id", "semantic_type": "identifier", "description": "patient identifier"},
                {"name": "name_en", "semantic_type": "text", "description": "patient name (English)"},
                {"name": "name_ar", "semantic_type": "text", "description": "patient name (Arabic)"},
                {"name": "date_of_birth", "semantic_type": "date", "description": "date of birth"},
                {"name": "gender", "semantic_type": "category", "description": "patient gender"}
            ]),
        ),
        (
            "expenses",
            json!([
                {"name": "expense_id", "semantic_type": "identifier", "description": "expense identifier"},
                {"name": "amount", "semantic_type": "currency", "description": "expense amount"},
                {"name": "expense_date", "semantic_type": "date", "description": "posting date"},
                {"name": "category", "semantic_type": "category", "description": "expense category"}
            ]),
        ),
        (
            "departments",
            json!([
                {"name": "department_id", "semantic_type": "identifier", "description": "department identifier"},
                {"name": "name_en", "semantic_type": "text", "description": "department name (English)"},
                {"name": "name_ar", "semantic_type": "text", "description": "department name (Arabic)"}
            ]),
        ),
        (
            "appointments",
            json!([
                {"name": "appointment_id", "semantic_type": "identifier", "description": "appointment identifier"},
                {"name": "patient_id", "semantic_type": "identifier", "description": "patient reference"},
                {"name": "scheduled_at", "semantic_type": "timestamp", "description": "scheduled time"},
                {"name": "status", "semantic_type": "category", "description": "booked, completed or cancelled"}
            ]),
        ),
        (
            "claims",
            json!([
                {"name": "claim_id", "semantic_type": "identifier", "description": "claim identifier"},
                {"name": "billing_id", "semantic_type": "identifier", "description": "invoice reference"},
                {"name": "claim_amount", "semantic_type": "currency", "description": "claimed amount"},
                {"name": "claim_date", "semantic_type": "date", "description": "submission date"},
                {"name": "status", "semantic_type": "category", "description": "submitted, approved or rejected"}
            ]),
        ),
    ]
}
