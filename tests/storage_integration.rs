use chrono::Utc;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use rust_analysis_api::db::Database;
use rust_analysis_api::db_storage::PgStore;
use rust_analysis_api::models::{
    Address, AnalysisStatus, NewAccount, NewAnalysis, NewAnalysisRequest, NewCompany, NewProfile,
    RequestStatus,
};
use rust_analysis_api::scoring::ScoreUpdate;
use rust_analysis_api::store::Store;

/// Integration smoke test for the Postgres store: approval, scoring and propagation.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn approval_and_scoring_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.pool.clone()));

    // Unique identities so repeated runs do not collide.
    let tag = Uuid::new_v4().simple().to_string();
    let digits = format!("{:014}", Uuid::new_v4().as_u128() % 100_000_000_000_000);

    let customer = store
        .create_account(NewAccount {
            email: format!("customer-{}@test.com", tag),
            password_hash: "$argon2id$unused".to_string(),
            profile: NewProfile::Customer {
                name: "Smoke Customer".to_string(),
                cpf: digits[..11].to_string(),
            },
        })
        .await?;
    let analyst = store
        .create_account(NewAccount {
            email: format!("analyst-{}@test.com", tag),
            password_hash: "$argon2id$unused".to_string(),
            profile: NewProfile::Analyst {
                name: "Smoke Analyst".to_string(),
                cpf: digits[3..].to_string(),
            },
        })
        .await?;
    let company = store
        .create_company(NewCompany {
            name: format!("Smoke {}", tag),
            industry: "Testing".to_string(),
            cnpj: digits.clone(),
            headquarters_location: Address {
                street: "1 Test Road".to_string(),
                city: "Testville".to_string(),
                state: "TS".to_string(),
                postal_code: "00000-000".to_string(),
                country: "Testland".to_string(),
            },
        })
        .await?;

    let request = store
        .insert_request(NewAnalysisRequest {
            customer_id: customer.profile.id,
            company_id: company.id,
            motive: "smoke".to_string(),
            request_date: Utc::now(),
        })
        .await?;
    assert_eq!(request.status, RequestStatus::InAnalysis);

    // The partial unique index rejects a second pending request for the pair
    let duplicate = store
        .insert_request(NewAnalysisRequest {
            customer_id: customer.profile.id,
            company_id: company.id,
            motive: "again".to_string(),
            request_date: Utc::now(),
        })
        .await;
    assert_eq!(
        duplicate.unwrap_err().status(),
        axum::http::StatusCode::CONFLICT
    );

    let (approved, analysis) = store
        .approve_request(
            request.id,
            NewAnalysis {
                request_id: request.id,
                company_id: company.id,
                analyst_id: analyst.profile.id,
                created_at: Utc::now(),
            },
        )
        .await?;
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(analysis.status, AnalysisStatus::Assigned);

    let update = ScoreUpdate::new(Some(8.0), Some(10.0), None)?;
    let scored = store
        .update_analysis(analysis.id, &update, Utc::now())
        .await?
        .ok_or_else(|| anyhow::anyhow!("analysis vanished"))?;
    assert_eq!(scored.ascore, 9.0);

    let company = store
        .find_company(company.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("company vanished"))?;
    assert_eq!(company.score, 9.0);

    assert!(store.delete_request(request.id).await?);
    assert!(store.find_analysis(analysis.id).await?.is_some());
    Ok(())
}
