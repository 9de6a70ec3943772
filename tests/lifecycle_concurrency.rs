/// Concurrency tests for the request lifecycle over the in-memory store.
/// Racing callers must never double-approve a request or open two pending
/// requests for the same customer/company pair.
use chrono::Utc;
use std::sync::Arc;

use rust_analysis_api::assignment::AnalystPicker;
use rust_analysis_api::errors::AppError;
use rust_analysis_api::lifecycle::RequestLifecycle;
use rust_analysis_api::memory_store::MemoryStore;
use rust_analysis_api::models::{
    Address, NewAccount, NewCompany, NewProfile, RequestStatus, Role,
};
use rust_analysis_api::store::Store;

struct Fixture {
    store: Arc<dyn Store>,
    lifecycle: Arc<RequestLifecycle>,
    customer: Role,
    company_id: uuid::Uuid,
}

async fn fixture(analysts: usize) -> Fixture {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let customer = store
        .create_account(NewAccount {
            email: "racer@test.com".to_string(),
            password_hash: "unused".to_string(),
            profile: NewProfile::Customer {
                name: "Racer".to_string(),
                cpf: "90000000001".to_string(),
            },
        })
        .await
        .unwrap();
    for i in 0..analysts {
        store
            .create_account(NewAccount {
                email: format!("analyst{}@test.com", i),
                password_hash: "unused".to_string(),
                profile: NewProfile::Analyst {
                    name: format!("Analyst {}", i),
                    cpf: format!("9100000000{}", i),
                },
            })
            .await
            .unwrap();
    }
    let company = store
        .create_company(NewCompany {
            name: "Contested".to_string(),
            industry: "Finance".to_string(),
            cnpj: "77888999000100".to_string(),
            headquarters_location: Address {
                street: "1 Race Way".to_string(),
                city: "Speedville".to_string(),
                state: "SP".to_string(),
                postal_code: "01000-000".to_string(),
                country: "Brazil".to_string(),
            },
        })
        .await
        .unwrap();

    let picker = Arc::new(AnalystPicker::seeded(store.clone(), 7));
    Fixture {
        lifecycle: Arc::new(RequestLifecycle::new(store.clone(), picker)),
        store,
        customer: customer.profile.role(),
        company_id: company.id,
    }
}

#[tokio::test]
async fn test_concurrent_approvals_create_one_analysis() {
    let fx = fixture(3).await;
    let request = fx
        .lifecycle
        .create(&fx.customer, fx.customer.id(), fx.company_id, "race")
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lifecycle = fx.lifecycle.clone();
            let caller = fx.customer;
            tokio::spawn(async move {
                lifecycle
                    .transition(&caller, request.id, RequestStatus::Approved)
                    .await
            })
        })
        .collect();

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(transition) => {
                assert!(transition.analysis.is_some());
                approved += 1;
            }
            Err(err) => assert!(
                matches!(err, AppError::InvalidState(_) | AppError::Conflict(_)),
                "unexpected error: {:?}",
                err
            ),
        }
    }
    assert_eq!(approved, 1);

    let page = rust_analysis_api::pagination::Page { number: 1, size: 100 };
    let (analyses, total) = fx.store.list_analyses(page).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(analyses[0].request_id, request.id);
}

#[tokio::test]
async fn test_concurrent_creation_leaves_one_pending_request() {
    let fx = fixture(1).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lifecycle = fx.lifecycle.clone();
            let caller = fx.customer;
            let company_id = fx.company_id;
            tokio::spawn(async move {
                lifecycle
                    .create(&caller, caller.id(), company_id, "race")
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(err, AppError::Conflict(_)), "{:?}", err),
        }
    }
    assert_eq!(created, 1);

    let pending = fx
        .store
        .requests_for_pair(fx.customer.id(), fx.company_id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_reproved_request_does_not_block_a_new_one() {
    let fx = fixture(1).await;
    let first = fx
        .lifecycle
        .create(&fx.customer, fx.customer.id(), fx.company_id, "first")
        .await
        .unwrap();
    fx.lifecycle
        .transition(&fx.customer, first.id, RequestStatus::Reproved)
        .await
        .unwrap();

    let second = fx
        .lifecycle
        .create(&fx.customer, fx.customer.id(), fx.company_id, "second")
        .await
        .unwrap();
    assert_eq!(second.status, RequestStatus::InAnalysis);
    assert!(second.request_date >= first.request_date);
    assert!(second.request_date <= Utc::now());
}

#[tokio::test]
async fn test_unknown_company_is_not_found() {
    let fx = fixture(1).await;
    let err = fx
        .lifecycle
        .create(&fx.customer, fx.customer.id(), uuid::Uuid::new_v4(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = fx
        .lifecycle
        .create(&fx.customer, fx.customer.id(), fx.company_id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}
