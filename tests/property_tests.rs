/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use chrono::Utc;
use proptest::prelude::*;
use uuid::Uuid;

use rust_analysis_api::accounts::{format_cnpj, normalize_cnpj, normalize_cpf};
use rust_analysis_api::errors::AppError;
use rust_analysis_api::lifecycle::check_transition;
use rust_analysis_api::models::{AnalysisStatus, NewAnalysis, RequestStatus};
use rust_analysis_api::pagination::{Page, PageQuery};
use rust_analysis_api::scoring::{ascore, ScoreUpdate, MAX_SCORE, MIN_SCORE};

fn request_status() -> impl Strategy<Value = RequestStatus> {
    prop_oneof![
        Just(RequestStatus::InAnalysis),
        Just(RequestStatus::Approved),
        Just(RequestStatus::Reproved),
    ]
}

fn analysis_status() -> impl Strategy<Value = Option<AnalysisStatus>> {
    prop_oneof![
        Just(None),
        Just(Some(AnalysisStatus::Assigned)),
        Just(Some(AnalysisStatus::InProgress)),
        Just(Some(AnalysisStatus::Completed)),
    ]
}

// Property: ascore is always the mean of the two scores, whatever order fields arrive in
proptest! {
    #[test]
    fn ascore_tracks_latest_scores(
        updates in prop::collection::vec(
            (
                prop::option::of(0.0f64..=10.0),
                prop::option::of(0.0f64..=10.0),
                analysis_status(),
            ),
            1..8,
        )
    ) {
        let mut analysis = NewAnalysis {
            request_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            analyst_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
        .into_analysis(Uuid::new_v4());

        for (claim, executional, status) in updates {
            let Ok(update) = ScoreUpdate::new(claim, executional, status) else {
                prop_assert!(claim.is_none() && executional.is_none() && status.is_none());
                continue;
            };
            update.apply_to(&mut analysis, Utc::now());

            prop_assert_eq!(
                analysis.ascore,
                ascore(analysis.firm_level_claim_score, analysis.firm_level_executional_score)
            );
            prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&analysis.ascore));
        }
    }

    #[test]
    fn out_of_range_scores_never_validate(score in prop_oneof![-1.0e6f64..-0.001, 10.001f64..1.0e6]) {
        prop_assert!(ScoreUpdate::new(Some(score), None, None).is_err());
        prop_assert!(ScoreUpdate::new(None, Some(score), None).is_err());
    }
}

// Property: only a pending request moves, and only to a decided status
proptest! {
    #[test]
    fn transition_table(from in request_status(), to in request_status()) {
        let result = check_transition(from, to);
        match (from, to) {
            (_, RequestStatus::InAnalysis) => {
                prop_assert!(matches!(result, Err(AppError::BadRequest(_))));
            }
            (RequestStatus::InAnalysis, _) => prop_assert!(result.is_ok()),
            _ => prop_assert!(matches!(result, Err(AppError::InvalidState(_)))),
        }
    }
}

// Property: document normalization keeps digits in order
proptest! {
    #[test]
    fn cpf_punctuation_is_stripped(cpf in "[0-9]{11}") {
        let formatted = format!("{}.{}.{}-{}", &cpf[0..3], &cpf[3..6], &cpf[6..9], &cpf[9..]);
        prop_assert_eq!(normalize_cpf(&formatted), Some(cpf.clone()));
        prop_assert_eq!(normalize_cpf(&cpf), Some(cpf));
    }

    #[test]
    fn cnpj_format_round_trips(cnpj in "[0-9]{14}") {
        let formatted = format_cnpj(&cnpj);
        prop_assert_eq!(formatted.len(), 18);
        prop_assert_eq!(normalize_cnpj(&formatted), Some(cnpj));
    }

    #[test]
    fn document_normalization_never_panics(raw in "\\PC*") {
        let _ = normalize_cpf(&raw);
        let _ = normalize_cnpj(&raw);
    }
}

// Property: page windows cover every item exactly once
proptest! {
    #[test]
    fn pages_partition_the_collection(total in 0usize..300, limit in 1u32..=100) {
        let items: Vec<usize> = (0..total).collect();
        let first = Page::from(PageQuery { page: Some(1), limit: Some(limit) });
        let pages = first.info(total as u64).total_pages;

        let mut seen = Vec::new();
        for number in 1..=pages as u32 {
            let page = Page::from(PageQuery { page: Some(number), limit: Some(limit) });
            seen.extend(page.slice(&items));
        }
        prop_assert_eq!(seen, items);
    }
}
