//! Analysis scoring: partial score/status updates, ascore derivation and
//! propagation of the ascore into the analyzed company.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Analysis, AnalysisFields, AnalysisStatus, Role};
use crate::pagination::Page;
use crate::store::Store;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

/// Arithmetic mean of the claim and executional scores.
pub fn ascore(claim: f64, executional: f64) -> f64 {
    (claim + executional) / 2.0
}

/// A validated partial update of an analysis. At least one field is present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreUpdate {
    claim: Option<f64>,
    executional: Option<f64>,
    status: Option<AnalysisStatus>,
}

impl ScoreUpdate {
    pub fn new(
        claim: Option<f64>,
        executional: Option<f64>,
        status: Option<AnalysisStatus>,
    ) -> Result<Self, AppError> {
        if claim.is_none() && executional.is_none() && status.is_none() {
            return Err(AppError::BadRequest(
                "To update an analysis, at least one field (firmLevelClaimScore, firmLevelExecutionalScore, status) must be provided".to_string(),
            ));
        }
        check_range("firmLevelClaimScore", claim)?;
        check_range("firmLevelExecutionalScore", executional)?;

        Ok(Self {
            claim,
            executional,
            status,
        })
    }

    pub fn touches_scores(&self) -> bool {
        self.claim.is_some() || self.executional.is_some()
    }

    /// Mutates `analysis` in place.
    ///
    /// The ascore is recomputed whenever a score is supplied, and
    /// `analysis_date` moves to `now` when status becomes Completed.
    pub fn apply_to(&self, analysis: &mut Analysis, now: DateTime<Utc>) {
        if let Some(claim) = self.claim {
            analysis.firm_level_claim_score = claim;
        }
        if let Some(executional) = self.executional {
            analysis.firm_level_executional_score = executional;
        }
        if self.touches_scores() {
            analysis.ascore = ascore(
                analysis.firm_level_claim_score,
                analysis.firm_level_executional_score,
            );
        }
        if let Some(status) = self.status {
            if status == AnalysisStatus::Completed && analysis.status != AnalysisStatus::Completed
            {
                analysis.analysis_date = now;
            }
            analysis.status = status;
        }
    }
}

impl TryFrom<AnalysisFields> for ScoreUpdate {
    type Error = AppError;

    fn try_from(fields: AnalysisFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.firm_level_claim_score,
            fields.firm_level_executional_score,
            fields.status,
        )
    }
}

fn check_range(field: &str, value: Option<f64>) -> Result<(), AppError> {
    match value {
        Some(v) if !v.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&v) => {
            Err(AppError::BadRequest(format!(
                "{} must be between {} and {}",
                field, MIN_SCORE, MAX_SCORE
            )))
        }
        _ => Ok(()),
    }
}

/// Operations an analyst performs on the analyses assigned to them.
pub struct ScoringEngine {
    store: Arc<dyn Store>,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, analysis_id: Uuid) -> Result<Analysis, AppError> {
        self.store
            .find_analysis(analysis_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Analysis not found".to_string()))
    }

    pub async fn list(&self, page: Page) -> Result<(Vec<Analysis>, u64), AppError> {
        self.store.list_analyses(page).await
    }

    /// Applies a score/status update on behalf of the assigned analyst and
    /// propagates the resulting ascore to the company.
    pub async fn update_scores(
        &self,
        caller: &Role,
        analysis_id: Uuid,
        update: ScoreUpdate,
    ) -> Result<Analysis, AppError> {
        let current = self.get(analysis_id).await?;
        ensure_assigned(caller, &current)?;

        let updated = self
            .store
            .update_analysis(analysis_id, &update, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound("Analysis not found".to_string()))?;

        if update.touches_scores() {
            tracing::info!(
                "Analysis {} scored (claim {}, executional {}); company {} score set to {}",
                updated.id,
                updated.firm_level_claim_score,
                updated.firm_level_executional_score,
                updated.company_id,
                updated.ascore
            );
        } else {
            tracing::info!("Analysis {} status set to {:?}", updated.id, updated.status);
        }

        Ok(updated)
    }

    pub async fn delete(&self, caller: &Role, analysis_id: Uuid) -> Result<(), AppError> {
        let current = self.get(analysis_id).await?;
        ensure_assigned(caller, &current)?;

        if !self.store.delete_analysis(analysis_id).await? {
            return Err(AppError::NotFound("Analysis not found".to_string()));
        }
        tracing::info!("Analysis {} deleted by analyst {}", analysis_id, caller.id());
        Ok(())
    }
}

fn ensure_assigned(caller: &Role, analysis: &Analysis) -> Result<(), AppError> {
    match caller {
        Role::Analyst(id) if *id == analysis.analyst_id => Ok(()),
        _ => Err(AppError::Forbidden(
            "You do not have the necessary permissions to access this analysis".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAnalysis;

    fn fresh() -> Analysis {
        NewAnalysis {
            request_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            analyst_id: Uuid::new_v4(),
            created_at: Utc::now() - chrono::Duration::hours(1),
        }
        .into_analysis(Uuid::new_v4())
    }

    #[test]
    fn test_empty_update_is_rejected() {
        let err = ScoreUpdate::new(None, None, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_zero_is_a_supplied_score() {
        let update = ScoreUpdate::new(Some(0.0), None, None).unwrap();
        assert!(update.touches_scores());
    }

    #[test]
    fn test_out_of_range_scores_are_rejected() {
        assert!(ScoreUpdate::new(Some(10.5), None, None).is_err());
        assert!(ScoreUpdate::new(None, Some(-0.1), None).is_err());
        assert!(ScoreUpdate::new(Some(f64::NAN), None, None).is_err());
        assert!(ScoreUpdate::new(Some(10.0), Some(0.0), None).is_ok());
    }

    #[test]
    fn test_partial_score_update_recomputes_ascore() {
        let mut analysis = fresh();
        ScoreUpdate::new(Some(8.0), None, None)
            .unwrap()
            .apply_to(&mut analysis, Utc::now());
        assert_eq!(analysis.ascore, 4.0);

        ScoreUpdate::new(None, Some(10.0), None)
            .unwrap()
            .apply_to(&mut analysis, Utc::now());
        assert_eq!(analysis.firm_level_claim_score, 8.0);
        assert_eq!(analysis.ascore, 9.0);
    }

    #[test]
    fn test_status_only_update_keeps_ascore() {
        let mut analysis = fresh();
        analysis.firm_level_claim_score = 6.0;
        analysis.firm_level_executional_score = 2.0;
        analysis.ascore = 4.0;

        let update = ScoreUpdate::new(None, None, Some(AnalysisStatus::InProgress)).unwrap();
        assert!(!update.touches_scores());
        update.apply_to(&mut analysis, Utc::now());

        assert_eq!(analysis.status, AnalysisStatus::InProgress);
        assert_eq!(analysis.ascore, 4.0);
    }

    #[test]
    fn test_completion_refreshes_analysis_date_once() {
        let mut analysis = fresh();
        let created = analysis.analysis_date;
        let first = Utc::now();

        ScoreUpdate::new(None, None, Some(AnalysisStatus::Completed))
            .unwrap()
            .apply_to(&mut analysis, first);
        assert_eq!(analysis.analysis_date, first);
        assert!(analysis.analysis_date > created);

        let later = first + chrono::Duration::minutes(5);
        ScoreUpdate::new(Some(1.0), None, Some(AnalysisStatus::Completed))
            .unwrap()
            .apply_to(&mut analysis, later);
        assert_eq!(analysis.analysis_date, first);
    }

    #[test]
    fn test_only_the_assigned_analyst_passes() {
        let analysis = fresh();
        assert!(ensure_assigned(&Role::Analyst(analysis.analyst_id), &analysis).is_ok());
        assert!(ensure_assigned(&Role::Analyst(Uuid::new_v4()), &analysis).is_err());
        assert!(ensure_assigned(&Role::Customer(analysis.analyst_id), &analysis).is_err());
    }
}
