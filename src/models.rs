use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;

// ============ Identity ============

/// The three account roles. Every user owns exactly one profile of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Admin,
    Analyst,
    Customer,
}

impl RoleKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RoleKind::Admin => "admin",
            RoleKind::Analyst => "analyst",
            RoleKind::Customer => "customer",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoleKind::Admin => "Admin",
            RoleKind::Analyst => "Analyst",
            RoleKind::Customer => "Customer",
        };
        f.write_str(label)
    }
}

impl FromStr for RoleKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(RoleKind::Admin),
            "analyst" => Ok(RoleKind::Analyst),
            "customer" => Ok(RoleKind::Customer),
            other => Err(AppError::InternalError(format!(
                "Unknown profile kind '{}'",
                other
            ))),
        }
    }
}

/// A resolved role together with the role-scoped profile id.
///
/// Carried verbatim in token claims as `{"kind": "...", "id": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum Role {
    Admin(Uuid),
    Analyst(Uuid),
    Customer(Uuid),
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Admin(_) => RoleKind::Admin,
            Role::Analyst(_) => RoleKind::Analyst,
            Role::Customer(_) => RoleKind::Customer,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Role::Admin(id) | Role::Analyst(id) | Role::Customer(id) => *id,
        }
    }

    pub fn from_parts(kind: RoleKind, id: Uuid) -> Self {
        match kind {
            RoleKind::Admin => Role::Admin(id),
            RoleKind::Analyst => Role::Analyst(id),
            RoleKind::Customer => Role::Customer(id),
        }
    }
}

/// Login identity. The password hash never leaves the service.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Role profile bound 1:1 to a user.
///
/// Admins carry no personal data; analysts and customers always have a name and cpf.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: RoleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn role(&self) -> Role {
        Role::from_parts(self.kind, self.id)
    }
}

/// Role data for a profile about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewProfile {
    Admin,
    Analyst { name: String, cpf: String },
    Customer { name: String, cpf: String },
}

impl NewProfile {
    pub fn kind(&self) -> RoleKind {
        match self {
            NewProfile::Admin => RoleKind::Admin,
            NewProfile::Analyst { .. } => RoleKind::Analyst,
            NewProfile::Customer { .. } => RoleKind::Customer,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NewProfile::Admin => None,
            NewProfile::Analyst { name, .. } | NewProfile::Customer { name, .. } => Some(name),
        }
    }

    pub fn cpf(&self) -> Option<&str> {
        match self {
            NewProfile::Admin => None,
            NewProfile::Analyst { cpf, .. } | NewProfile::Customer { cpf, .. } => Some(cpf),
        }
    }
}

/// A user and its profile, inserted together.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub profile: NewProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub user: User,
    pub profile: Profile,
}

// ============ Companies ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub industry: String,
    /// Fourteen digits, no punctuation.
    pub cnpj: String,
    pub headquarters_location: Address,
    /// Written only by score propagation.
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub industry: String,
    pub cnpj: String,
    pub headquarters_location: Address,
}

// ============ Analysis requests ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "In analysis")]
    InAnalysis,
    Approved,
    Reproved,
}

impl RequestStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RequestStatus::InAnalysis => "in_analysis",
            RequestStatus::Approved => "approved",
            RequestStatus::Reproved => "reproved",
        }
    }

    /// Approved and Reproved are terminal.
    pub fn is_decided(&self) -> bool {
        !matches!(self, RequestStatus::InAnalysis)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::InAnalysis => "In analysis",
            RequestStatus::Approved => "Approved",
            RequestStatus::Reproved => "Reproved",
        };
        f.write_str(label)
    }
}

impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_analysis" => Ok(RequestStatus::InAnalysis),
            "approved" => Ok(RequestStatus::Approved),
            "reproved" => Ok(RequestStatus::Reproved),
            other => Err(AppError::InternalError(format!(
                "Unknown request status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub company_id: Uuid,
    pub motive: String,
    pub status: RequestStatus,
    pub request_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnalysisRequest {
    pub customer_id: Uuid,
    pub company_id: Uuid,
    pub motive: String,
    pub request_date: DateTime<Utc>,
}

// ============ Analyses ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Assigned,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
}

impl AnalysisStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Assigned => "assigned",
            AnalysisStatus::InProgress => "in_progress",
            AnalysisStatus::Completed => "completed",
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(AnalysisStatus::Assigned),
            "in_progress" => Ok(AnalysisStatus::InProgress),
            "completed" => Ok(AnalysisStatus::Completed),
            other => Err(AppError::InternalError(format!(
                "Unknown analysis status '{}'",
                other
            ))),
        }
    }
}

/// An analyst's scoring of the company named by an approved request.
///
/// `company_id` is copied from the request at approval so score propagation
/// does not depend on the request row surviving.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: Uuid,
    pub request_id: Uuid,
    pub company_id: Uuid,
    pub analyst_id: Uuid,
    pub firm_level_claim_score: f64,
    pub firm_level_executional_score: f64,
    pub ascore: f64,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub analysis_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub request_id: Uuid,
    pub company_id: Uuid,
    pub analyst_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl NewAnalysis {
    /// Materializes the record in its initial state: Assigned, all scores zero.
    pub fn into_analysis(self, id: Uuid) -> Analysis {
        Analysis {
            id,
            request_id: self.request_id,
            company_id: self.company_id,
            analyst_id: self.analyst_id,
            firm_level_claim_score: 0.0,
            firm_level_executional_score: 0.0,
            ascore: 0.0,
            status: AnalysisStatus::Assigned,
            created_at: self.created_at,
            analysis_date: self.created_at,
        }
    }
}

// ============ API Payloads ============

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub user: Option<Credentials>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestPayload {
    pub analysis_request: Option<CreateRequestFields>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateRequestFields {
    #[serde(rename = "customerID")]
    pub customer_id: Option<Uuid>,
    #[serde(rename = "companyID")]
    pub company_id: Option<Uuid>,
    pub motive: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPayload {
    pub analysis_request: Option<TransitionFields>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransitionFields {
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAnalysisPayload {
    pub analysis: Option<AnalysisFields>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisFields {
    pub firm_level_claim_score: Option<f64>,
    pub firm_level_executional_score: Option<f64>,
    pub status: Option<AnalysisStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub cpf: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerPayload {
    pub customer: Option<ProfileFields>,
}

#[derive(Debug, Deserialize)]
pub struct AnalystPayload {
    pub analyst: Option<ProfileFields>,
}

#[derive(Debug, Deserialize)]
pub struct AdminPayload {
    pub admin: Option<ProfileFields>,
}

#[derive(Debug, Deserialize)]
pub struct CompanyPayload {
    pub company: Option<CompanyFields>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompanyFields {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub cnpj: Option<String>,
    pub headquarters_location: Option<Address>,
}

/// Company as rendered to clients, with a formatted cnpj.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyView {
    pub id: Uuid,
    pub name: String,
    pub industry: String,
    pub cnpj: String,
    pub headquarters_location: Address,
    pub score: f64,
}

impl From<Company> for CompanyView {
    fn from(company: Company) -> Self {
        Self {
            cnpj: crate::accounts::format_cnpj(&company.cnpj),
            id: company.id,
            name: company.name,
            industry: company.industry,
            headquarters_location: company.headquarters_location,
            score: company.score,
        }
    }
}

/// Caller's own profile, as returned by `/authorized-user`.
#[derive(Debug, Serialize)]
pub struct AuthorizedUserView {
    pub role: RoleKind,
    pub profile: Profile,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serializes_as_tagged_union() {
        let id = Uuid::nil();
        let value = serde_json::to_value(Role::Customer(id)).unwrap();
        assert_eq!(value, json!({"kind": "Customer", "id": id}));

        let back: Role = serde_json::from_value(value).unwrap();
        assert_eq!(back, Role::Customer(id));
        assert_eq!(back.kind(), RoleKind::Customer);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(RequestStatus::InAnalysis).unwrap(),
            json!("In analysis")
        );
        assert_eq!(
            serde_json::to_value(AnalysisStatus::InProgress).unwrap(),
            json!("In Progress")
        );
        let parsed: RequestStatus = serde_json::from_value(json!("Approved")).unwrap();
        assert_eq!(parsed, RequestStatus::Approved);
    }

    #[test]
    fn test_db_strings_round_trip_through_from_str() {
        for status in [
            RequestStatus::InAnalysis,
            RequestStatus::Approved,
            RequestStatus::Reproved,
        ] {
            assert_eq!(status.as_db_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("pending".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_user_never_serializes_password_hash() {
        let user = User {
            id: Uuid::nil(),
            email: "a@b.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_string(&user).unwrap();
        assert!(!value.contains("argon2"));
    }

    #[test]
    fn test_new_analysis_starts_assigned_with_zero_scores() {
        let now = Utc::now();
        let analysis = NewAnalysis {
            request_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            analyst_id: Uuid::new_v4(),
            created_at: now,
        }
        .into_analysis(Uuid::new_v4());

        assert_eq!(analysis.status, AnalysisStatus::Assigned);
        assert_eq!(analysis.ascore, 0.0);
        assert_eq!(analysis.analysis_date, now);
    }
}
