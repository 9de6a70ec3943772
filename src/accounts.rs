//! Profile registration, company registration and the identity checks shared
//! by every creation path.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::auth::hash_password_blocking;
use crate::errors::AppError;
use crate::models::{
    Account, Address, AuthorizedUserView, Company, CompanyFields, NewAccount, NewCompany,
    NewProfile, ProfileFields, RoleKind, UserSummary,
};
use crate::pagination::Page;
use crate::store::Store;

const CPF_DIGITS: usize = 11;
const CNPJ_DIGITS: usize = 14;
const MIN_PASSWORD_LEN: usize = 6;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^\w[A-Za-z0-9._%+-]*@[A-Za-z0-9.-]+\.[A-Za-z0-9.-]+$")
            .expect("email regex is valid")
    })
}

/// Trims and lowercases; `None` if the result is not an address.
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    email_regex().is_match(&email).then_some(email)
}

/// Strips punctuation and checks the digit count.
fn normalize_document(raw: &str, digits: usize) -> Option<String> {
    if !raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '/' | ' '))
    {
        return None;
    }
    let numeric: String = raw.chars().filter(char::is_ascii_digit).collect();
    (numeric.len() == digits).then_some(numeric)
}

pub fn normalize_cpf(raw: &str) -> Option<String> {
    normalize_document(raw, CPF_DIGITS)
}

pub fn normalize_cnpj(raw: &str) -> Option<String> {
    normalize_document(raw, CNPJ_DIGITS)
}

/// Renders as `00.000.000/0000-00`, formatting as much as the input allows.
pub fn format_cnpj(cnpj: &str) -> String {
    let digits: String = cnpj.chars().filter(char::is_ascii_digit).collect();
    let mut formatted = String::with_capacity(18);
    for (i, c) in digits.chars().enumerate() {
        match i {
            2 | 5 => formatted.push('.'),
            8 => formatted.push('/'),
            12 => formatted.push('-'),
            _ => {}
        }
        formatted.push(c);
    }
    formatted
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Field '{}' is required", field)))
}

/// Validated registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub profile: NewProfile,
}

impl Registration {
    /// Validates the raw payload for a profile of `kind`.
    pub fn parse(kind: RoleKind, fields: ProfileFields) -> Result<Self, AppError> {
        let email = required(fields.email, "email")?;
        let email = normalize_email(&email)
            .ok_or_else(|| AppError::BadRequest("Invalid email address".to_string()))?;

        let password = fields
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("Field 'password' is required".to_string()))?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::BadRequest(format!(
                "Password must have at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let profile = match kind {
            RoleKind::Admin => NewProfile::Admin,
            RoleKind::Analyst | RoleKind::Customer => {
                let name = required(fields.name, "name")?;
                let cpf = required(fields.cpf, "cpf")?;
                let cpf = normalize_cpf(&cpf).ok_or_else(|| {
                    AppError::BadRequest("cpf must contain exactly 11 digits".to_string())
                })?;
                if kind == RoleKind::Analyst {
                    NewProfile::Analyst { name, cpf }
                } else {
                    NewProfile::Customer { name, cpf }
                }
            }
        };

        Ok(Self {
            email,
            password,
            profile,
        })
    }
}

pub fn parse_company(fields: CompanyFields) -> Result<NewCompany, AppError> {
    let name = required(fields.name, "name")?;
    let industry = required(fields.industry, "industry")?;
    let cnpj = required(fields.cnpj, "cnpj")?;
    let cnpj = normalize_cnpj(&cnpj)
        .ok_or_else(|| AppError::BadRequest("cnpj must contain exactly 14 digits".to_string()))?;
    let location = fields.headquarters_location.ok_or_else(|| {
        AppError::BadRequest("Field 'headquartersLocation' is required".to_string())
    })?;

    let headquarters_location = Address {
        street: required(Some(location.street), "headquartersLocation.street")?,
        city: required(Some(location.city), "headquartersLocation.city")?,
        state: required(Some(location.state), "headquartersLocation.state")?,
        postal_code: required(Some(location.postal_code), "headquartersLocation.postalCode")?,
        country: required(Some(location.country), "headquartersLocation.country")?,
    };

    Ok(NewCompany {
        name,
        industry,
        cnpj,
        headquarters_location,
    })
}

pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The single uniqueness check run before any profile is created: the email
    /// must be unused, and the cpf must not belong to any analyst or customer.
    pub async fn ensure_identity_available(
        &self,
        email: &str,
        cpf: Option<&str>,
    ) -> Result<(), AppError> {
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(AppError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }
        if let Some(cpf) = cpf {
            if self.store.cpf_in_use(cpf).await? {
                return Err(AppError::Conflict(
                    "An analyst or customer with this cpf already exists".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub async fn register(&self, registration: Registration) -> Result<Account, AppError> {
        let Registration {
            email,
            password,
            profile,
        } = registration;

        self.ensure_identity_available(&email, profile.cpf())
            .await?;

        let password_hash = hash_password_blocking(password).await?;
        let account = self
            .store
            .create_account(NewAccount {
                email,
                password_hash,
                profile,
            })
            .await?;

        tracing::info!(
            "Registered {} profile {} for user {}",
            account.profile.kind,
            account.profile.id,
            account.user.id
        );
        Ok(account)
    }

    /// Profile of the caller together with its login identity.
    pub async fn describe(&self, user_id: Uuid) -> Result<AuthorizedUserView, AppError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        let profile = self
            .store
            .find_profile_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?;

        Ok(AuthorizedUserView {
            role: profile.kind,
            profile,
            user: UserSummary {
                id: user.id,
                email: user.email,
            },
        })
    }

    pub async fn create_company(&self, company: NewCompany) -> Result<Company, AppError> {
        let company = self.store.create_company(company).await?;
        tracing::info!("Company {} registered (cnpj {})", company.id, company.cnpj);
        Ok(company)
    }

    pub async fn company(&self, company_id: Uuid) -> Result<Company, AppError> {
        self.store
            .find_company(company_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Company not found".to_string()))
    }

    pub async fn companies(&self, page: Page) -> Result<(Vec<Company>, u64), AppError> {
        self.store.list_companies(page).await
    }
}
