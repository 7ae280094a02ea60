//! Tenant (company) resolution and scoping.
//!
//! A caller names a company by UUID, slug, or legacy numeric id. The
//! candidate is resolved to a canonical [`Tenant`] by a [`TenantDirectory`]
//! implementation, and the resulting [`TenantContext`] is threaded explicitly
//! through every unit of work. Stores call [`TenantContext::guard`] on every
//! record they touch.
//!
//! [`TenantDirectory`]: crate::store::TenantDirectory

use serde::{Deserialize, Serialize};
use tally_shared::types::{CompanyId, Currency};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while resolving or enforcing the tenant scope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantError {
    /// No company matches the candidate identifier.
    #[error("Company not found: {0}")]
    NotFound(String),

    /// The company exists but is deactivated.
    #[error("Company {0} is inactive")]
    Inactive(CompanyId),

    /// A record owned by another company was targeted.
    #[error("{entity} {id} is not owned by the active company")]
    Mismatch {
        /// Entity name (e.g. `invoice`).
        entity: &'static str,
        /// Record identifier.
        id: Uuid,
    },
}

impl TenantError {
    /// Returns the error code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "COMPANY_NOT_FOUND",
            Self::Inactive(_) => "COMPANY_INACTIVE",
            Self::Mismatch { .. } => "TENANT_MISMATCH",
        }
    }
}

/// Maximum slug length accepted by the resolver.
const MAX_SLUG_LEN: usize = 100;

/// A not-yet-resolved company identifier as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantCandidate {
    /// Canonical UUID.
    Id(CompanyId),
    /// Numeric id carried over from the previous system.
    LegacyId(i64),
    /// URL slug.
    Slug(String),
}

impl TenantCandidate {
    /// Classifies a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the string cannot name any company.
    pub fn parse(raw: &str) -> Result<Self, TenantError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TenantError::NotFound("empty company identifier".to_string()));
        }

        if let Ok(uuid) = Uuid::parse_str(raw) {
            return Ok(Self::Id(CompanyId::from_uuid(uuid)));
        }

        if raw.bytes().all(|b| b.is_ascii_digit()) {
            return match raw.parse::<i64>() {
                Ok(id) if id > 0 => Ok(Self::LegacyId(id)),
                _ => Err(TenantError::NotFound(raw.to_string())),
            };
        }

        let is_slug = raw.len() <= MAX_SLUG_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && !raw.starts_with('-')
            && !raw.ends_with('-');
        if is_slug {
            return Ok(Self::Slug(raw.to_string()));
        }

        Err(TenantError::NotFound(raw.to_string()))
    }
}

impl std::fmt::Display for TenantCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::LegacyId(id) => write!(f, "legacy:{id}"),
            Self::Slug(slug) => write!(f, "{slug}"),
        }
    }
}

/// A company as stored in the tenant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Canonical id.
    pub id: CompanyId,
    /// URL slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Functional currency of the company's books.
    pub base_currency: Currency,
    /// Numeric id from the previous system, if any.
    pub legacy_id: Option<i64>,
    /// Whether the company may execute commands.
    pub is_active: bool,
}

/// The active tenant for one unit of work.
///
/// Created once per dispatched command and passed by reference; there is no
/// process-wide "current tenant".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    company_id: CompanyId,
    slug: String,
    base_currency: Currency,
}

impl TenantContext {
    /// Creates a context for an active company.
    #[must_use]
    pub fn new(company_id: CompanyId, slug: impl Into<String>, base_currency: Currency) -> Self {
        Self {
            company_id,
            slug: slug.into(),
            base_currency,
        }
    }

    /// The active company.
    #[must_use]
    pub const fn company_id(&self) -> CompanyId {
        self.company_id
    }

    /// The active company's slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// The currency all amounts in this scope are expressed in.
    #[must_use]
    pub const fn base_currency(&self) -> Currency {
        self.base_currency
    }

    /// Rejects access to a record owned by another company.
    ///
    /// # Errors
    ///
    /// Returns `TenantError::Mismatch` if `owner` is not the active company.
    pub fn guard(&self, entity: &'static str, id: Uuid, owner: CompanyId) -> Result<(), TenantError> {
        if owner == self.company_id {
            Ok(())
        } else {
            Err(TenantError::Mismatch { entity, id })
        }
    }
}

impl TryFrom<Tenant> for TenantContext {
    type Error = TenantError;

    fn try_from(tenant: Tenant) -> Result<Self, Self::Error> {
        if !tenant.is_active {
            return Err(TenantError::Inactive(tenant.id));
        }
        Ok(Self::new(tenant.id, tenant.slug, tenant.base_currency))
    }
}
