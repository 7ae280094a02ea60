//! Company directory and membership lookups.

use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tally_core::authz::Role;
use tally_core::store::StoreError;
use tally_core::tenant::{Tenant, TenantCandidate, TenantError};
use tally_shared::types::{CompanyId, UserId};

use super::{currency, db_error, decode};
use crate::entities::{companies, company_users};

/// Company repository over the connection pool.
///
/// `companies` carries no row-level security, so resolution works before a
/// tenant context exists.
#[derive(Debug, Clone)]
pub struct CompanyRepository {
    db: DatabaseConnection,
}

impl CompanyRepository {
    /// Creates a new company repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Resolves a UUID, legacy id or slug to a company.
    pub async fn resolve(&self, candidate: &TenantCandidate) -> Result<Tenant, StoreError> {
        let query = companies::Entity::find();
        let query = match candidate {
            TenantCandidate::Id(id) => query.filter(companies::Column::Id.eq(id.into_inner())),
            TenantCandidate::LegacyId(legacy) => query.filter(companies::Column::LegacyId.eq(*legacy)),
            TenantCandidate::Slug(slug) => query.filter(companies::Column::Slug.eq(slug.as_str())),
        };

        let row = query
            .one(&self.db)
            .await
            .map_err(|e| db_error("company", e))?
            .ok_or_else(|| TenantError::NotFound(candidate.to_string()))?;

        Ok(Tenant {
            id: CompanyId::from_uuid(row.id),
            slug: row.slug,
            name: row.name,
            base_currency: currency(&row.base_currency)?,
            legacy_id: row.legacy_id,
            is_active: row.is_active,
        })
    }

    /// Looks up a user's role in the company bound to `conn`.
    pub async fn member_role<C: ConnectionTrait>(
        conn: &C,
        company_id: CompanyId,
        user_id: UserId,
    ) -> Result<Option<Role>, StoreError> {
        let row = company_users::Entity::find_by_id((company_id.into_inner(), user_id.into_inner()))
            .one(conn)
            .await
            .map_err(|e| db_error("company_user", e))?;

        row.map(|member| decode(&member.role)).transpose()
    }
}
