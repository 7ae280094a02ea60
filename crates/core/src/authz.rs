//! Role-based authorization.
//!
//! The dispatcher looks up the actor's role in the active company once and
//! asks [`authorize`] for a decision. No handler performs ambient lookups.

use serde::{Deserialize, Serialize};
use tally_shared::types::UserId;

use crate::tenant::TenantContext;

/// Membership role of a user in a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control.
    Owner,
    /// Administrative control.
    Admin,
    /// Bookkeeping.
    Accountant,
    /// Approves workflow items only.
    Approver,
    /// Read-only.
    Viewer,
    /// Submits documents.
    Submitter,
}

impl Role {
    /// Returns the storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Accountant => "accountant",
            Self::Approver => "approver",
            Self::Viewer => "viewer",
            Self::Submitter => "submitter",
        }
    }

    /// Returns true if the role grants `capability`.
    #[must_use]
    pub const fn grants(self, capability: Capability) -> bool {
        match self {
            Self::Owner | Self::Admin | Self::Accountant => true,
            Self::Submitter => matches!(
                capability,
                Capability::ManageInvoices | Capability::ManagePayments
            ),
            Self::Approver | Self::Viewer => false,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "accountant" => Ok(Self::Accountant),
            "approver" => Ok(Self::Approver),
            "viewer" => Ok(Self::Viewer),
            "submitter" => Ok(Self::Submitter),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// What a command needs to be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create invoices.
    ManageInvoices,
    /// Record payments.
    ManagePayments,
    /// Allocate payments to invoices.
    AllocatePayments,
    /// Reverse allocations and payments.
    ReverseTransactions,
    /// Post manual journal entries.
    PostJournal,
    /// Void journal entries.
    VoidJournal,
}

impl Capability {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ManageInvoices => "manage_invoices",
            Self::ManagePayments => "manage_payments",
            Self::AllocatePayments => "allocate_payments",
            Self::ReverseTransactions => "reverse_transactions",
            Self::PostJournal => "post_journal",
            Self::VoidJournal => "void_journal",
        }
    }
}

/// The principal issuing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Actor {
    /// User ID.
    pub id: UserId,
}

impl Actor {
    /// Creates an actor.
    #[must_use]
    pub const fn new(id: UserId) -> Self {
        Self { id }
    }
}

/// Authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed.
    Allow,
    /// Refuse with a caller-facing reason.
    Deny(String),
}

impl Decision {
    /// Returns true for `Allow`.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether `actor`, holding `role` in `tenant`, may use `capability`.
///
/// `role` is `None` when the actor is not a member of the company.
#[must_use]
pub fn authorize(actor: &Actor, tenant: &TenantContext, role: Option<Role>, capability: Capability) -> Decision {
    match role {
        None => Decision::Deny(format!(
            "User {} is not a member of company {}",
            actor.id,
            tenant.slug()
        )),
        Some(role) if role.grants(capability) => Decision::Allow,
        Some(role) => Decision::Deny(format!(
            "Role '{}' does not grant '{}'",
            role.as_str(),
            capability.as_str()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tally_shared::types::{CompanyId, Currency};

    fn tenant() -> TenantContext {
        TenantContext::new(CompanyId::new(), "acme", Currency::Usd)
    }

    #[rstest]
    #[case(Role::Owner, Capability::VoidJournal, true)]
    #[case(Role::Admin, Capability::ReverseTransactions, true)]
    #[case(Role::Accountant, Capability::PostJournal, true)]
    #[case(Role::Submitter, Capability::ManageInvoices, true)]
    #[case(Role::Submitter, Capability::ManagePayments, true)]
    #[case(Role::Submitter, Capability::AllocatePayments, false)]
    #[case(Role::Approver, Capability::ManageInvoices, false)]
    #[case(Role::Viewer, Capability::ManageInvoices, false)]
    fn test_role_grants(#[case] role: Role, #[case] capability: Capability, #[case] allowed: bool) {
        let actor = Actor::new(UserId::new());
        assert_eq!(authorize(&actor, &tenant(), Some(role), capability).is_allowed(), allowed);
    }

    #[test]
    fn test_non_member_is_denied() {
        let actor = Actor::new(UserId::new());
        let decision = authorize(&actor, &tenant(), None, Capability::ManageInvoices);
        assert!(matches!(decision, Decision::Deny(reason) if reason.contains("not a member")));
    }

    #[test]
    fn test_role_names_roundtrip() {
        for role in [
            Role::Owner,
            Role::Admin,
            Role::Accountant,
            Role::Approver,
            Role::Viewer,
            Role::Submitter,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }
}
