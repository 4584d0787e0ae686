// Tenant lifecycle and memberships.
//
// Tenants are soft-deleted; a deleted or suspended tenant keeps its rows
// but the OAuth layer refuses to issue tokens for it. Every active tenant
// has exactly one owner, changed only through `transfer_ownership`.

use std::sync::Arc;

use chrono::Utc;

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::error::{ApiError, ErrorCode, Result};
use basaltpass_core::id::generate_id;
use basaltpass_core::model::{
    Role, Tenant, TenantMembership, TenantPlan, TenantQuota, TenantRole, TenantStatus,
};
use basaltpass_core::store::StoreError;

use crate::context::AppContext;

/// Roles seeded into every new tenant. `(code, name, description)`.
const DEFAULT_TENANT_ROLES: &[(&str, &str, &str)] = &[
    (
        "tenant_admin",
        "Tenant Admin",
        "Full control over tenant settings, apps, and members",
    ),
    (
        "app_developer",
        "App Developer",
        "Create and manage apps and OAuth clients",
    ),
    ("viewer", "Viewer", "Read-only access to tenant resources"),
];

#[derive(Debug, Clone)]
pub struct CreateTenantInput {
    pub name: String,
    pub code: String,
    pub description: String,
    pub plan: TenantPlan,
}

pub struct TenantService {
    ctx: Arc<AppContext>,
}

impl TenantService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Create a tenant. The creator becomes the owner and the default
    /// role set is seeded.
    pub async fn create(&self, creator_id: &str, input: CreateTenantInput) -> Result<Tenant> {
        let code = input.code.trim().to_ascii_lowercase();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "tenant code must be lowercase alphanumeric with dashes",
            )
            .into());
        }
        if self.ctx.store.get_tenant_by_code(&code).await?.is_some() {
            return Err(ApiError::new(ErrorCode::TenantCodeTaken).into());
        }

        let now = Utc::now();
        let tenant = Tenant {
            id: generate_id(),
            name: input.name,
            code,
            description: input.description,
            status: TenantStatus::Active,
            plan: input.plan,
            metadata: serde_json::Map::new(),
            quota: TenantQuota::for_plan(input.plan),
            created_at: now,
            updated_at: now,
        };
        let tenant = match self.ctx.store.create_tenant(tenant).await {
            Ok(t) => t,
            Err(StoreError::Conflict(_)) => {
                return Err(ApiError::new(ErrorCode::TenantCodeTaken).into())
            }
            Err(e) => return Err(e.into()),
        };

        self.ctx
            .store
            .create_membership(TenantMembership {
                id: generate_id(),
                user_id: creator_id.to_string(),
                tenant_id: tenant.id.clone(),
                role: TenantRole::Owner,
                created_at: now,
                updated_at: now,
            })
            .await?;

        for (code, name, description) in DEFAULT_TENANT_ROLES {
            self.ctx
                .store
                .create_role(Role {
                    id: generate_id(),
                    tenant_id: Some(tenant.id.clone()),
                    app_id: None,
                    code: (*code).to_string(),
                    name: (*name).to_string(),
                    description: (*description).to_string(),
                    is_system: true,
                    created_at: now,
                })
                .await?;
        }

        self.ctx
            .audit
            .record(
                AuditRecord::new(action::TENANT_CREATED)
                    .actor(creator_id)
                    .tenant(&tenant.id),
            )
            .await;
        Ok(tenant)
    }

    pub async fn get(&self, id: &str) -> Result<Tenant> {
        self.ctx
            .store
            .get_tenant(id)
            .await?
            .filter(|t| t.status != TenantStatus::Deleted)
            .ok_or_else(|| ApiError::new(ErrorCode::TenantNotFound).into())
    }

    /// Update mutable fields. `code` is immutable; a plan change
    /// reallocates the quota.
    pub async fn update(
        &self,
        actor_id: &str,
        id: &str,
        name: Option<String>,
        description: Option<String>,
        plan: Option<TenantPlan>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Tenant> {
        let mut tenant = self.get(id).await?;
        if let Some(name) = name {
            tenant.name = name;
        }
        if let Some(description) = description {
            tenant.description = description;
        }
        if let Some(plan) = plan {
            tenant.plan = plan;
            tenant.quota = TenantQuota::for_plan(plan);
        }
        if let Some(metadata) = metadata {
            tenant.metadata = metadata;
        }
        tenant.updated_at = Utc::now();
        let tenant = self.ctx.store.update_tenant(tenant).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::TENANT_UPDATED)
                    .actor(actor_id)
                    .tenant(id),
            )
            .await;
        Ok(tenant)
    }

    pub async fn suspend(&self, actor_id: &str, id: &str) -> Result<Tenant> {
        self.set_status(actor_id, id, TenantStatus::Suspended, action::TENANT_UPDATED)
            .await
    }

    pub async fn reactivate(&self, actor_id: &str, id: &str) -> Result<Tenant> {
        self.set_status(actor_id, id, TenantStatus::Active, action::TENANT_UPDATED)
            .await
    }

    /// Soft-delete. Apps and tokens stay in place; token issuance and
    /// validation refuse non-active tenants.
    pub async fn delete(&self, actor_id: &str, id: &str) -> Result<Tenant> {
        self.set_status(actor_id, id, TenantStatus::Deleted, action::TENANT_DELETED)
            .await
    }

    async fn set_status(
        &self,
        actor_id: &str,
        id: &str,
        status: TenantStatus,
        audit_action: &str,
    ) -> Result<Tenant> {
        let mut tenant = self.get(id).await?;
        tenant.status = status;
        tenant.updated_at = Utc::now();
        let tenant = self.ctx.store.update_tenant(tenant).await?;
        self.ctx
            .audit
            .record(AuditRecord::new(audit_action).actor(actor_id).tenant(id))
            .await;
        Ok(tenant)
    }

    // ─── Memberships ─────────────────────────────────────────────

    /// Add a member as admin or member. Owners are created only at
    /// tenant creation or by transfer.
    pub async fn add_member(
        &self,
        actor_id: &str,
        tenant_id: &str,
        user_id: &str,
        role: TenantRole,
    ) -> Result<TenantMembership> {
        if role == TenantRole::Owner {
            return Err(ApiError::new(ErrorCode::OwnerImmutable).into());
        }
        let tenant = self.get(tenant_id).await?;
        if !tenant.is_active() {
            return Err(ApiError::new(ErrorCode::TenantNotActive).into());
        }
        self.ctx
            .store
            .get_user(user_id)
            .await?
            .filter(|u| !u.deleted)
            .ok_or_else(|| ApiError::new(ErrorCode::UserNotFound))?;
        if self
            .ctx
            .store
            .get_membership(user_id, tenant_id)
            .await?
            .is_some()
        {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "user is already a member",
            )
            .into());
        }

        let members = self
            .ctx
            .store
            .list_memberships_for_tenant(tenant_id)
            .await?;
        if members.len() as u32 >= tenant.quota.max_users {
            return Err(ApiError::with_message(
                ErrorCode::AppQuotaExceeded,
                "member quota exceeded for this plan",
            )
            .into());
        }

        let now = Utc::now();
        let membership = self
            .ctx
            .store
            .create_membership(TenantMembership {
                id: generate_id(),
                user_id: user_id.to_string(),
                tenant_id: tenant_id.to_string(),
                role,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::MEMBER_ADDED)
                    .actor(actor_id)
                    .tenant(tenant_id)
                    .subject(user_id),
            )
            .await;
        Ok(membership)
    }

    /// Remove a member. The owner cannot be removed.
    pub async fn remove_member(
        &self,
        actor_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let membership = self
            .ctx
            .store
            .get_membership(user_id, tenant_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        if membership.role == TenantRole::Owner {
            return Err(ApiError::new(ErrorCode::OwnerImmutable).into());
        }
        self.ctx.store.delete_membership(&membership.id).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::MEMBER_REMOVED)
                    .actor(actor_id)
                    .tenant(tenant_id)
                    .subject(user_id),
            )
            .await;
        Ok(())
    }

    /// Change a member between admin and member. Owner transitions go
    /// through `transfer_ownership`.
    pub async fn change_member_role(
        &self,
        tenant_id: &str,
        user_id: &str,
        role: TenantRole,
    ) -> Result<TenantMembership> {
        if role == TenantRole::Owner {
            return Err(ApiError::new(ErrorCode::OwnerImmutable).into());
        }
        let mut membership = self
            .ctx
            .store
            .get_membership(user_id, tenant_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        if membership.role == TenantRole::Owner {
            return Err(ApiError::new(ErrorCode::OwnerImmutable).into());
        }
        membership.role = role;
        membership.updated_at = Utc::now();
        Ok(self.ctx.store.update_membership(membership).await?)
    }

    /// Move ownership to an existing member; the previous owner becomes
    /// an admin so the tenant keeps exactly one owner throughout.
    pub async fn transfer_ownership(
        &self,
        tenant_id: &str,
        from_user: &str,
        to_user: &str,
    ) -> Result<()> {
        let mut current = self
            .ctx
            .store
            .get_membership(from_user, tenant_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        if current.role != TenantRole::Owner {
            return Err(ApiError::new(ErrorCode::PermissionDenied).into());
        }
        let mut next = self
            .ctx
            .store
            .get_membership(to_user, tenant_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;

        let now = Utc::now();
        next.role = TenantRole::Owner;
        next.updated_at = now;
        self.ctx.store.update_membership(next).await?;
        current.role = TenantRole::Admin;
        current.updated_at = now;
        self.ctx.store.update_membership(current).await?;

        self.ctx
            .audit
            .record(
                AuditRecord::new(action::OWNERSHIP_TRANSFERRED)
                    .actor(from_user)
                    .tenant(tenant_id)
                    .subject(to_user),
            )
            .await;
        Ok(())
    }

    pub async fn list_members(&self, tenant_id: &str) -> Result<Vec<TenantMembership>> {
        Ok(self
            .ctx
            .store
            .list_memberships_for_tenant(tenant_id)
            .await?)
    }
}
