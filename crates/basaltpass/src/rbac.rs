// Roles, permissions, and the three-scope resolver.
//
// A role lives at exactly one scope: global (no tenant), tenant, or app.
// Effective permissions for a request are the union of the user's
// unexpired bindings at the global scope, the request's tenant scope,
// and the request's app scope. There are no deny rules and no
// cross-request caching; every check reads the store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::error::{ApiError, ErrorCode, Result};
use basaltpass_core::id::generate_id;
use basaltpass_core::model::{Permission, Role, RoleBinding, RoleScope, TenantRole};
use basaltpass_core::store::StoreError;

use crate::context::AppContext;

// Well-known permission codes used by the service layer itself.
pub mod permission {
    /// Read any tenant's resources regardless of token binding.
    pub const TENANT_READ_ALL: &str = "tenant.read_all";
    pub const TENANT_MANAGE: &str = "tenant.manage";
    pub const APP_MANAGE: &str = "app.manage";
    pub const ROLE_ASSIGN: &str = "role.assign";
    pub const USER_BAN: &str = "user.ban";
}

#[derive(Debug, Clone)]
pub struct CreateRoleInput {
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub code: String,
    pub name: String,
    pub description: String,
}

pub struct RbacService {
    ctx: Arc<AppContext>,
}

impl RbacService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    // ─── Roles ───────────────────────────────────────────────────

    /// Create a role. The code is unique within its scope and immutable.
    /// App-scoped roles must name an app belonging to the given tenant.
    pub async fn create_role(&self, actor_id: &str, input: CreateRoleInput) -> Result<Role> {
        let code = input.code.trim().to_string();
        if code.is_empty() {
            return Err(
                ApiError::with_message(ErrorCode::InvalidRequest, "role code is required").into(),
            );
        }
        if input.app_id.is_some() && input.tenant_id.is_none() {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "app-scoped roles require a tenant",
            )
            .into());
        }
        if let Some(app_id) = &input.app_id {
            let app = self
                .ctx
                .store
                .get_app(app_id)
                .await?
                .ok_or_else(|| ApiError::new(ErrorCode::AppNotFound))?;
            if Some(&app.tenant_id) != input.tenant_id.as_ref() {
                return Err(ApiError::new(ErrorCode::TenantMismatch).into());
            }
        }
        if self
            .ctx
            .store
            .get_role_by_code(input.tenant_id.as_deref(), input.app_id.as_deref(), &code)
            .await?
            .is_some()
        {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "role code already exists at this scope",
            )
            .into());
        }

        let role = self
            .ctx
            .store
            .create_role(Role {
                id: generate_id(),
                tenant_id: input.tenant_id,
                app_id: input.app_id,
                code,
                name: input.name,
                description: input.description,
                is_system: false,
                created_at: Utc::now(),
            })
            .await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::ROLE_CREATED)
                    .actor(actor_id)
                    .subject(&role.id),
            )
            .await;
        Ok(role)
    }

    /// Rename a role. System roles and codes are immutable.
    pub async fn update_role(&self, id: &str, name: String, description: String) -> Result<Role> {
        let mut role = self.get_role(id).await?;
        if role.is_system {
            return Err(ApiError::new(ErrorCode::SystemRoleImmutable).into());
        }
        role.name = name;
        role.description = description;
        Ok(self.ctx.store.update_role(role).await?)
    }

    /// Delete a role that is neither system nor bound to any user.
    pub async fn delete_role(&self, actor_id: &str, id: &str) -> Result<()> {
        let role = self.get_role(id).await?;
        if role.is_system {
            return Err(ApiError::new(ErrorCode::SystemRoleImmutable).into());
        }
        if self.ctx.store.count_bindings_for_role(id).await? > 0 {
            return Err(ApiError::new(ErrorCode::RoleInUse).into());
        }
        self.ctx.store.delete_role(id).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::ROLE_DELETED)
                    .actor(actor_id)
                    .subject(id),
            )
            .await;
        Ok(())
    }

    pub async fn get_role(&self, id: &str) -> Result<Role> {
        self.ctx
            .store
            .get_role(id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::RoleNotFound).into())
    }

    pub async fn list_roles(
        &self,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
    ) -> Result<Vec<Role>> {
        Ok(self.ctx.store.list_roles(tenant_id, app_id).await?)
    }

    // ─── Permissions ─────────────────────────────────────────────

    pub async fn create_permission(
        &self,
        tenant_id: Option<String>,
        app_id: Option<String>,
        code: String,
        category: String,
    ) -> Result<Permission> {
        if self
            .ctx
            .store
            .get_permission_by_code(tenant_id.as_deref(), app_id.as_deref(), &code)
            .await?
            .is_some()
        {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "permission code already exists at this scope",
            )
            .into());
        }
        Ok(self
            .ctx
            .store
            .create_permission(Permission {
                id: generate_id(),
                tenant_id,
                app_id,
                code,
                category,
            })
            .await?)
    }

    /// Attach a permission to a role. Both must live at the same scope.
    pub async fn attach_permission(&self, role_id: &str, permission_id: &str) -> Result<()> {
        let role = self.get_role(role_id).await?;
        let permissions = self
            .ctx
            .store
            .list_permissions(role.tenant_id.as_deref(), role.app_id.as_deref())
            .await?;
        if !permissions.iter().any(|p| p.id == permission_id) {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "permission is not defined at the role's scope",
            )
            .into());
        }
        self.ctx.store.attach_permission(role_id, permission_id).await?;
        Ok(())
    }

    pub async fn detach_permission(&self, role_id: &str, permission_id: &str) -> Result<()> {
        Ok(self
            .ctx
            .store
            .detach_permission(role_id, permission_id)
            .await?)
    }

    // ─── Bindings ────────────────────────────────────────────────

    /// Binding changes require `role.assign` at the role's scope; a
    /// global grant covers everything through the resolver. Tenant
    /// owners and admins cover roles scoped inside their tenant.
    async fn require_binding_authority(&self, actor_id: &str, role: &Role) -> Result<()> {
        if self
            .has_permission(
                actor_id,
                role.tenant_id.as_deref(),
                role.app_id.as_deref(),
                permission::ROLE_ASSIGN,
            )
            .await?
        {
            return Ok(());
        }
        if let Some(tenant_id) = &role.tenant_id {
            if let Some(membership) = self.ctx.store.get_membership(actor_id, tenant_id).await? {
                if matches!(membership.role, TenantRole::Owner | TenantRole::Admin) {
                    return Ok(());
                }
            }
        }
        Err(ApiError::new(ErrorCode::PermissionDenied).into())
    }

    /// Bind a role to a user, optionally until `expires_at`. Duplicate
    /// bindings collapse into one.
    pub async fn assign_role(
        &self,
        actor_id: &str,
        user_id: &str,
        role_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleBinding> {
        let role = self.get_role(role_id).await?;
        self.require_binding_authority(actor_id, &role).await?;
        self.ctx
            .store
            .get_user(user_id)
            .await?
            .filter(|u| !u.deleted)
            .ok_or_else(|| ApiError::new(ErrorCode::UserNotFound))?;

        let binding = match self
            .ctx
            .store
            .create_binding(RoleBinding {
                id: generate_id(),
                user_id: user_id.to_string(),
                role_id: role_id.to_string(),
                expires_at,
                created_at: Utc::now(),
            })
            .await
        {
            Ok(b) => b,
            Err(StoreError::Conflict(_)) => self
                .ctx
                .store
                .list_bindings_for_user(user_id)
                .await?
                .into_iter()
                .find(|b| b.role_id == role_id)
                .ok_or_else(|| ApiError::new(ErrorCode::InvariantViolation))?,
            Err(e) => return Err(e.into()),
        };
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::ROLE_ASSIGNED)
                    .actor(actor_id)
                    .subject(user_id)
                    .detail(role_id),
            )
            .await;
        Ok(binding)
    }

    pub async fn unassign_role(&self, actor_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        let role = self.get_role(role_id).await?;
        self.require_binding_authority(actor_id, &role).await?;
        self.ctx.store.delete_binding(user_id, role_id).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::ROLE_UNASSIGNED)
                    .actor(actor_id)
                    .subject(user_id)
                    .detail(role_id),
            )
            .await;
        Ok(())
    }

    // ─── Resolver ────────────────────────────────────────────────

    /// Union of permission codes the user holds for a request at the
    /// given tenant/app. Expired bindings are skipped; bindings at other
    /// tenants or apps do not contribute.
    pub async fn effective_permissions(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
    ) -> Result<HashSet<String>> {
        let now = Utc::now();
        let mut out = HashSet::new();
        for binding in self.ctx.store.list_bindings_for_user(user_id).await? {
            if binding.is_expired(now) {
                continue;
            }
            let Some(role) = self.ctx.store.get_role(&binding.role_id).await? else {
                continue;
            };
            let in_scope = match role.scope() {
                RoleScope::Global => true,
                RoleScope::Tenant(t) => tenant_id == Some(t.as_str()),
                RoleScope::App(t, a) => {
                    tenant_id == Some(t.as_str()) && app_id == Some(a.as_str())
                }
            };
            if !in_scope {
                continue;
            }
            for permission in self.ctx.store.list_role_permissions(&role.id).await? {
                out.insert(permission.code);
            }
        }
        Ok(out)
    }

    pub async fn has_permission(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        code: &str,
    ) -> Result<bool> {
        Ok(self
            .effective_permissions(user_id, tenant_id, app_id)
            .await?
            .contains(code))
    }

    /// Fail with `PERMISSION_DENIED` unless the user holds `code` at the
    /// given scope.
    pub async fn require_permission(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        app_id: Option<&str>,
        code: &str,
    ) -> Result<()> {
        if self.has_permission(user_id, tenant_id, app_id, code).await? {
            Ok(())
        } else {
            Err(ApiError::new(ErrorCode::PermissionDenied).into())
        }
    }
}
