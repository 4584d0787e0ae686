//! # basaltpass
//!
//! Service layer of the BasaltPass control plane. Each module owns one
//! bounded area and speaks to storage only through
//! [`basaltpass_core::store::Store`]:
//!
//! - [`identity`]: registration, verification challenges, login, 2FA
//! - [`session`]: interactive sessions, check/end session
//! - [`tenants`]: tenant lifecycle, memberships, ownership transfer
//! - [`clients`]: app and OAuth client registration, secret rotation
//! - [`rbac`]: roles, permissions, bindings, the permission resolver
//! - [`oauth`]: the authorization server (authorize, token, introspect,
//!   revoke, userinfo, discovery)
//!
//! Everything shares one [`context::AppContext`].

pub mod clients;
pub mod context;
pub mod crypto;
pub mod identity;
pub mod oauth;
pub mod rbac;
pub mod session;
pub mod tenants;

pub use context::AppContext;
