// Registration and first-party login.
//
// Registration is two-phase: a signup is staged with a hashed password
// and a verification challenge per contact channel, and the user row is
// only created once a challenge is passed. Login mints an interactive
// session; OAuth tokens are minted elsewhere.

use std::sync::Arc;

use chrono::{Duration, Utc};

use basaltpass_core::audit::{action, AuditRecord};
use basaltpass_core::error::{ApiError, ErrorCode, Result};
use basaltpass_core::id::generate_id;
use basaltpass_core::model::{
    ChallengeChannel, ExternalIdentity, PendingSignup, Session, User, VerificationChallenge,
};
use basaltpass_core::store::StoreError;

use crate::context::AppContext;
use crate::crypto::{password, random, secret};

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub tenant_id: Option<String>,
}

/// An already-verified assertion from an upstream identity provider.
/// The provider has done its own ceremony; only the (provider, subject)
/// pair and the attested contact reach this service.
#[derive(Debug, Clone)]
pub struct ExternalAssertion {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub identifier: String,
    pub password: String,
    pub totp_code: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct IdentityService {
    ctx: Arc<AppContext>,
}

impl IdentityService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Stage a signup and send a verification code to each supplied
    /// channel. Returns the signup id the client confirms against.
    pub async fn register(&self, input: RegisterInput) -> Result<String> {
        let email = input
            .email
            .as_deref()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty());
        let phone = input
            .phone
            .as_deref()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if email.is_none() && phone.is_none() {
            return Err(ApiError::with_message(
                ErrorCode::InvalidRequest,
                "email or phone is required",
            )
            .into());
        }
        self.check_password_policy(&input.password)?;

        if let Some(email) = &email {
            if self.ctx.store.get_user_by_email(email).await?.is_some() {
                return Err(ApiError::new(ErrorCode::UserAlreadyExists).into());
            }
        }
        if let Some(phone) = &phone {
            if self.ctx.store.get_user_by_phone(phone).await?.is_some() {
                return Err(ApiError::new(ErrorCode::UserAlreadyExists).into());
            }
        }

        let signup = PendingSignup {
            id: generate_id(),
            email: email.clone(),
            phone: phone.clone(),
            password_hash: password::hash_password(&input.password)?,
            tenant_id: input.tenant_id,
            created_at: Utc::now(),
        };
        let signup = self.ctx.store.create_pending_signup(signup).await?;

        if email.is_some() {
            self.issue_challenge(&signup, ChallengeChannel::Email).await?;
        }
        if phone.is_some() {
            self.issue_challenge(&signup, ChallengeChannel::Phone).await?;
        }
        Ok(signup.id)
    }

    /// Re-send a verification code, respecting the per-challenge backoff
    /// (base interval doubled per send, capped).
    pub async fn resend_code(&self, signup_id: &str, channel: ChallengeChannel) -> Result<()> {
        let signup = self
            .ctx
            .store
            .get_pending_signup(signup_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        let now = Utc::now();
        let existing = self
            .ctx
            .store
            .get_challenge_for_signup(signup_id, channel)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        if existing.is_locked(now) {
            return Err(ApiError::new(ErrorCode::ChallengeLocked).into());
        }
        if existing.next_send_at > now {
            return Err(ApiError::new(ErrorCode::ResendTooSoon).into());
        }

        let opts = &self.ctx.options.challenge;
        let code = random::verification_code();
        let backoff = (opts.resend_base_secs << existing.sends.min(16)).min(opts.resend_cap_secs);
        let updated = VerificationChallenge {
            code_hash: secret::hash_secret(&code),
            attempts: 0,
            sends: existing.sends + 1,
            next_send_at: now + Duration::seconds(backoff),
            expires_at: now + Duration::seconds(opts.ttl_secs),
            ..existing
        };
        self.ctx.store.update_challenge(updated).await?;
        self.deliver_code(&signup, channel, &code).await
    }

    /// Confirm a challenge code and create the user. The signup and its
    /// challenges are consumed on success.
    pub async fn confirm(
        &self,
        signup_id: &str,
        channel: ChallengeChannel,
        code: &str,
    ) -> Result<User> {
        let signup = self
            .ctx
            .store
            .get_pending_signup(signup_id)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        let now = Utc::now();
        let challenge = self
            .ctx
            .store
            .get_challenge_for_signup(signup_id, channel)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;

        if challenge.is_locked(now) {
            return Err(ApiError::new(ErrorCode::ChallengeLocked).into());
        }
        if challenge.is_expired(now) {
            return Err(ApiError::new(ErrorCode::ChallengeExpired).into());
        }
        if !secret::verify_secret(code, &challenge.code_hash) {
            let opts = &self.ctx.options.challenge;
            let attempts = challenge.attempts + 1;
            let locked_until = (attempts >= opts.max_attempts)
                .then(|| now + Duration::seconds(opts.lock_secs));
            self.ctx
                .store
                .update_challenge(VerificationChallenge {
                    attempts,
                    locked_until,
                    ..challenge
                })
                .await?;
            if locked_until.is_some() {
                return Err(ApiError::new(ErrorCode::TooManyAttempts).into());
            }
            return Err(ApiError::new(ErrorCode::CodeIncorrect).into());
        }

        let user = User {
            id: generate_id(),
            email: signup.email.clone().unwrap_or_default(),
            phone: signup.phone.clone(),
            password_hash: Some(signup.password_hash.clone()),
            totp_secret: None,
            two_factor_enabled: false,
            email_verified: channel == ChallengeChannel::Email,
            phone_verified: channel == ChallengeChannel::Phone,
            banned: false,
            nickname: signup
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .unwrap_or("user")
                .to_string(),
            avatar_url: None,
            primary_tenant_id: signup.tenant_id.clone(),
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        let user = match self.ctx.store.create_user(user).await {
            Ok(user) => user,
            Err(StoreError::Conflict(_)) => {
                return Err(ApiError::new(ErrorCode::UserAlreadyExists).into())
            }
            Err(e) => return Err(e.into()),
        };
        self.ctx.store.delete_challenges_for_signup(signup_id).await?;
        self.ctx.store.delete_pending_signup(signup_id).await?;

        self.ctx
            .audit
            .record(AuditRecord::new(action::USER_REGISTERED).subject(&user.id))
            .await;
        Ok(user)
    }

    /// Password login with optional TOTP. Bad identifier and bad password
    /// fail identically.
    pub async fn login(&self, input: LoginInput) -> Result<Session> {
        let user = self.find_by_identifier(&input.identifier).await?;
        let Some(user) = user.filter(|u| !u.deleted) else {
            self.audit_login_failed(&input.identifier).await;
            return Err(ApiError::new(ErrorCode::AuthFailed).into());
        };
        let Some(hash) = &user.password_hash else {
            self.audit_login_failed(&input.identifier).await;
            return Err(ApiError::new(ErrorCode::AuthFailed).into());
        };
        if !password::verify_password(&input.password, hash)? {
            self.audit_login_failed(&input.identifier).await;
            return Err(ApiError::new(ErrorCode::AuthFailed).into());
        }
        if user.banned {
            return Err(ApiError::new(ErrorCode::UserBanned).into());
        }
        if user.two_factor_enabled {
            let secret = user
                .totp_secret
                .as_deref()
                .ok_or_else(|| ApiError::new(ErrorCode::InvariantViolation))?;
            match input.totp_code.as_deref() {
                None => return Err(ApiError::new(ErrorCode::TwoFactorRequired).into()),
                Some(code) if !self.ctx.totp.verify(secret, code) => {
                    self.audit_login_failed(&input.identifier).await;
                    return Err(ApiError::new(ErrorCode::AuthFailed).into());
                }
                Some(_) => {}
            }
        }

        let now = Utc::now();
        let session = Session {
            id: generate_id(),
            token: random::session_token(),
            user_id: user.id.clone(),
            ip: input.ip,
            user_agent: input.user_agent,
            expires_at: now + Duration::seconds(self.ctx.options.session_ttl_secs),
            created_at: now,
        };
        let session = self.ctx.store.create_session(session).await?;
        self.ctx
            .audit
            .record(AuditRecord::new(action::USER_LOGIN).actor(&user.id))
            .await;
        Ok(session)
    }

    /// Consume an external provider assertion, linking it to a user on
    /// first use. Links by verified email when the address is already
    /// registered, otherwise creates a fresh user without a password.
    pub async fn login_external(&self, assertion: ExternalAssertion) -> Result<Session> {
        let now = Utc::now();
        let user = match self
            .ctx
            .store
            .get_external_identity(&assertion.provider, &assertion.subject)
            .await?
        {
            Some(link) => self
                .ctx
                .store
                .get_user(&link.user_id)
                .await?
                .filter(|u| !u.deleted)
                .ok_or_else(|| ApiError::new(ErrorCode::AuthFailed))?,
            None => {
                let user = self.user_for_assertion(&assertion, now).await?;
                self.ctx
                    .store
                    .create_external_identity(ExternalIdentity {
                        id: generate_id(),
                        provider: assertion.provider.clone(),
                        subject: assertion.subject.clone(),
                        user_id: user.id.clone(),
                        created_at: now,
                    })
                    .await?;
                user
            }
        };
        if user.banned {
            return Err(ApiError::new(ErrorCode::UserBanned).into());
        }

        let session = Session {
            id: generate_id(),
            token: random::session_token(),
            user_id: user.id.clone(),
            ip: None,
            user_agent: None,
            expires_at: now + Duration::seconds(self.ctx.options.session_ttl_secs),
            created_at: now,
        };
        let session = self.ctx.store.create_session(session).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::USER_LOGIN)
                    .actor(&user.id)
                    .detail(&assertion.provider),
            )
            .await;
        Ok(session)
    }

    async fn user_for_assertion(
        &self,
        assertion: &ExternalAssertion,
        now: chrono::DateTime<Utc>,
    ) -> Result<User> {
        let email = assertion
            .email
            .as_deref()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty());
        if let Some(email) = &email {
            if let Some(existing) = self
                .ctx
                .store
                .get_user_by_email(email)
                .await?
                .filter(|u| !u.deleted)
            {
                return Ok(existing);
            }
        }
        let nickname = assertion
            .name
            .clone()
            .or_else(|| {
                email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(String::from)
            })
            .unwrap_or_else(|| "user".to_string());
        let email_verified = email.is_some();
        let user = User {
            id: generate_id(),
            email: email.unwrap_or_default(),
            phone: None,
            password_hash: None,
            totp_secret: None,
            two_factor_enabled: false,
            email_verified,
            phone_verified: false,
            banned: false,
            nickname,
            avatar_url: None,
            primary_tenant_id: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        Ok(self.ctx.store.create_user(user).await?)
    }

    /// Ban a user and revoke all their sessions and tokens.
    pub async fn ban_user(&self, actor_id: &str, user_id: &str) -> Result<User> {
        let mut user = self
            .ctx
            .store
            .get_user(user_id)
            .await?
            .filter(|u| !u.deleted)
            .ok_or_else(|| ApiError::new(ErrorCode::UserNotFound))?;
        user.banned = true;
        user.updated_at = Utc::now();
        let user = self.ctx.store.update_user(user).await?;
        self.ctx.store.delete_sessions_for_user(user_id).await?;
        self.ctx.store.delete_tokens_for_user(user_id).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::new(action::USER_BANNED)
                    .actor(actor_id)
                    .subject(user_id),
            )
            .await;
        Ok(user)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>> {
        let identifier = identifier.trim();
        if identifier.contains('@') {
            Ok(self
                .ctx
                .store
                .get_user_by_email(&identifier.to_ascii_lowercase())
                .await?)
        } else {
            Ok(self.ctx.store.get_user_by_phone(identifier).await?)
        }
    }

    fn check_password_policy(&self, pw: &str) -> Result<()> {
        let policy = &self.ctx.options.password;
        if pw.len() < policy.min_length {
            return Err(ApiError::new(ErrorCode::PasswordTooShort).into());
        }
        if pw.len() > policy.max_length {
            return Err(ApiError::new(ErrorCode::PasswordTooLong).into());
        }
        Ok(())
    }

    async fn issue_challenge(
        &self,
        signup: &PendingSignup,
        channel: ChallengeChannel,
    ) -> Result<()> {
        let opts = &self.ctx.options.challenge;
        let now = Utc::now();
        let code = random::verification_code();
        let challenge = VerificationChallenge {
            id: generate_id(),
            signup_id: signup.id.clone(),
            channel,
            code_hash: secret::hash_secret(&code),
            attempts: 0,
            sends: 1,
            next_send_at: now + Duration::seconds(opts.resend_base_secs),
            locked_until: None,
            expires_at: now + Duration::seconds(opts.ttl_secs),
            created_at: now,
        };
        self.ctx.store.create_challenge(challenge).await?;
        self.deliver_code(signup, channel, &code).await
    }

    async fn deliver_code(
        &self,
        signup: &PendingSignup,
        channel: ChallengeChannel,
        code: &str,
    ) -> Result<()> {
        let body = format!("Your BasaltPass verification code is {code}");
        match channel {
            ChallengeChannel::Email => {
                let to = signup.email.as_deref().unwrap_or_default();
                self.ctx.sender.send_email(to, "Verify your account", &body).await
            }
            ChallengeChannel::Phone => {
                let to = signup.phone.as_deref().unwrap_or_default();
                self.ctx.sender.send_sms(to, &body).await
            }
        }
    }

    async fn audit_login_failed(&self, identifier: &str) {
        self.ctx
            .audit
            .record(AuditRecord::new(action::USER_LOGIN_FAILED).detail(identifier))
            .await;
    }
}
