//! Contract method implementations.

use chrono::Utc;
use simplebank_core::messages::{
    CreateAccountRequest, CreateAccountResponse, CreateUserRequest, CreateUserResponse,
    GetAccountRequest, GetAccountResponse, ListAccountsRequest, ListAccountsResponse,
    LoginUserRequest, LoginUserResponse, RenewAccessTokenRequest, RenewAccessTokenResponse,
};
use simplebank_core::{Code, FieldViolation, RpcStatus};
use tracing::error;

use super::password::{check_password, hash_password};
use super::validate::{self, Violations};
use super::{CallContext, ServiceCore};
use crate::store::{
    CreateAccountParams, CreateSessionParams, CreateUserParams, ListAccountsParams, StoreError,
    USERS_EMAIL_KEY,
};
use crate::token::TokenError;

const MIN_PAGE_SIZE: i32 = 5;
const MAX_PAGE_SIZE: i32 = 10;

/// Maps store failures that no handler expects onto `Internal`.
fn internal(context: &str, err: &StoreError) -> RpcStatus {
    error!(error = %err, "{context}");
    RpcStatus::internal(context.to_string())
}

/// Runs a password hash or check off the async workers.
async fn blocking<T, F>(context: &str, work: F) -> Result<T, RpcStatus>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        error!(error = %err, "{context}");
        RpcStatus::internal(context.to_string())
    })
}

fn token_internal(context: &str, err: &TokenError) -> RpcStatus {
    error!(error = %err, "{context}");
    RpcStatus::internal(context.to_string())
}

impl ServiceCore {
    pub async fn create_user(
        &self,
        _ctx: &CallContext,
        req: CreateUserRequest,
    ) -> Result<CreateUserResponse, RpcStatus> {
        Violations::new()
            .check("username", validate::username(&req.username))
            .check("password", validate::password(&req.password))
            .check("full_name", validate::full_name(&req.full_name))
            .check("email", validate::email(&req.email))
            .finish()?;

        let password = req.password;
        let hashed_password = blocking("failed to hash password", move || hash_password(&password))
            .await?
            .map_err(|err| {
                error!(error = %err, "failed to hash password");
                RpcStatus::internal("failed to hash password")
            })?;
        let params = CreateUserParams {
            username: req.username,
            hashed_password,
            full_name: req.full_name,
            email: req.email,
        };
        let user = self.store().create_user(params).await.map_err(|err| match err {
            StoreError::UniqueViolation { constraint } if constraint == USERS_EMAIL_KEY => {
                RpcStatus::already_exists("email already exists")
            }
            StoreError::UniqueViolation { .. } => RpcStatus::already_exists("username already exists"),
            other => internal("failed to create user", &other),
        })?;

        Ok(CreateUserResponse {
            user: user.into(),
        })
    }

    pub async fn login_user(
        &self,
        ctx: &CallContext,
        req: LoginUserRequest,
    ) -> Result<LoginUserResponse, RpcStatus> {
        Violations::new()
            .check("username", validate::username(&req.username))
            .check("password", validate::password(&req.password))
            .finish()?;

        let user = self.store().get_user(&req.username).await.map_err(|err| match err {
            StoreError::NotFound => RpcStatus::not_found("user not found"),
            other => internal("failed to find user", &other),
        })?;
        let password = req.password;
        let hashed = user.hashed_password.clone();
        let matches =
            blocking("failed to check password", move || check_password(&password, &hashed)).await?;
        if !matches {
            return Err(RpcStatus::unauthenticated("incorrect password"));
        }

        let config = self.config();
        let (access_token, access_payload) = self
            .token_maker()
            .create_token(&user.username, config.access_token_duration)
            .map_err(|err| token_internal("failed to create access token", &err))?;
        let (refresh_token, refresh_payload) = self
            .token_maker()
            .create_token(&user.username, config.refresh_token_duration)
            .map_err(|err| token_internal("failed to create refresh token", &err))?;

        let session = self
            .store()
            .create_session(CreateSessionParams {
                id: refresh_payload.id,
                username: user.username.clone(),
                refresh_token: refresh_token.clone(),
                user_agent: ctx.user_agent().to_string(),
                client_ip: ctx.client_ip_string(),
                is_blocked: false,
                expires_at: refresh_payload.expired_at,
            })
            .await
            .map_err(|err| internal("failed to create session", &err))?;

        Ok(LoginUserResponse {
            user: user.into(),
            session_id: session.id.to_string(),
            access_token,
            refresh_token,
            access_token_expires_at: access_payload.expired_at,
            refresh_token_expires_at: refresh_payload.expired_at,
        })
    }

    pub async fn renew_access_token(
        &self,
        _ctx: &CallContext,
        req: RenewAccessTokenRequest,
    ) -> Result<RenewAccessTokenResponse, RpcStatus> {
        if req.refresh_token.is_empty() {
            return Err(RpcStatus::invalid_argument(vec![FieldViolation {
                field: "refresh_token".to_string(),
                description: "must not be empty".to_string(),
            }]));
        }

        let payload = self
            .token_maker()
            .verify_token(&req.refresh_token)
            .map_err(|err| match err {
                TokenError::Expired => RpcStatus::unauthenticated("refresh token has expired"),
                _ => RpcStatus::unauthenticated("invalid refresh token"),
            })?;

        let session = self.store().get_session(payload.id).await.map_err(|err| match err {
            StoreError::NotFound => RpcStatus::not_found("session not found"),
            other => internal("failed to find session", &other),
        })?;
        if session.is_blocked {
            return Err(RpcStatus::unauthenticated("blocked session"));
        }
        if session.username != payload.username {
            return Err(RpcStatus::unauthenticated("incorrect session user"));
        }
        if session.refresh_token != req.refresh_token {
            return Err(RpcStatus::unauthenticated("mismatched session token"));
        }
        if Utc::now() > session.expires_at {
            return Err(RpcStatus::unauthenticated("expired session"));
        }

        let (access_token, access_payload) = self
            .token_maker()
            .create_token(&payload.username, self.config().access_token_duration)
            .map_err(|err| token_internal("failed to create access token", &err))?;

        Ok(RenewAccessTokenResponse {
            access_token,
            access_token_expires_at: access_payload.expired_at,
        })
    }

    pub async fn create_account(
        &self,
        ctx: &CallContext,
        req: CreateAccountRequest,
    ) -> Result<CreateAccountResponse, RpcStatus> {
        let payload = self.authorize(ctx)?;
        Violations::new()
            .check("currency", validate::currency(&req.currency))
            .finish()?;

        let account = self
            .store()
            .create_account(CreateAccountParams {
                owner: payload.username,
                balance: 0,
                currency: req.currency,
            })
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { .. } => {
                    RpcStatus::already_exists("account in this currency already exists")
                }
                StoreError::ForeignKeyViolation { .. } => {
                    RpcStatus::new(Code::FailedPrecondition, "account owner does not exist")
                }
                other => internal("failed to create account", &other),
            })?;

        Ok(CreateAccountResponse { account })
    }

    pub async fn get_account(
        &self,
        ctx: &CallContext,
        req: GetAccountRequest,
    ) -> Result<GetAccountResponse, RpcStatus> {
        let payload = self.authorize(ctx)?;
        Violations::new()
            .check("id", validate::positive_id(req.id))
            .finish()?;

        let account = self.store().get_account(req.id).await.map_err(|err| match err {
            StoreError::NotFound => RpcStatus::not_found("account not found"),
            other => internal("failed to get account", &other),
        })?;
        if account.owner != payload.username {
            return Err(RpcStatus::permission_denied(
                "account doesn't belong to the authenticated user",
            ));
        }

        Ok(GetAccountResponse { account })
    }

    pub async fn list_accounts(
        &self,
        ctx: &CallContext,
        req: ListAccountsRequest,
    ) -> Result<ListAccountsResponse, RpcStatus> {
        let payload = self.authorize(ctx)?;
        Violations::new()
            .check("page_id", validate::in_range(req.page_id, 1, i32::MAX))
            .check(
                "page_size",
                validate::in_range(req.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE),
            )
            .finish()?;

        let limit = i64::from(req.page_size);
        let accounts = self
            .store()
            .list_accounts(ListAccountsParams {
                owner: payload.username,
                limit,
                offset: (i64::from(req.page_id) - 1) * limit,
            })
            .await
            .map_err(|err| internal("failed to list accounts", &err))?;

        Ok(ListAccountsResponse { accounts })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_support::test_core;
    use super::*;

    fn create_user_request(username: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            full_name: "Test User".to_string(),
            email: format!("{username}@example.com"),
            password: "secret123".to_string(),
        }
    }

    async fn login(core: &ServiceCore, username: &str) -> LoginUserResponse {
        core.create_user(&CallContext::default(), create_user_request(username))
            .await
            .expect("create user");
        core.login_user(
            &CallContext::default(),
            LoginUserRequest {
                username: username.to_string(),
                password: "secret123".to_string(),
            },
        )
        .await
        .expect("login")
    }

    fn authed(token: &str) -> CallContext {
        CallContext::default().with_authorization(format!("Bearer {token}"))
    }

    #[tokio::test]
    async fn create_user_validates_and_rejects_duplicates() {
        let core = test_core();
        let ctx = CallContext::default();

        let mut bad = create_user_request("alice");
        bad.email = "not-an-email".to_string();
        let status = core.create_user(&ctx, bad).await.unwrap_err();
        assert_eq!(status.code, Code::InvalidArgument);
        assert_eq!(status.field_violations[0].field, "email");

        let created = core
            .create_user(&ctx, create_user_request("alice"))
            .await
            .expect("create");
        assert_eq!(created.user.username, "alice");

        let status = core
            .create_user(&ctx, create_user_request("alice"))
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::AlreadyExists);
    }

    #[tokio::test]
    async fn login_checks_password_and_records_session() {
        let core = test_core();
        core.create_user(&CallContext::default(), create_user_request("bob"))
            .await
            .expect("create");

        let wrong = core
            .login_user(
                &CallContext::default(),
                LoginUserRequest {
                    username: "bob".to_string(),
                    password: "wrongpass".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(wrong.code, Code::Unauthenticated);

        let missing = core
            .login_user(
                &CallContext::default(),
                LoginUserRequest {
                    username: "nobody".to_string(),
                    password: "secret123".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(missing.code, Code::NotFound);

        let mut ctx = CallContext::default();
        ctx.metadata
            .insert("user-agent".to_string(), "test-agent".to_string());
        ctx.client_ip = Some("127.0.0.1".parse().expect("ip"));
        let resp = core
            .login_user(
                &ctx,
                LoginUserRequest {
                    username: "bob".to_string(),
                    password: "secret123".to_string(),
                },
            )
            .await
            .expect("login");
        let session = core
            .store()
            .get_session(resp.session_id.parse().expect("uuid"))
            .await
            .expect("session");
        assert_eq!(session.user_agent, "test-agent");
        assert_eq!(session.client_ip, "127.0.0.1");
        assert_eq!(session.refresh_token, resp.refresh_token);
        assert!(resp.refresh_token_expires_at > resp.access_token_expires_at);
    }

    #[tokio::test]
    async fn renew_access_token_checks_session() {
        let core = test_core();
        let login = login(&core, "carol").await;

        let renewed = core
            .renew_access_token(
                &CallContext::default(),
                RenewAccessTokenRequest {
                    refresh_token: login.refresh_token.clone(),
                },
            )
            .await
            .expect("renew");
        assert_eq!(
            core.token_maker()
                .verify_token(&renewed.access_token)
                .expect("verify")
                .username,
            "carol"
        );

        // A valid token whose id has no session.
        let (orphan, _) = core
            .token_maker()
            .create_token("carol", Duration::from_secs(60))
            .expect("token");
        let status = core
            .renew_access_token(
                &CallContext::default(),
                RenewAccessTokenRequest {
                    refresh_token: orphan,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::NotFound);

        let status = core
            .renew_access_token(&CallContext::default(), RenewAccessTokenRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::InvalidArgument);
    }

    #[tokio::test]
    async fn account_methods_require_auth() {
        let core = test_core();
        let status = core
            .create_account(
                &CallContext::default(),
                CreateAccountRequest {
                    currency: "USD".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn accounts_are_scoped_to_their_owner() {
        let core = test_core();
        let dave = login(&core, "dave").await;
        let erin = login(&core, "erin").await;

        let account = core
            .create_account(
                &authed(&dave.access_token),
                CreateAccountRequest {
                    currency: "USD".to_string(),
                },
            )
            .await
            .expect("create account")
            .account;
        assert_eq!(account.owner, "dave");
        assert_eq!(account.balance, 0);

        let duplicate = core
            .create_account(
                &authed(&dave.access_token),
                CreateAccountRequest {
                    currency: "USD".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(duplicate.code, Code::AlreadyExists);

        let fetched = core
            .get_account(&authed(&dave.access_token), GetAccountRequest { id: account.id })
            .await
            .expect("own account");
        assert_eq!(fetched.account, account);

        let denied = core
            .get_account(&authed(&erin.access_token), GetAccountRequest { id: account.id })
            .await
            .unwrap_err();
        assert_eq!(denied.code, Code::PermissionDenied);

        let missing = core
            .get_account(&authed(&dave.access_token), GetAccountRequest { id: 999 })
            .await
            .unwrap_err();
        assert_eq!(missing.code, Code::NotFound);
    }

    #[tokio::test]
    async fn list_accounts_validates_paging() {
        let core = test_core();
        let frank = login(&core, "frank").await;
        for currency in ["USD", "EUR", "CAD"] {
            core.create_account(
                &authed(&frank.access_token),
                CreateAccountRequest {
                    currency: currency.to_string(),
                },
            )
            .await
            .expect("create account");
        }

        let status = core
            .list_accounts(
                &authed(&frank.access_token),
                ListAccountsRequest {
                    page_id: 0,
                    page_size: 20,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.field_violations.len(), 2);

        let page = core
            .list_accounts(
                &authed(&frank.access_token),
                ListAccountsRequest {
                    page_id: 1,
                    page_size: 5,
                },
            )
            .await
            .expect("list");
        assert_eq!(page.accounts.len(), 3);
    }
}
