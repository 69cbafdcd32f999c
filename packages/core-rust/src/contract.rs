//! The `SimpleBank` RPC contract: the fixed set of callable methods.
//!
//! The contract is transport-independent. The binary RPC listener addresses
//! methods by their fully qualified name (`/simplebank.SimpleBank/CreateUser`),
//! while the HTTP gateway addresses them by wire name (`POST /v1/create_user`).
//! Both resolve to the same [`Method`] value.

use serde::{Deserialize, Serialize};

/// Fully qualified name of the banking service.
pub const SERVICE_NAME: &str = "simplebank.SimpleBank";

/// Fully qualified name of the reflection service.
pub const REFLECTION_SERVICE_NAME: &str = "simplebank.reflection.ServerReflection";

/// Full method name of the reflection call that lists the contract.
pub const REFLECTION_LIST_METHODS: &str = "/simplebank.reflection.ServerReflection/ListMethods";

/// Every remotely callable method of the banking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    CreateUser,
    LoginUser,
    RenewAccessToken,
    CreateAccount,
    GetAccount,
    ListAccounts,
}

impl Method {
    /// All methods, in declaration order.
    pub const ALL: [Method; 6] = [
        Method::CreateUser,
        Method::LoginUser,
        Method::RenewAccessToken,
        Method::CreateAccount,
        Method::GetAccount,
        Method::ListAccounts,
    ];

    /// Short method name as declared in the contract (`CreateUser`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateUser => "CreateUser",
            Self::LoginUser => "LoginUser",
            Self::RenewAccessToken => "RenewAccessToken",
            Self::CreateAccount => "CreateAccount",
            Self::GetAccount => "GetAccount",
            Self::ListAccounts => "ListAccounts",
        }
    }

    /// Snake-case wire name used by the HTTP gateway (`create_user`).
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::CreateUser => "create_user",
            Self::LoginUser => "login_user",
            Self::RenewAccessToken => "renew_access_token",
            Self::CreateAccount => "create_account",
            Self::GetAccount => "get_account",
            Self::ListAccounts => "list_accounts",
        }
    }

    /// Fully qualified name used on the binary RPC transport.
    #[must_use]
    pub fn full_name(self) -> String {
        format!("/{SERVICE_NAME}/{}", self.name())
    }

    /// HTTP route the gateway exposes for this method.
    #[must_use]
    pub fn http_path(self) -> String {
        format!("/v1/{}", self.wire_name())
    }

    /// Whether the call must carry a valid access token.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        matches!(
            self,
            Self::CreateAccount | Self::GetAccount | Self::ListAccounts
        )
    }

    /// Name of the request message type.
    #[must_use]
    pub fn request_type(self) -> &'static str {
        match self {
            Self::CreateUser => "CreateUserRequest",
            Self::LoginUser => "LoginUserRequest",
            Self::RenewAccessToken => "RenewAccessTokenRequest",
            Self::CreateAccount => "CreateAccountRequest",
            Self::GetAccount => "GetAccountRequest",
            Self::ListAccounts => "ListAccountsRequest",
        }
    }

    /// Name of the response message type.
    #[must_use]
    pub fn response_type(self) -> &'static str {
        match self {
            Self::CreateUser => "CreateUserResponse",
            Self::LoginUser => "LoginUserResponse",
            Self::RenewAccessToken => "RenewAccessTokenResponse",
            Self::CreateAccount => "CreateAccountResponse",
            Self::GetAccount => "GetAccountResponse",
            Self::ListAccounts => "ListAccountsResponse",
        }
    }

    /// Resolves a fully qualified RPC method name.
    ///
    /// Returns `None` for names outside [`SERVICE_NAME`] or unknown methods.
    #[must_use]
    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let rest = full_name.strip_prefix('/').unwrap_or(full_name);
        let (service, method) = rest.split_once('/')?;
        if service != SERVICE_NAME {
            return None;
        }
        Self::ALL.into_iter().find(|m| m.name() == method)
    }

    /// Builds the descriptor advertised through reflection.
    #[must_use]
    pub fn descriptor(self) -> MethodDescriptor {
        MethodDescriptor {
            name: self.name().to_string(),
            full_name: self.full_name(),
            http_path: self.http_path(),
            request_type: self.request_type().to_string(),
            response_type: self.response_type().to_string(),
            requires_auth: self.requires_auth(),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Description of one contract method, returned by the reflection call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub full_name: String,
    pub http_path: String,
    pub request_type: String,
    pub response_type: String,
    pub requires_auth: bool,
}

/// Response body of the reflection `ListMethods` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMethodsResponse {
    pub service: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ListMethodsResponse {
    /// Describes the complete banking contract.
    #[must_use]
    pub fn for_contract() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            methods: Method::ALL.into_iter().map(Method::descriptor).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_resolves_back_to_method() {
        for method in Method::ALL {
            assert_eq!(Method::from_full_name(&method.full_name()), Some(method));
        }
    }

    #[test]
    fn from_full_name_rejects_other_services() {
        assert_eq!(Method::from_full_name("/other.Service/CreateUser"), None);
        assert_eq!(Method::from_full_name(REFLECTION_LIST_METHODS), None);
        assert_eq!(Method::from_full_name("/simplebank.SimpleBank/Transfer"), None);
        assert_eq!(Method::from_full_name("garbage"), None);
    }

    #[test]
    fn http_paths_are_unique() {
        let mut paths: Vec<String> = Method::ALL.iter().map(|m| m.http_path()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), Method::ALL.len());
        assert_eq!(Method::LoginUser.http_path(), "/v1/login_user");
    }

    #[test]
    fn only_account_methods_require_auth() {
        assert!(!Method::CreateUser.requires_auth());
        assert!(!Method::LoginUser.requires_auth());
        assert!(!Method::RenewAccessToken.requires_auth());
        assert!(Method::CreateAccount.requires_auth());
        assert!(Method::GetAccount.requires_auth());
        assert!(Method::ListAccounts.requires_auth());
    }

    #[test]
    fn reflection_lists_every_method() {
        let listing = ListMethodsResponse::for_contract();
        assert_eq!(listing.service, SERVICE_NAME);
        assert_eq!(listing.methods.len(), Method::ALL.len());
        assert_eq!(listing.methods[0].full_name, "/simplebank.SimpleBank/CreateUser");
    }
}
