//! Transport-neutral entry point into the service core.
//!
//! Both listeners hand the raw request body to [`dispatch`] together with the
//! wire format they speak, so a call behaves the same on either transport.

use serde::de::DeserializeOwned;
use serde::Serialize;
use simplebank_core::{Code, Method, RpcStatus, WireFormat};

use super::{CallContext, ServiceCore};

fn decode<T: DeserializeOwned>(format: WireFormat, body: &[u8]) -> Result<T, RpcStatus> {
    format
        .decode(body)
        .map_err(|err| RpcStatus::new(Code::InvalidArgument, format!("cannot decode request: {err}")))
}

fn encode<T: Serialize>(format: WireFormat, value: &T) -> Result<Vec<u8>, RpcStatus> {
    format
        .encode(value)
        .map_err(|err| RpcStatus::internal(format!("cannot encode response: {err}")))
}

/// Decodes `body`, runs `method`, and encodes the response in `format`.
///
/// # Errors
///
/// Returns the call's [`RpcStatus`] when decoding or the handler fails.
pub async fn dispatch(
    core: &ServiceCore,
    method: Method,
    ctx: &CallContext,
    body: &[u8],
    format: WireFormat,
) -> Result<Vec<u8>, RpcStatus> {
    match method {
        Method::CreateUser => {
            let resp = core.create_user(ctx, decode(format, body)?).await?;
            encode(format, &resp)
        }
        Method::LoginUser => {
            let resp = core.login_user(ctx, decode(format, body)?).await?;
            encode(format, &resp)
        }
        Method::RenewAccessToken => {
            let resp = core.renew_access_token(ctx, decode(format, body)?).await?;
            encode(format, &resp)
        }
        Method::CreateAccount => {
            let resp = core.create_account(ctx, decode(format, body)?).await?;
            encode(format, &resp)
        }
        Method::GetAccount => {
            let resp = core.get_account(ctx, decode(format, body)?).await?;
            encode(format, &resp)
        }
        Method::ListAccounts => {
            let resp = core.list_accounts(ctx, decode(format, body)?).await?;
            encode(format, &resp)
        }
    }
}

/// Like [`dispatch`], resolving a fully qualified method name first.
///
/// # Errors
///
/// Returns `Unimplemented` for names outside the contract.
pub async fn dispatch_by_name(
    core: &ServiceCore,
    full_name: &str,
    ctx: &CallContext,
    body: &[u8],
    format: WireFormat,
) -> Result<Vec<u8>, RpcStatus> {
    let method = Method::from_full_name(full_name)
        .ok_or_else(|| RpcStatus::unimplemented(format!("unknown method {full_name}")))?;
    dispatch(core, method, ctx, body, format).await
}
