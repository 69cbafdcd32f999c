use simplebank_core::frame::AUTHORIZATION_KEY;
use simplebank_core::RpcStatus;

use super::{CallContext, ServiceCore};
use crate::token::{Payload, TokenError};

/// The only supported authorization scheme, compared case-insensitively.
pub const AUTHORIZATION_BEARER: &str = "bearer";

impl ServiceCore {
    /// Verifies the access token carried in the call's `authorization` metadata.
    pub(super) fn authorize(&self, ctx: &CallContext) -> Result<Payload, RpcStatus> {
        let header = ctx
            .metadata_value(AUTHORIZATION_KEY)
            .ok_or_else(|| RpcStatus::unauthenticated("missing authorization header"))?;

        let mut fields = header.split_whitespace();
        let (Some(scheme), Some(token), None) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(RpcStatus::unauthenticated(
                "invalid authorization header format",
            ));
        };
        if !scheme.eq_ignore_ascii_case(AUTHORIZATION_BEARER) {
            return Err(RpcStatus::unauthenticated(format!(
                "unsupported authorization type: {scheme}"
            )));
        }

        self.token_maker().verify_token(token).map_err(|err| match err {
            TokenError::Expired => RpcStatus::unauthenticated("access token has expired"),
            _ => RpcStatus::unauthenticated("invalid access token"),
        })
    }
}
