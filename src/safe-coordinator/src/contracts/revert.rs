//! Classification of RPC failures and Safe revert reasons.
//!
//! The Safe reverts with short `GSxxx` codes. Signature problems (`GS020`..`GS026`) are
//! authorization failures of the signature set; everything else that reverts is an
//! execution failure.

use std::sync::OnceLock;

use ethers::providers::{JsonRpcError, MiddlewareError};
use regex::Regex;

use crate::errors::{AuthorizationError, CoordinatorError, ExecutionError, TransportError};

/// First `GSxxx` code in `text`.
pub fn safe_error_code(text: &str) -> Option<String> {
    static GS_CODE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = GS_CODE.get_or_init(|| Regex::new(r"GS(\d{3})").ok()).as_ref()?;
    re.captures(text)
        .and_then(|c| c.get(0))
        .map(|m| m.as_str().to_string())
}

/// Map a revert reason to the coordinator taxonomy.
pub fn classify_revert(reason: &str) -> CoordinatorError {
    let Some(code) = safe_error_code(reason) else {
        return ExecutionError::Reverted {
            code: None,
            reason: reason.to_string(),
        }
        .into();
    };
    match code[2..].parse::<u16>() {
        Ok(20..=26) => AuthorizationError::SignaturesRejected { code }.into(),
        _ => ExecutionError::Reverted {
            code: Some(code),
            reason: reason.to_string(),
        }
        .into(),
    }
}

pub fn from_rpc_response(err: &JsonRpcError) -> CoordinatorError {
    if is_revert(err) {
        classify_revert(&revert_reason(err))
    } else {
        TransportError::Rpc(format!("{} (code {})", err.message, err.code)).into()
    }
}

/// Any ethers middleware error: reverts are classified, the rest is transport.
pub fn from_middleware<E: MiddlewareError>(err: &E) -> CoordinatorError {
    match err.as_error_response() {
        Some(resp) => from_rpc_response(resp),
        None => {
            let text = err.to_string();
            if text.to_ascii_lowercase().contains("revert") {
                classify_revert(&text)
            } else {
                TransportError::Rpc(text).into()
            }
        }
    }
}

fn is_revert(err: &JsonRpcError) -> bool {
    err.code == 3 || err.message.to_ascii_lowercase().contains("revert")
}

fn revert_reason(err: &JsonRpcError) -> String {
    let decoded = err
        .data
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|raw| hex::decode(raw.trim_start_matches("0x")).ok())
        .and_then(|bytes| alloy_sol_types::decode_revert_reason(&bytes));
    decoded.unwrap_or_else(|| err.message.clone())
}
