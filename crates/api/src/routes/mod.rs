pub mod ops;
pub mod orders;
pub mod profiles;
pub mod referrals;
pub mod webhooks;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID-backed id from a path or body field.
pub(crate) fn parse_id<T: FromStr>(field: &str, value: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}
