pub mod in_memory;
pub mod local_signer;
pub mod manual_provider;
pub mod signature;
pub mod stripe_adapter;
pub mod supabase;
pub mod supabase_rest;
pub mod supabase_storage;

use crate::domain::to_minor_units;
use crate::error::{Result, StorefrontError};
use rust_decimal::Decimal;

/// Checks a charge before it reaches a provider and returns it in minor units.
pub(crate) fn validate_charge(amount: Decimal, currency: &str, supported: &str) -> Result<i64> {
    if !currency.eq_ignore_ascii_case(supported) {
        return Err(StorefrontError::InvalidAmount(format!(
            "currency '{currency}' does not match provider currency '{supported}'"
        )));
    }
    match to_minor_units(amount, currency) {
        Some(minor) if minor > 0 => Ok(minor),
        _ => Err(StorefrontError::InvalidAmount(format!(
            "amount {amount} must be positive"
        ))),
    }
}
