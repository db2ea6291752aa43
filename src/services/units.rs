//! 원장 금액(`Decimal`)과 체인 최소 단위(`U256`) 변환

use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::ApiError;

/// 최소 단위 → 원장 금액. 원장 정밀도를 넘는 값은 거절.
pub fn from_base_units(value: U256, decimals: u32) -> Result<Decimal, ApiError> {
    if value > U256::from(i128::MAX as u128) {
        return Err(overflow());
    }
    let raw = value.as_u128() as i128;

    Decimal::try_from_i128_with_scale(raw, decimals)
        .map(|d| d.normalize())
        .map_err(|_| overflow())
}

/// 원장 금액 → 최소 단위. 최소 단위 아래 자릿수는 버린다.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256, ApiError> {
    if amount.is_sign_negative() {
        return Err(ApiError::ValidationError("amount must not be negative".to_string()));
    }

    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = amount.checked_mul(scale).ok_or_else(overflow)?.trunc();
    let raw = scaled.to_u128().ok_or_else(overflow)?;

    Ok(U256::from(raw))
}

/// wei → gwei 표시용
pub fn wei_to_gwei(wei: U256) -> Decimal {
    from_base_units(wei, 9).unwrap_or_default()
}

fn overflow() -> ApiError {
    ApiError::ValidationError("amount exceeds supported precision".to_string())
}
