use serde::{Deserialize, Serialize};

use crate::models::{FeeSchedule, MemberType};

/// 金额校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountCheck {
    pub is_valid: bool,
    /// 覆盖月数 (amount / rate), 无效时为 0
    pub month_count: u32,
    pub error: Option<String>,
}

impl AmountCheck {
    fn valid(month_count: u32) -> Self {
        Self {
            is_valid: true,
            month_count,
            error: None,
        }
    }

    fn invalid(error: String) -> Self {
        Self {
            is_valid: false,
            month_count: 0,
            error: Some(error),
        }
    }
}

/// 无会员匹配时的费率提示, 仅供操作员参考, 绝不自动指派会员
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateHint {
    Regular,
    Couple,
    Undetermined,
}

/// 金额校验: 必须是适用月费的正整数倍
///
/// 全程整数运算 (最小货币单位), 对账正确性依赖精确相等
pub fn validate_amount(amount: i64, schedule: &FeeSchedule, member_type: MemberType) -> AmountCheck {
    let rate = schedule.rate_for(member_type);
    if rate <= 0 {
        return AmountCheck::invalid(format!("invalid monthly rate {rate}"));
    }
    if amount <= 0 {
        return AmountCheck::invalid(format!(
            "amount {amount} is not a positive multiple of monthly rate {rate}"
        ));
    }
    if amount % rate != 0 {
        return AmountCheck::invalid(format!(
            "amount {amount} is not a multiple of monthly rate {rate}"
        ));
    }
    AmountCheck::valid((amount / rate) as u32)
}

/// 金额反推会员类别: 恰好整除一种费率时给出提示
///
/// 两种费率都整除且费率不同 → 无法判定; 费率相同视为 regular
pub fn detect_member_type(amount: i64, schedule: &FeeSchedule) -> RateHint {
    if amount <= 0 {
        return RateHint::Undetermined;
    }
    let fits_regular = schedule.regular_amount > 0 && amount % schedule.regular_amount == 0;
    let fits_couple = schedule.couple_amount > 0 && amount % schedule.couple_amount == 0;

    match (fits_regular, fits_couple) {
        (true, false) => RateHint::Regular,
        (false, true) => RateHint::Couple,
        (true, true) if schedule.regular_amount == schedule.couple_amount => RateHint::Regular,
        _ => RateHint::Undetermined,
    }
}

/// 金额是否匹配任一费率 (未匹配行 PENDING / ERROR 的分界)
pub fn matches_any_rate(amount: i64, schedule: &FeeSchedule) -> bool {
    amount > 0
        && ((schedule.regular_amount > 0 && amount % schedule.regular_amount == 0)
            || (schedule.couple_amount > 0 && amount % schedule.couple_amount == 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(regular: i64, couple: i64) -> FeeSchedule {
        FeeSchedule {
            club_id: 1,
            year: 2024,
            regular_amount: regular,
            couple_amount: couple,
        }
    }

    #[test]
    fn exact_multiple_is_valid() {
        let check = validate_amount(30000, &schedule(10000, 18000), MemberType::Regular);
        assert!(check.is_valid);
        assert_eq!(check.month_count, 3);
        assert_eq!(check.error, None);
    }

    #[test]
    fn remainder_is_invalid_and_names_the_rate() {
        let check = validate_amount(25000, &schedule(10000, 18000), MemberType::Regular);
        assert!(!check.is_valid);
        assert_eq!(check.month_count, 0);
        assert!(check.error.as_deref().unwrap().contains("10000"));
    }

    #[test]
    fn couple_rate_applies_to_couple_members() {
        let check = validate_amount(36000, &schedule(10000, 18000), MemberType::Couple);
        assert!(check.is_valid);
        assert_eq!(check.month_count, 2);
    }

    #[test]
    fn zero_and_negative_amounts_are_invalid() {
        assert!(!validate_amount(0, &schedule(10000, 18000), MemberType::Regular).is_valid);
        assert!(!validate_amount(-10000, &schedule(10000, 18000), MemberType::Regular).is_valid);
    }

    #[test]
    fn detect_prefers_the_single_dividing_rate() {
        let s = schedule(15000, 25000);
        assert_eq!(detect_member_type(45000, &s), RateHint::Regular);
        assert_eq!(detect_member_type(50000, &s), RateHint::Couple);
        assert_eq!(detect_member_type(7000, &s), RateHint::Undetermined);
    }

    #[test]
    fn detect_is_undetermined_when_both_rates_divide() {
        // 90000 = 6 x 15000 = 2 x 45000
        let s = schedule(15000, 45000);
        assert_eq!(detect_member_type(90000, &s), RateHint::Undetermined);
    }

    #[test]
    fn equal_rates_fall_back_to_regular() {
        let s = schedule(20000, 20000);
        assert_eq!(detect_member_type(40000, &s), RateHint::Regular);
    }

    #[test]
    fn matches_any_rate_splits_pending_from_error() {
        let s = schedule(15000, 25000);
        assert!(matches_any_rate(30000, &s));
        assert!(matches_any_rate(50000, &s));
        assert!(!matches_any_rate(7777, &s));
        assert!(!matches_any_rate(0, &s));
    }
}
