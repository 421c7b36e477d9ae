//! 权益策略
//!
//! 纯函数：事件是否构成合格转化。不碰网络、不碰存储，可独立单测。
//!
//! 规则：
//! 1. 状态必须在该伙伴的合格状态集内
//! 2. 金额类状态受最低入金限制（MIN_DEPOSIT_USD，0 表示不限制）
//! 3. 非金额类状态（lead/qualified/confirmed）不做金额检查

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

use crate::models::Partner;

/// 金额类状态：受最低入金限制
static MONETARY_STATUSES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["deposit", "first_deposit", "ftd", "sale"].into_iter().collect());

/// 每个伙伴的合格状态集
static QUALIFYING_STATUSES: Lazy<HashMap<Partner, HashSet<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        (
            Partner::Generic,
            [
                "deposit",
                "first_deposit",
                "ftd",
                "qualified",
                "lead",
                "sale",
                "confirmed",
            ]
            .into_iter()
            .collect(),
        ),
        (
            Partner::OneWin,
            ["deposit", "first_deposit", "ftd"].into_iter().collect(),
        ),
        (
            Partner::Keitaro,
            ["lead", "sale", "deposit", "first_deposit", "confirmed"]
                .into_iter()
                .collect(),
        ),
    ])
});

/// 策略结论
#[derive(Debug, Clone, PartialEq)]
pub struct GrantDecision {
    pub qualifies: bool,
    pub reason: String,
}

impl GrantDecision {
    fn qualify(status: &str) -> Self {
        Self {
            qualifies: true,
            reason: format!("qualified: {}", status),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            qualifies: false,
            reason,
        }
    }
}

pub struct EntitlementPolicy;

impl EntitlementPolicy {
    /// 该伙伴的合格状态集
    pub fn qualifying_statuses(partner: Partner) -> &'static HashSet<&'static str> {
        &QUALIFYING_STATUSES[&partner]
    }

    pub fn is_monetary(status: &str) -> bool {
        MONETARY_STATUSES.contains(status)
    }

    /// 评估一条转化事件
    ///
    /// amount 为 None（缺失或非数字）按 0 处理；
    /// min_deposit 为 0 时任何非负金额都通过。
    pub fn evaluate(
        partner: Partner,
        status: &str,
        amount: Option<f64>,
        min_deposit: f64,
    ) -> GrantDecision {
        let status = status.to_lowercase();

        if !Self::qualifying_statuses(partner).contains(&status.as_str()) {
            return GrantDecision::deny(format!(
                "status '{}' is not a qualifying event for {}",
                status, partner
            ));
        }

        if Self::is_monetary(&status) {
            let value = amount.unwrap_or(0.0);
            if value < 0.0 {
                return GrantDecision::deny(format!("negative amount {} rejected", value));
            }
            if min_deposit > 0.0 && value < min_deposit {
                return GrantDecision::deny(format!(
                    "Deposit below minimum (${} required)",
                    min_deposit
                ));
            }
        }

        GrantDecision::qualify(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifying_status_completeness() {
        // 集合内的每个状态在金额充足时都合格
        for partner in [Partner::Generic, Partner::OneWin, Partner::Keitaro] {
            for status in EntitlementPolicy::qualifying_statuses(partner) {
                let decision = EntitlementPolicy::evaluate(partner, status, Some(1000.0), 10.0);
                assert!(
                    decision.qualifies,
                    "{} / {} should qualify",
                    partner, status
                );
            }
        }
    }

    #[test]
    fn test_non_qualifying_status_rejected_regardless_of_amount() {
        for status in ["click", "rejected", "install", "refund", ""] {
            let decision =
                EntitlementPolicy::evaluate(Partner::Generic, status, Some(1_000_000.0), 0.0);
            assert!(!decision.qualifies, "'{}' must not qualify", status);
        }
        // lead 对 1win 不在集合内
        assert!(!EntitlementPolicy::evaluate(Partner::OneWin, "lead", Some(100.0), 0.0).qualifies);
    }

    #[test]
    fn test_threshold_boundary() {
        // == 阈值 → 通过
        assert!(EntitlementPolicy::evaluate(Partner::OneWin, "deposit", Some(10.0), 10.0).qualifies);
        // 低于阈值 → 拒绝，带理由
        let decision = EntitlementPolicy::evaluate(Partner::OneWin, "deposit", Some(9.99), 10.0);
        assert!(!decision.qualifies);
        assert_eq!(decision.reason, "Deposit below minimum ($10 required)");
        // 阈值 0 → 不限制
        assert!(EntitlementPolicy::evaluate(Partner::OneWin, "deposit", Some(0.0), 0.0).qualifies);
        assert!(EntitlementPolicy::evaluate(Partner::OneWin, "deposit", None, 0.0).qualifies);
    }

    #[test]
    fn test_non_monetary_status_skips_threshold() {
        // lead 没有金额也合格，阈值不适用
        assert!(EntitlementPolicy::evaluate(Partner::Keitaro, "lead", None, 50.0).qualifies);
        assert!(EntitlementPolicy::evaluate(Partner::Generic, "qualified", Some(1.0), 50.0).qualifies);
    }

    #[test]
    fn test_missing_amount_counts_as_zero_for_monetary() {
        let decision = EntitlementPolicy::evaluate(Partner::Generic, "deposit", None, 10.0);
        assert!(!decision.qualifies);
    }

    #[test]
    fn test_status_case_insensitive() {
        assert!(
            EntitlementPolicy::evaluate(Partner::Generic, "First_Deposit", Some(100.0), 10.0)
                .qualifies
        );
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(!EntitlementPolicy::evaluate(Partner::Generic, "deposit", Some(-5.0), 0.0).qualifies);
    }
}
