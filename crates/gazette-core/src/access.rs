//! Access resolver: materializes a user's capability bitmask.
//!
//! Layout, bits 0..63 from the low end:
//! - bits 0..4 — plan band, cumulative-prefix encoded (all plans share the
//!   guest bit, each higher tier adds one lower bit);
//! - bit 5 — reserved separator, always 0;
//! - bits 6..63 — subscription band, one bit per subscription at its stable
//!   `bitmap_position`.

use serde::{Deserialize, Serialize};

use crate::bitmask::BitMask64;

/// Plan band value for guests (terms not accepted).
pub const PLAN_GUEST: u64 = 0b10000;
/// Plan band value for authenticated users who accepted the terms.
pub const PLAN_AUTH_USER: u64 = 0b11000;
/// Plan band value for educational accounts.
pub const PLAN_EDUCATIONAL: u64 = 0b11100;
/// Plan band value for researcher accounts.
pub const PLAN_RESEARCHER: u64 = 0b11110;

/// Bit index of the first subscription position (position 0 lands here).
pub const SUBSCRIPTION_BIT_OFFSET: u32 = 6;

/// Group name granting the researcher plan.
pub const GROUP_PLAN_RESEARCHER: &str = "plan-researcher";
/// Group name granting the educational plan.
pub const GROUP_PLAN_EDUCATIONAL: &str = "plan-educational";

/// Opaque plan label produced alongside the resolved bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserPlan {
    Guest,
    AuthUser,
    Educational,
    Researcher,
}

impl UserPlan {
    /// The plan band bits for this plan.
    pub fn band(&self) -> u64 {
        match self {
            UserPlan::Guest => PLAN_GUEST,
            UserPlan::AuthUser => PLAN_AUTH_USER,
            UserPlan::Educational => PLAN_EDUCATIONAL,
            UserPlan::Researcher => PLAN_RESEARCHER,
        }
    }
}

impl std::fmt::Display for UserPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserPlan::Guest => write!(f, "guest"),
            UserPlan::AuthUser => write!(f, "auth-user"),
            UserPlan::Educational => write!(f, "educational"),
            UserPlan::Researcher => write!(f, "researcher"),
        }
    }
}

/// The identity-store view the resolver consumes: group membership,
/// subscription positions, and terms-acceptance state.
#[derive(Debug, Clone, Default)]
pub struct AccessProfile {
    /// Names of the groups the user belongs to.
    pub groups: Vec<String>,
    /// `bitmap_position` of every subscription in the user's set.
    pub subscription_positions: Vec<u32>,
    /// Whether the user has accepted the terms of use.
    pub terms_accepted: bool,
}

/// Resolve a user's materialized bitmask and plan label.
///
/// Users who have not accepted the terms resolve to the bare guest band;
/// their subscriptions do not apply.
pub fn resolve(profile: &AccessProfile) -> (BitMask64, UserPlan) {
    if !profile.terms_accepted {
        return (BitMask64::from_int(PLAN_GUEST), UserPlan::Guest);
    }

    let plan = if profile.groups.iter().any(|g| g == GROUP_PLAN_RESEARCHER) {
        UserPlan::Researcher
    } else if profile.groups.iter().any(|g| g == GROUP_PLAN_EDUCATIONAL) {
        UserPlan::Educational
    } else {
        UserPlan::AuthUser
    };

    let mut mask = BitMask64::from_int(plan.band());
    for position in &profile.subscription_positions {
        mask = mask.with_bit(position + SUBSCRIPTION_BIT_OFFSET);
    }
    (mask, plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_when_terms_not_accepted() {
        let profile = AccessProfile {
            groups: vec![GROUP_PLAN_RESEARCHER.to_string()],
            subscription_positions: vec![0, 2],
            terms_accepted: false,
        };
        let (mask, plan) = resolve(&profile);
        assert_eq!(plan, UserPlan::Guest);
        assert_eq!(mask.as_u64(), 0b10000);
    }

    #[test]
    fn test_auth_user_after_terms() {
        let profile = AccessProfile {
            terms_accepted: true,
            ..Default::default()
        };
        let (mask, plan) = resolve(&profile);
        assert_eq!(plan, UserPlan::AuthUser);
        assert_eq!(mask.as_u64(), 0b11000);
    }

    #[test]
    fn test_researcher_outranks_educational() {
        let profile = AccessProfile {
            groups: vec![
                GROUP_PLAN_EDUCATIONAL.to_string(),
                GROUP_PLAN_RESEARCHER.to_string(),
            ],
            terms_accepted: true,
            ..Default::default()
        };
        let (mask, plan) = resolve(&profile);
        assert_eq!(plan, UserPlan::Researcher);
        assert_eq!(mask.as_u64(), 0b11110);
    }

    #[test]
    fn test_educational_plan() {
        let profile = AccessProfile {
            groups: vec![GROUP_PLAN_EDUCATIONAL.to_string()],
            terms_accepted: true,
            ..Default::default()
        };
        let (mask, plan) = resolve(&profile);
        assert_eq!(plan, UserPlan::Educational);
        assert_eq!(mask.as_u64(), 0b11100);
    }

    #[test]
    fn test_guest_to_researcher_with_subscriptions() {
        // Scenario E1: guest -> terms -> researcher -> subscriptions at
        // positions 0 and 2.
        let mut profile = AccessProfile::default();
        assert_eq!(resolve(&profile).0.as_u64(), 0b10000);

        profile.terms_accepted = true;
        assert_eq!(resolve(&profile).0.as_u64(), 0b11000);

        profile.groups.push(GROUP_PLAN_RESEARCHER.to_string());
        assert_eq!(resolve(&profile).0.as_u64(), 0b11110);

        profile.subscription_positions = vec![0, 2];
        let (mask, _) = resolve(&profile);
        // Plan band 0b11110, separator clear, subscription bits 6 and 8.
        assert_eq!(mask.as_u64(), 0b101011110);
        assert_eq!(mask.as_u64(), 350);
        assert!(!mask.is_set(5));
    }

    #[test]
    fn test_guest_bit_set_for_every_plan() {
        // Property P7: the guest bit is shared by every plan band.
        let guest = BitMask64::from_binary_str("10000", false).unwrap();
        for plan in [
            UserPlan::Guest,
            UserPlan::AuthUser,
            UserPlan::Educational,
            UserPlan::Researcher,
        ] {
            assert!(
                BitMask64::from_int(plan.band()).overlaps(&guest),
                "plan {plan} must carry the guest bit"
            );
        }
    }

    #[test]
    fn test_subscription_band_clear_of_separator() {
        let profile = AccessProfile {
            terms_accepted: true,
            subscription_positions: vec![0],
            ..Default::default()
        };
        let (mask, _) = resolve(&profile);
        assert!(mask.is_set(6));
        assert!(!mask.is_set(5));
    }

    #[test]
    fn test_plan_display() {
        assert_eq!(UserPlan::Guest.to_string(), "guest");
        assert_eq!(UserPlan::AuthUser.to_string(), "auth-user");
        assert_eq!(UserPlan::Educational.to_string(), "educational");
        assert_eq!(UserPlan::Researcher.to_string(), "researcher");
    }
}
