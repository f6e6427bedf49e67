//! Baseline promotion levels.

use serde::{Deserialize, Serialize};

/// Build/test/release maturity of a baseline.
///
/// Totally ordered: `Rejected < Initial < Built < Tested < Released`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PromotionLevel {
    Rejected,
    #[default]
    Initial,
    Built,
    Tested,
    Released,
}

impl PromotionLevel {
    /// All levels in ascending order.
    pub const ALL: [PromotionLevel; 5] = [
        PromotionLevel::Rejected,
        PromotionLevel::Initial,
        PromotionLevel::Built,
        PromotionLevel::Tested,
        PromotionLevel::Released,
    ];

    /// Parse a level name, falling back to `Initial` for anything unknown.
    ///
    /// Matching is exact on the upper-case names; this never fails.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim() {
            "REJECTED" => PromotionLevel::Rejected,
            "INITIAL" => PromotionLevel::Initial,
            "BUILT" => PromotionLevel::Built,
            "TESTED" => PromotionLevel::Tested,
            "RELEASED" => PromotionLevel::Released,
            _ => PromotionLevel::Initial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionLevel::Rejected => "REJECTED",
            PromotionLevel::Initial => "INITIAL",
            PromotionLevel::Built => "BUILT",
            PromotionLevel::Tested => "TESTED",
            PromotionLevel::Released => "RELEASED",
        }
    }

    /// One step up. `Released` stays `Released`.
    pub fn promoted(self) -> Self {
        match self {
            PromotionLevel::Rejected => PromotionLevel::Initial,
            PromotionLevel::Initial => PromotionLevel::Built,
            PromotionLevel::Built => PromotionLevel::Tested,
            PromotionLevel::Tested | PromotionLevel::Released => PromotionLevel::Released,
        }
    }

    /// One step down. `Rejected` stays `Rejected`.
    pub fn demoted(self) -> Self {
        match self {
            PromotionLevel::Rejected | PromotionLevel::Initial => PromotionLevel::Rejected,
            PromotionLevel::Built => PromotionLevel::Initial,
            PromotionLevel::Tested => PromotionLevel::Built,
            PromotionLevel::Released => PromotionLevel::Tested,
        }
    }
}

impl std::fmt::Display for PromotionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
