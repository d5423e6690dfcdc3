//! Print feature tags.

use serde::{Deserialize, Serialize};

/// Classification of a move, used for time accounting and output annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrintFeatureType {
    /// Untagged moves (priming, start/end code).
    #[default]
    NoneType,
    /// Outermost wall.
    OuterWall,
    /// Inner walls.
    InnerWall,
    /// Top/bottom skin.
    Skin,
    /// Support structure.
    Support,
    /// Skirt or brim.
    SkirtBrim,
    /// Sparse infill.
    Infill,
    /// Support infill.
    SupportInfill,
    /// Travel moves.
    MoveCombing,
    /// Retraction and un-retraction moves.
    MoveRetraction,
    /// Support roof/floor.
    SupportInterface,
    /// Prime tower.
    PrimeTower,
    /// Fiber reinforcement walls.
    Reinforcement,
}

impl PrintFeatureType {
    /// Number of feature types.
    pub const COUNT: usize = 13;

    /// All feature types in index order.
    pub const ALL: [PrintFeatureType; Self::COUNT] = [
        PrintFeatureType::NoneType,
        PrintFeatureType::OuterWall,
        PrintFeatureType::InnerWall,
        PrintFeatureType::Skin,
        PrintFeatureType::Support,
        PrintFeatureType::SkirtBrim,
        PrintFeatureType::Infill,
        PrintFeatureType::SupportInfill,
        PrintFeatureType::MoveCombing,
        PrintFeatureType::MoveRetraction,
        PrintFeatureType::SupportInterface,
        PrintFeatureType::PrimeTower,
        PrintFeatureType::Reinforcement,
    ];

    /// Stable index of this feature, usable for per-feature arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in `;TYPE:` comments, or `None` for features that are not annotated.
    pub fn type_comment(self) -> Option<&'static str> {
        match self {
            PrintFeatureType::OuterWall => Some("WALL-OUTER"),
            PrintFeatureType::InnerWall => Some("WALL-INNER"),
            PrintFeatureType::Skin => Some("SKIN"),
            PrintFeatureType::Support | PrintFeatureType::SupportInfill => Some("SUPPORT"),
            PrintFeatureType::SkirtBrim => Some("SKIRT"),
            PrintFeatureType::Infill => Some("FILL"),
            PrintFeatureType::SupportInterface => Some("SUPPORT-INTERFACE"),
            PrintFeatureType::PrimeTower => Some("PRIME-TOWER"),
            PrintFeatureType::Reinforcement => Some("FIBER"),
            PrintFeatureType::NoneType
            | PrintFeatureType::MoveCombing
            | PrintFeatureType::MoveRetraction => None,
        }
    }

    /// Whether this feature is a non-extruding move.
    pub fn is_move(self) -> bool {
        matches!(
            self,
            PrintFeatureType::MoveCombing | PrintFeatureType::MoveRetraction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_match_all() {
        for (i, feature) in PrintFeatureType::ALL.iter().enumerate() {
            assert_eq!(feature.index(), i);
        }
    }

    #[test]
    fn test_moves_have_no_type_comment() {
        for feature in PrintFeatureType::ALL {
            if feature.is_move() {
                assert!(feature.type_comment().is_none());
            }
        }
        assert_eq!(PrintFeatureType::Reinforcement.type_comment(), Some("FIBER"));
    }
}
