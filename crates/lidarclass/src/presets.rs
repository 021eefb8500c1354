//! Built-in threshold sets.
//!
//! Thresholds are tunable; the order of each list is not.

use crate::catalog::Class;
use crate::features::Feature::{Brightness, Greenness, Intensity, Redness, ZRel};
use crate::rules::{ge, gt, le, lt, Rule, RuleSet};

pub const PRESET_NAMES: [&str; 2] = ["baseline", "refined"];

/// The first-generation heuristic thresholds in their original order.
pub fn baseline() -> RuleSet {
    RuleSet {
        name: "baseline".into(),
        rules: vec![
            Rule::new("ground", Class::Ground, vec![lt(ZRel, 0.05), lt(Greenness, 0.10)]),
            Rule::new("water", Class::Water, vec![lt(ZRel, 0.03), lt(Brightness, 0.15)]),
            Rule::new(
                "vegetation_low",
                Class::LowVegetation,
                vec![gt(Greenness, 0.12), lt(ZRel, 0.08)],
            ),
            Rule::new(
                "vegetation_medium",
                Class::MediumVegetation,
                vec![gt(Greenness, 0.12), ge(ZRel, 0.08), lt(ZRel, 0.20)],
            ),
            Rule::new(
                "vegetation_high",
                Class::HighVegetation,
                vec![gt(Greenness, 0.12), ge(ZRel, 0.20)],
            ),
            Rule::new(
                "road",
                Class::Road,
                vec![lt(ZRel, 0.04), lt(Brightness, 0.35), gt(Intensity, 0.50)],
            ),
            Rule::new(
                "sidewalk",
                Class::Sidewalk,
                vec![lt(ZRel, 0.06), ge(ZRel, 0.03), gt(Brightness, 0.30), lt(Brightness, 0.50)],
            ),
            Rule::new(
                "building",
                Class::Building,
                vec![gt(ZRel, 0.15), gt(Brightness, 0.35), lt(Greenness, 0.10)],
            ),
            Rule::new(
                "bridge",
                Class::Bridge,
                vec![gt(ZRel, 0.08), lt(ZRel, 0.15), gt(Brightness, 0.30), gt(Intensity, 0.45)],
            ),
            Rule::new(
                "rail",
                Class::Rail,
                vec![lt(ZRel, 0.05), gt(Intensity, 0.60), lt(Brightness, 0.30)],
            ),
            Rule::new("pole", Class::Pole, vec![gt(ZRel, 0.30)]),
            Rule::new(
                "fence",
                Class::Fence,
                vec![gt(ZRel, 0.05), lt(ZRel, 0.10), gt(Intensity, 0.40)],
            ),
        ],
    }
}

/// Ground must not be dark (so water can match), bridge is tested before
/// building, building stops below the pole band, and signs are picked up by
/// tint or glare.
pub fn refined() -> RuleSet {
    RuleSet {
        name: "refined".into(),
        rules: vec![
            Rule::new(
                "ground",
                Class::Ground,
                vec![lt(ZRel, 0.05), lt(Greenness, 0.10), ge(Brightness, 0.25)],
            ),
            Rule::new("water", Class::Water, vec![lt(ZRel, 0.03), lt(Brightness, 0.15)]),
            Rule::new(
                "vegetation_low",
                Class::LowVegetation,
                vec![gt(Greenness, 0.12), lt(ZRel, 0.08)],
            ),
            Rule::new(
                "vegetation_medium",
                Class::MediumVegetation,
                vec![gt(Greenness, 0.12), ge(ZRel, 0.08), lt(ZRel, 0.20)],
            ),
            Rule::new(
                "vegetation_high",
                Class::HighVegetation,
                vec![gt(Greenness, 0.12), ge(ZRel, 0.20)],
            ),
            Rule::new(
                "road",
                Class::Road,
                vec![lt(ZRel, 0.04), lt(Brightness, 0.35), gt(Intensity, 0.50)],
            ),
            Rule::new(
                "bridge",
                Class::Bridge,
                vec![
                    gt(ZRel, 0.08),
                    lt(ZRel, 0.15),
                    gt(Brightness, 0.30),
                    lt(Greenness, 0.10),
                    gt(Intensity, 0.45),
                ],
            ),
            Rule::new(
                "building",
                Class::Building,
                vec![gt(ZRel, 0.15), le(ZRel, 0.85), gt(Brightness, 0.35), lt(Greenness, 0.10)],
            ),
            Rule::new(
                "sidewalk",
                Class::Sidewalk,
                vec![ge(ZRel, 0.03), lt(ZRel, 0.06), gt(Brightness, 0.30), lt(Brightness, 0.50)],
            ),
            Rule::new(
                "rail",
                Class::Rail,
                vec![lt(ZRel, 0.05), gt(Intensity, 0.60), lt(Brightness, 0.30)],
            ),
            Rule::new("pole", Class::Pole, vec![gt(ZRel, 0.85)]),
            Rule::new(
                "fence",
                Class::Fence,
                vec![gt(ZRel, 0.05), lt(ZRel, 0.10), gt(Intensity, 0.40), lt(Greenness, 0.10)],
            ),
            Rule::new(
                "sign_tinted",
                Class::Sign,
                vec![ge(ZRel, 0.10), le(ZRel, 0.30), gt(Redness, 0.15)],
            ),
            Rule::new(
                "sign_bright",
                Class::Sign,
                vec![ge(ZRel, 0.10), le(ZRel, 0.30), gt(Brightness, 0.80)],
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(rules: &RuleSet) -> Vec<&str> {
        rules.rules.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_refined_order() {
        assert_eq!(
            order(&refined()),
            vec![
                "ground",
                "water",
                "vegetation_low",
                "vegetation_medium",
                "vegetation_high",
                "road",
                "bridge",
                "building",
                "sidewalk",
                "rail",
                "pole",
                "fence",
                "sign_tinted",
                "sign_bright",
            ]
        );
    }

    #[test]
    fn test_baseline_order() {
        assert_eq!(
            order(&baseline()),
            vec![
                "ground",
                "water",
                "vegetation_low",
                "vegetation_medium",
                "vegetation_high",
                "road",
                "sidewalk",
                "building",
                "bridge",
                "rail",
                "pole",
                "fence",
            ]
        );
    }

    #[test]
    fn test_presets_resolve_by_name() {
        for name in PRESET_NAMES {
            assert_eq!(RuleSet::preset(name).unwrap().name, name);
        }
        assert!(RuleSet::preset("nope").is_none());
    }
}
