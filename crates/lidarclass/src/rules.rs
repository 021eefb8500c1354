//! Priority-ordered rule classifier.
//!
//! A rule set is an ordered list of `(conditions, class)` pairs. Every label
//! starts as Unclassified; a rule writes its class where all of its
//! conditions hold and the label is still Unclassified, so the list order is
//! the tie-break policy.

use crate::catalog::Class;
use crate::chunk::ChunkView;
use crate::counts::ClassCounts;
use crate::features::{Feature, FeatureColumns};
use crate::stats::GlobalStats;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::presets::{baseline, refined, PRESET_NAMES};

pub const UNCLASSIFIED: u8 = Class::Unclassified as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub feature: Feature,
    pub op: Cmp,
    pub value: f32,
}

impl Condition {
    #[inline]
    pub fn test(&self, v: f32) -> bool {
        match self.op {
            Cmp::Lt => v < self.value,
            Cmp::Le => v <= self.value,
            Cmp::Gt => v > self.value,
            Cmp::Ge => v >= self.value,
        }
    }
}

#[inline]
pub fn lt(feature: Feature, value: f32) -> Condition {
    Condition { feature, op: Cmp::Lt, value }
}

#[inline]
pub fn le(feature: Feature, value: f32) -> Condition {
    Condition { feature, op: Cmp::Le, value }
}

#[inline]
pub fn gt(feature: Feature, value: f32) -> Condition {
    Condition { feature, op: Cmp::Gt, value }
}

#[inline]
pub fn ge(feature: Feature, value: f32) -> Condition {
    Condition { feature, op: Cmp::Ge, value }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub class: Class,
    /// Conjunction; an empty list matches every still-unclassified point.
    pub when: Vec<Condition>,
}

impl Rule {
    pub fn new(name: &str, class: Class, when: Vec<Condition>) -> Self {
        Self {
            name: name.to_owned(),
            class,
            when,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Built-in threshold set by name (`baseline`, `refined`).
    pub fn preset(name: &str) -> Option<RuleSet> {
        match name {
            "baseline" => Some(baseline()),
            "refined" => Some(refined()),
            _ => None,
        }
    }

    pub fn from_json_str(s: &str) -> Result<RuleSet, String> {
        let rules: RuleSet = serde_json::from_str(s).map_err(|e| format!("bad rule set: {}", e))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<RuleSet, String> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read rule set {}: {}", path.display(), e))?;
        Self::from_json_str(&text)
    }

    /// A rule may not assign Unclassified (it would be a no-op that hides an
    /// ordering mistake), and thresholds must be finite.
    pub fn validate(&self) -> Result<(), String> {
        if self.rules.is_empty() {
            return Err(format!("rule set '{}' has no rules", self.name));
        }

        for rule in &self.rules {
            if rule.class == Class::Unclassified {
                return Err(format!("rule '{}' assigns Unclassified", rule.name));
            }

            if let Some(c) = rule.when.iter().find(|c| !c.value.is_finite()) {
                return Err(format!(
                    "rule '{}' has a non-finite threshold on {:?}",
                    rule.name, c.feature
                ));
            }
        }

        Ok(())
    }

    /// Every label this rule set can emit, Unclassified included.
    pub fn emitted_classes(&self) -> Vec<Class> {
        let mut out = vec![Class::Unclassified];
        for rule in &self.rules {
            if !out.contains(&rule.class) {
                out.push(rule.class);
            }
        }
        out
    }
}

/// Pure chunk classifier bound to one file's global stats.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    rules: RuleSet,
    stats: GlobalStats,
    block_size: Option<usize>,
}

impl RuleClassifier {
    pub fn new(rules: RuleSet, stats: GlobalStats) -> Self {
        Self {
            rules,
            stats,
            block_size: None,
        }
    }

    /// Classify chunks as independent blocks of `block_size` points on the
    /// rayon pool. Labels do not depend on the block size.
    pub fn with_parallel_blocks(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size.max(1));
        self
    }

    #[inline]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[inline]
    pub fn stats(&self) -> &GlobalStats {
        &self.stats
    }

    /// Labels for `view`, with their counts added to `counts`.
    pub fn classify(&self, view: ChunkView<'_>, counts: &mut ClassCounts) -> Vec<u8> {
        let mut labels = vec![UNCLASSIFIED; view.len()];

        match self.block_size {
            Some(block) if view.len() > block => {
                let chunk_counts = labels
                    .par_chunks_mut(block)
                    .enumerate()
                    .map(|(index, out)| {
                        self.classify_into(view.slice(index * block, out.len()), out);
                        ClassCounts::from_labels(out)
                    })
                    .reduce(ClassCounts::new, |mut a, b| {
                        a.merge(&b);
                        a
                    });
                counts.merge(&chunk_counts);
            }
            _ => {
                self.classify_into(view, &mut labels);
                counts.add_labels(&labels);
            }
        }

        labels
    }

    fn classify_into(&self, view: ChunkView<'_>, out: &mut [u8]) {
        debug_assert_eq!(view.len(), out.len());

        let features = FeatureColumns::compute(view, &self.stats);
        let mut mask = vec![false; out.len()];

        out.fill(UNCLASSIFIED);

        for rule in &self.rules.rules {
            for (m, &label) in mask.iter_mut().zip(out.iter()) {
                *m = label == UNCLASSIFIED;
            }

            for condition in &rule.when {
                let column = features.column(condition.feature);
                let t = condition.value;
                match condition.op {
                    Cmp::Lt => narrow(&mut mask, column, |v| v < t),
                    Cmp::Le => narrow(&mut mask, column, |v| v <= t),
                    Cmp::Gt => narrow(&mut mask, column, |v| v > t),
                    Cmp::Ge => narrow(&mut mask, column, |v| v >= t),
                }
            }

            let class = rule.class.id();
            for (label, &m) in out.iter_mut().zip(mask.iter()) {
                if m {
                    *label = class;
                }
            }
        }
    }
}

#[inline(always)]
fn narrow(mask: &mut [bool], column: &[f32], keep: impl Fn(f32) -> bool) {
    for (m, &v) in mask.iter_mut().zip(column) {
        *m &= keep(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MID: u16 = 32_768;

    fn stats(z_min: f64, z_max: f64, total: u64) -> GlobalStats {
        GlobalStats {
            z_min,
            z_max,
            z_range: z_max - z_min,
            total_point_count: total,
            sampled: total,
        }
    }

    fn classify(rules: RuleSet, z: &[f64], intensity: &[u16], color: &[[u16; 3]]) -> (Vec<u8>, ClassCounts) {
        let (z_min, z_max) = z.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        let classifier = RuleClassifier::new(rules, stats(z_min, z_max, z.len() as u64));
        let mut counts = ClassCounts::new();
        let labels = classifier.classify(ChunkView::new(z, intensity, color), &mut counts);
        (labels, counts)
    }

    #[test]
    fn test_ten_point_scenario() {
        let z = [0.0, 0.0, 0.0, 1.0, 1.0, 5.0, 5.0, 9.0, 9.0, 9.0];
        let intensity = [MID; 10];
        let color = [[MID; 3]; 10];

        let (labels, counts) = classify(refined(), &z, &intensity, &color);

        let ground = Class::Ground.id();
        let pole = Class::Pole.id();
        assert_eq!(&labels[0..3], &[ground; 3]);
        assert_eq!(&labels[7..10], &[pole; 3]);

        // z_rel 0.11: the bridge band is the first to match
        assert_eq!(&labels[3..5], &[Class::Bridge.id(); 2]);
        // z_rel 0.56: building
        assert_eq!(&labels[5..7], &[Class::Building.id(); 2]);

        assert_eq!(counts.total(), 10);
        assert_eq!(counts.get(ground), 3);
        assert_eq!(counts.get(pole), 3);
    }

    #[test]
    fn test_earlier_rule_wins() {
        let rules = RuleSet {
            name: "overlap".into(),
            rules: vec![
                Rule::new("low", Class::Ground, vec![lt(Feature::ZRel, 0.5)]),
                Rule::new("everything", Class::Building, vec![]),
            ],
        };
        let z = [0.0, 1.0, 10.0];
        let (labels, _) = classify(rules, &z, &[0; 3], &[[0; 3]; 3]);

        assert_eq!(labels, vec![Class::Ground.id(), Class::Ground.id(), Class::Building.id()]);
    }

    #[test]
    fn test_unmatched_stays_unclassified() {
        let rules = RuleSet {
            name: "high only".into(),
            rules: vec![Rule::new("high", Class::Pole, vec![gt(Feature::ZRel, 0.9)])],
        };
        let z = [0.0, 5.0, 10.0];
        let (labels, counts) = classify(rules, &z, &[0; 3], &[[0; 3]; 3]);

        assert_eq!(labels, vec![UNCLASSIFIED, UNCLASSIFIED, Class::Pole.id()]);
        assert_eq!(counts.get(UNCLASSIFIED), 2);
    }

    #[test]
    fn test_flat_chunk_does_not_panic() {
        let z = [7.0; 8];
        let (labels, counts) = classify(refined(), &z, &[MID; 8], &[[MID; 3]; 8]);
        assert_eq!(labels.len(), 8);
        assert_eq!(counts.total(), 8);
        // z_rel is 0 everywhere -> low, grey, bright enough for ground
        assert!(labels.iter().all(|&l| l == Class::Ground.id()));
    }

    #[test]
    fn test_green_points_become_vegetation_tiers() {
        let z = [0.0, 0.5, 1.5, 9.0, 10.0];
        let green = [10_000, 50_000, 10_000];
        let (labels, _) = classify(refined(), &z, &[0; 5], &[green; 5]);

        assert_eq!(labels[1], Class::LowVegetation.id());
        assert_eq!(labels[2], Class::MediumVegetation.id());
        assert_eq!(labels[3], Class::HighVegetation.id());
    }

    #[test]
    fn test_parallel_blocks_match_sequential() {
        let n = 10_000;
        let z: Vec<f64> = (0..n).map(|i| ((i * 37) % 101) as f64 * 0.3).collect();
        let intensity: Vec<u16> = (0..n).map(|i| ((i * 7919) % 65_536) as u16).collect();
        let color: Vec<[u16; 3]> = (0..n)
            .map(|i| {
                [
                    ((i * 131) % 65_536) as u16,
                    ((i * 17) % 65_536) as u16,
                    ((i * 251) % 65_536) as u16,
                ]
            })
            .collect();
        let st = stats(0.0, 30.0, n as u64);
        let view = ChunkView::new(&z, &intensity, &color);

        for rules in [baseline(), refined()] {
            let mut seq_counts = ClassCounts::new();
            let sequential = RuleClassifier::new(rules.clone(), st).classify(view, &mut seq_counts);

            for block in [1, 3, 256, 4096] {
                let mut par_counts = ClassCounts::new();
                let parallel = RuleClassifier::new(rules.clone(), st)
                    .with_parallel_blocks(block)
                    .classify(view, &mut par_counts);
                assert_eq!(parallel, sequential, "{} block {}", rules.name, block);
                assert_eq!(par_counts, seq_counts);
            }
        }
    }

    #[test]
    fn test_presets_emit_catalog_ids_only() {
        let z: Vec<f64> = (0..500).map(|i| i as f64 * 0.1).collect();
        let intensity: Vec<u16> = (0..500).map(|i| (i * 131 % 65_536) as u16).collect();
        let color: Vec<[u16; 3]> = (0..500)
            .map(|i| [(i * 97 % 65_536) as u16, (i * 389 % 65_536) as u16, (i * 13 % 65_536) as u16])
            .collect();

        for name in PRESET_NAMES {
            let rules = RuleSet::preset(name).unwrap();
            rules.validate().unwrap();
            let allowed = rules.emitted_classes();
            let (labels, _) = classify(rules, &z, &intensity, &color);
            for label in labels {
                let class = Class::from_id(label).expect("label outside catalog");
                assert!(allowed.contains(&class));
            }
        }
    }

    #[test]
    fn test_rule_set_json() {
        let json = r#"{
            "name": "custom",
            "rules": [
                { "name": "floor", "class": "ground",
                  "when": [ { "feature": "z_rel", "op": "lt", "value": 0.1 } ] }
            ]
        }"#;
        let rules = RuleSet::from_json_str(json).unwrap();
        assert_eq!(rules.rules[0].class, Class::Ground);
        assert_eq!(rules.rules[0].when[0], lt(Feature::ZRel, 0.1));

        let round = serde_json::to_string(&refined()).unwrap();
        assert_eq!(RuleSet::from_json_str(&round).unwrap(), refined());
    }

    #[test]
    fn test_validate_rejects_unclassified_target() {
        let json = r#"{ "name": "bad", "rules": [ { "name": "x", "class": "unclassified", "when": [] } ] }"#;
        assert!(RuleSet::from_json_str(json).is_err());

        let json = r#"{ "name": "bad", "rules": [ { "name": "x", "class": "martian", "when": [] } ] }"#;
        assert!(RuleSet::from_json_str(json).is_err());
    }
}
