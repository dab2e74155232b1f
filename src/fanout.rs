//! Query fan-out generation.
//!
//! The source truncates every response at a fixed number of matches, so a
//! single query for a prolific performer never returns the whole catalog.
//! The fan-out recovers the rest by re-querying with overlapping fragments of
//! the name and with the alternate listing modes. Later variants are issued
//! even when earlier ones came back empty: the cap means an empty response
//! proves nothing.

use crate::config::FanoutConfig;
use crate::error::HarvestError;
use crate::models::{LookupMode, Variant};

/// Ordered, finite variant sequence for one (target, partition) pair.
/// Consumed once; build a new plan to replay it.
#[derive(Debug)]
pub struct PartitionPlan {
    partition: String,
    variants: std::vec::IntoIter<Variant>,
}

impl PartitionPlan {
    pub fn partition_id(&self) -> &str {
        &self.partition
    }
}

impl Iterator for PartitionPlan {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        self.variants.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.variants.size_hint()
    }
}

impl ExactSizeIterator for PartitionPlan {}

/// Build the variant sequence for `target` in `partition`:
/// 1. the exact name, default mode;
/// 2. overlapping name fragments, default mode;
/// 3. the exact name under each alternate mode.
pub fn plan(
    target: &str,
    partition: &str,
    config: &FanoutConfig,
) -> Result<PartitionPlan, HarvestError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(HarvestError::InvalidInput(
            "target performer name is empty".to_string(),
        ));
    }

    let mut variants = vec![Variant::new(target, LookupMode::Default)];

    variants.extend(
        fragments(target, config.fragment_width, config.min_fragment_len)
            .into_iter()
            .map(|f| Variant::new(f, LookupMode::Default)),
    );

    let mut modes: Vec<LookupMode> = Vec::with_capacity(config.alternate_modes.len());
    for &mode in &config.alternate_modes {
        if mode != LookupMode::Default && !modes.contains(&mode) {
            modes.push(mode);
        }
    }
    variants.extend(modes.into_iter().map(|m| Variant::new(target, m)));

    Ok(PartitionPlan {
        partition: partition.to_string(),
        variants: variants.into_iter(),
    })
}

/// Overlapping fragments of `name`, `width` characters each, stepping one
/// character at a time. Tail fragments run to the end of the name and are
/// dropped when shorter than `min_len`. A name no longer than `width` yields
/// itself as its only fragment. Repeated fragments are emitted once.
pub fn fragments(name: &str, width: usize, min_len: usize) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let n = chars.len();
    let width = width.max(1);

    if n <= width {
        return if n >= min_len && n > 0 {
            vec![name.to_string()]
        } else {
            Vec::new()
        };
    }

    let mut out: Vec<String> = Vec::with_capacity(n);
    for i in 0..n {
        let end = (i + width).min(n);
        if end - i < min_len {
            continue;
        }
        let fragment: String = chars[i..end].iter().collect();
        if !out.contains(&fragment) {
            out.push(fragment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries(plan: PartitionPlan) -> Vec<(String, LookupMode)> {
        plan.map(|v| (v.query, v.mode)).collect()
    }

    #[test]
    fn test_plan_order_three_char_name() {
        let plan = plan("周杰倫", "錢櫃", &FanoutConfig::default()).unwrap();
        assert_eq!(plan.partition_id(), "錢櫃");
        assert_eq!(plan.len(), 5);
        assert_eq!(
            queries(plan),
            vec![
                ("周杰倫".to_string(), LookupMode::Default),
                ("周杰".to_string(), LookupMode::Default),
                ("杰倫".to_string(), LookupMode::Default),
                ("周杰倫".to_string(), LookupMode::NewArrivals),
                ("周杰倫".to_string(), LookupMode::Popular),
            ]
        );
    }

    #[test]
    fn test_two_char_name_has_single_self_fragment() {
        let plan = plan("持修", "P1", &FanoutConfig::default()).unwrap();
        let q = queries(plan);
        let fragment_variants: Vec<_> = q[1..]
            .iter()
            .filter(|(_, m)| *m == LookupMode::Default)
            .collect();
        assert_eq!(fragment_variants.len(), 1);
        assert_eq!(fragment_variants[0].0, "持修");
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn test_odd_length_tail_respects_min_len() {
        assert_eq!(fragments("ABCDE", 2, 2), vec!["AB", "BC", "CD", "DE"]);
        assert_eq!(fragments("ABCDE", 2, 1), vec!["AB", "BC", "CD", "DE", "E"]);
        assert_eq!(fragments("ABCDE", 3, 2), vec!["ABC", "BCD", "CDE", "DE"]);
    }

    #[test]
    fn test_fragments_short_and_repeated() {
        assert_eq!(fragments("A", 2, 2), Vec::<String>::new());
        assert_eq!(fragments("A", 2, 1), vec!["A"]);
        assert_eq!(fragments("AAAA", 2, 2), vec!["AA"]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let config = FanoutConfig::default();
        let a = queries(plan("五月天樂團", "P1", &config).unwrap());
        let b = queries(plan("五月天樂團", "P1", &config).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_alternate_modes_skip_default_and_duplicates() {
        let config = FanoutConfig {
            alternate_modes: vec![
                LookupMode::Default,
                LookupMode::Popular,
                LookupMode::Popular,
            ],
            ..FanoutConfig::default()
        };
        let q = queries(plan("AB", "P1", &config).unwrap());
        assert_eq!(
            q,
            vec![
                ("AB".to_string(), LookupMode::Default),
                ("AB".to_string(), LookupMode::Default),
                ("AB".to_string(), LookupMode::Popular),
            ]
        );
    }

    #[test]
    fn test_empty_target_rejected() {
        assert!(matches!(
            plan("   ", "P1", &FanoutConfig::default()),
            Err(HarvestError::InvalidInput(_))
        ));
    }
}
