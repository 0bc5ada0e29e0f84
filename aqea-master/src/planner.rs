//! Work-unit generation from a language plan (spec §4.1 "Work-unit
//! generation"): one unit per alphabet range, in order, with a
//! deterministic `work_id`.

use aqea_core::model::{AlphabetRange, LanguagePlan, WorkUnit};

/// Builds one [`WorkUnit`] per range in `plan.alphabet_ranges`, in
/// order, with `estimated_entries = round(total_estimated * weight)`
/// and `work_id = "{source}_{lang}_{idx:02}"`.
pub fn plan_work_units(source: &str, plan: &LanguagePlan, max_retries: u32) -> Vec<WorkUnit> {
    plan.alphabet_ranges
        .iter()
        .enumerate()
        .map(|(idx, range): (usize, &AlphabetRange)| {
            let estimated = (plan.estimated_entries as f64 * range.weight).round() as u64;
            let mut unit = WorkUnit::new(
                source,
                &plan.language_code,
                idx,
                range.start_prefix.clone(),
                range.end_prefix.clone(),
                estimated,
            );
            unit.max_retries = max_retries;
            unit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> LanguagePlan {
        LanguagePlan {
            language_code: "deu".to_string(),
            estimated_entries: 100,
            alphabet_ranges: vec![
                AlphabetRange {
                    start_prefix: "a".to_string(),
                    end_prefix: "m".to_string(),
                    weight: 0.6,
                },
                AlphabetRange {
                    start_prefix: "m".to_string(),
                    end_prefix: "z".to_string(),
                    weight: 0.4,
                },
            ],
        }
    }

    #[test]
    fn one_unit_per_range_with_deterministic_ids() {
        let units = plan_work_units("wiktionary", &sample_plan(), 3);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].work_id, "wiktionary_deu_00");
        assert_eq!(units[1].work_id, "wiktionary_deu_01");
    }

    #[test]
    fn estimated_entries_split_by_weight() {
        let units = plan_work_units("wiktionary", &sample_plan(), 3);
        assert_eq!(units[0].estimated_entries, 60);
        assert_eq!(units[1].estimated_entries, 40);
    }

    #[test]
    fn units_start_pending_with_configured_retry_budget() {
        let units = plan_work_units("wiktionary", &sample_plan(), 5);
        for unit in &units {
            assert_eq!(unit.status, aqea_core::model::WorkUnitStatus::Pending);
            assert_eq!(unit.max_retries, 5);
        }
    }
}
