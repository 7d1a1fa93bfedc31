use crate::item::{EnvQueryItem, ItemDetails, SKIPPED_ITEM_VALUE};
use crate::settings::{ClampType, ResolvedSettings};

/// Items of the option being processed, their raw records and per-test breakdown.
///
/// `items[i]` and `details[i]` always describe the same item, including after sorting.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemStore {
    pub items: Vec<EnvQueryItem>,
    pub raw_data: Vec<u8>,
    pub details: Vec<ItemDetails>,
    pub num_valid: usize,
    /// First item the current test has not processed yet.
    pub cursor: usize,
    pub found_single: bool,
}

impl ItemStore {
    pub fn reset(&mut self) {
        self.items.clear();
        self.raw_data.clear();
        self.details.clear();
        self.num_valid = 0;
        self.cursor = 0;
        self.found_single = false;
    }

    pub fn raw(&self, index: usize, value_size: usize) -> Option<&[u8]> {
        let offset = self.items.get(index)?.data_offset;
        self.raw_data.get(offset..offset + value_size)
    }

    pub fn finish_generation(&mut self, num_tests: usize) {
        self.num_valid = self.items.len();
        self.cursor = 0;
        self.found_single = false;
        self.details = (0..self.items.len())
            .map(|i| ItemDetails::new(num_tests, i))
            .collect();
    }

    pub fn discard(&mut self, index: usize, test: usize) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if item.discarded {
            return;
        }
        item.discard();
        self.num_valid = self.num_valid.saturating_sub(1);
        if let Some(details) = self.details.get_mut(index) {
            details.failed_test = Some(test);
        }
    }

    /// Truncates to the single item at `index`, keeping its score and record.
    pub fn pick_single(&mut self, index: usize) {
        let Some(item) = self.items.get(index).copied() else {
            return;
        };
        let details = self.details.get(index).cloned();
        self.items.clear();
        self.items.push(EnvQueryItem {
            discarded: false,
            ..item
        });
        self.details.clear();
        self.details.extend(details);
        self.num_valid = 1;
    }

    /// Valid items first, best score first. Stable for equal scores.
    pub fn sort_scores(&mut self) {
        let mut pairs: Vec<_> = self
            .items
            .drain(..)
            .zip(self.details.drain(..))
            .collect();
        pairs.sort_by(|a, b| a.0.rank(&b.0));
        let (items, details) = pairs.into_iter().unzip();
        self.items = items;
        self.details = details;
    }

    /// Adds the weighted, normalized result of `test` to every valid item's score.
    pub fn normalize_item_scores(&mut self, test: usize, settings: &ResolvedSettings) {
        let mut min = match settings.clamp_min {
            ClampType::None => 0.0,
            ClampType::SpecifiedValue => settings.score_clamp_min,
            ClampType::FilterThreshold => settings.float_min,
        };
        let mut max = match settings.clamp_max {
            ClampType::None => f32::MIN,
            ClampType::SpecifiedValue => settings.score_clamp_max,
            ClampType::FilterThreshold => settings.float_max,
        };

        let valid_results = self
            .items
            .iter()
            .zip(&self.details)
            .filter(|(item, _)| item.is_valid())
            .filter_map(|(_, d)| d.test_results.get(test).copied())
            .filter(|v| *v != SKIPPED_ITEM_VALUE);
        if settings.clamp_min == ClampType::None || settings.clamp_max == ClampType::None {
            for value in valid_results {
                if settings.clamp_min == ClampType::None {
                    min = min.min(value);
                }
                if settings.clamp_max == ClampType::None {
                    max = max.max(value);
                }
            }
        }
        if min == max || max < min {
            return;
        }

        let span = settings
            .reference_value
            .map(|r| (r - min).abs().max((r - max).abs()));
        for (item, details) in self.items.iter_mut().zip(self.details.iter_mut()) {
            if !item.is_valid() {
                continue;
            }
            let Some(value) = details.test_results.get_mut(test) else {
                continue;
            };
            let weighted = if *value == SKIPPED_ITEM_VALUE {
                *value = 0.0;
                0.0
            } else {
                let clamped = value.clamp(min, max);
                let normalized = match (settings.reference_value, span) {
                    (Some(reference), Some(span)) if span > 0.0 => (reference - clamped).abs() / span,
                    (Some(_), _) => 0.0,
                    _ => (clamped - min) / (max - min),
                };
                settings.scoring_factor * settings.equation.apply(normalized)
            };
            if let Some(slot) = details.weighted_scores.get_mut(test) {
                *slot = weighted;
            }
            item.score += weighted;
        }
    }

    /// Rescales the scores of the leading `num_valid` items into `[0, 1]`.
    ///
    /// Expects sorted items with every valid item in front.
    pub fn normalize_scores(&mut self) {
        let count = self.num_valid.min(self.items.len());
        let valid = &mut self.items[..count];
        let mut min = 0.0f32;
        let mut max = f32::MIN;
        for item in valid.iter() {
            min = min.min(item.score);
            max = max.max(item.score);
        }
        if min == max {
            let score = if min == 0.0 { 0.0 } else { 1.0 };
            for item in valid.iter_mut() {
                item.score = score;
            }
            return;
        }
        let range = max - min;
        for item in valid.iter_mut() {
            item.score = (item.score - min) / range;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ScoringEquation, TestSettings};
    use crate::params::QueryParams;

    fn store_with_results(results: &[f32]) -> ItemStore {
        let mut store = ItemStore::default();
        for (i, _) in results.iter().enumerate() {
            store.items.push(EnvQueryItem::new(i * 4));
        }
        store.finish_generation(1);
        for (d, r) in store.details.iter_mut().zip(results) {
            d.test_results[0] = *r;
        }
        store
    }

    fn scores(store: &ItemStore) -> Vec<f32> {
        store.items.iter().map(|i| i.score).collect()
    }

    #[test]
    fn linear_normalization_is_relative_to_zero_and_max() {
        let mut store = store_with_results(&[2.0, 4.0, 8.0]);
        let settings = TestSettings::score_only().resolve(&QueryParams::new()).expect("no params");
        store.normalize_item_scores(0, &settings);
        assert_eq!(scores(&store), vec![0.25, 0.5, 1.0]);
    }

    #[test]
    fn reference_value_scores_distance_from_it() {
        let mut store = store_with_results(&[0.0, 5.0, 10.0]);
        let settings = TestSettings::score_only()
            .with_reference(5.0)
            .with_equation(ScoringEquation::InverseLinear)
            .resolve(&QueryParams::new())
            .expect("no params");
        store.normalize_item_scores(0, &settings);
        assert_eq!(scores(&store), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn negative_factor_prefers_low_values() {
        let mut store = store_with_results(&[0.0, 10.0]);
        let settings = TestSettings::score_only()
            .with_factor(-2.0)
            .resolve(&QueryParams::new())
            .expect("no params");
        store.normalize_item_scores(0, &settings);
        assert_eq!(scores(&store), vec![0.0, -2.0]);
    }

    #[test]
    fn discarded_and_skipped_items_are_left_out() {
        let mut store = store_with_results(&[100.0, 4.0, SKIPPED_ITEM_VALUE, 8.0]);
        store.discard(0, 0);
        let settings = TestSettings::score_only().resolve(&QueryParams::new()).expect("no params");
        store.normalize_item_scores(0, &settings);
        assert_eq!(scores(&store), vec![0.0, 0.5, 0.0, 1.0]);
        assert_eq!(store.details[2].test_results[0], 0.0);
        assert_eq!(store.num_valid, 3);
    }

    #[test]
    fn pick_single_keeps_score_and_record() {
        let mut store = store_with_results(&[1.0, 2.0, 3.0]);
        store.items[1].score = 7.5;
        store.pick_single(1);
        assert_eq!(store.items.len(), 1);
        assert_eq!(store.items[0].score, 7.5);
        assert_eq!(store.items[0].data_offset, 4);
        assert_eq!(store.details[0].item_index, 1);
        assert_eq!(store.num_valid, 1);
    }

    #[test]
    fn final_normalization_handles_ties() {
        let mut store = store_with_results(&[0.0, 0.0]);
        store.items[0].score = 3.0;
        store.items[1].score = 3.0;
        store.normalize_scores();
        assert_eq!(scores(&store), vec![1.0, 1.0]);
    }
}
