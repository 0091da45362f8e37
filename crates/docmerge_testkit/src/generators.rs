//! Property-based test generators using proptest.
//!
//! Provides strategies for ingestion plans. Aged plans keep generations
//! contiguous; sequence plans may leave holes between batches. Any
//! generated history is compactable.

use proptest::prelude::*;

/// Shape of one aged batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    /// Number of generations the batch declares.
    pub ages: u64,
    /// Records written for each generation; zero leaves it empty.
    pub records_per_age: usize,
    /// Payload bytes per record.
    pub payload_len: usize,
}

/// Strategy for merge keys.
pub fn merge_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9]{0,24}").expect("Invalid regex")
}

/// Strategy for payload sizes, from empty to a few hundred bytes.
pub fn payload_len_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![
        2 => 0usize..32,
        3 => 32usize..160,
        1 => 160usize..320,
    ]
}

/// Strategy for one batch.
pub fn batch_plan_strategy() -> impl Strategy<Value = BatchPlan> {
    (1u64..6, 0usize..3, payload_len_strategy()).prop_map(
        |(ages, records_per_age, payload_len)| BatchPlan {
            ages,
            records_per_age,
            payload_len,
        },
    )
}

/// Strategy for a history of consecutive batches.
pub fn batch_history_strategy(
    min_batches: usize,
    max_batches: usize,
) -> impl Strategy<Value = Vec<BatchPlan>> {
    prop::collection::vec(batch_plan_strategy(), min_batches..max_batches)
}

/// Shape of one sequence batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePlan {
    /// Sequence numbers left unused before the batch.
    pub skip: u64,
    /// Records in the batch, one per sequence number.
    pub records: usize,
    /// Payload bytes per record.
    pub payload_len: usize,
}

/// Strategy for one sequence batch; about a third of them skip ahead.
pub fn sequence_plan_strategy() -> impl Strategy<Value = SequencePlan> {
    (
        prop_oneof![2 => Just(0u64), 1 => 1u64..1000],
        1usize..12,
        payload_len_strategy(),
    )
        .prop_map(|(skip, records, payload_len)| SequencePlan {
            skip,
            records,
            payload_len,
        })
}

/// Strategy for a history of sequence batches.
pub fn sequence_history_strategy(
    min_batches: usize,
    max_batches: usize,
) -> impl Strategy<Value = Vec<SequencePlan>> {
    prop::collection::vec(sequence_plan_strategy(), min_batches..max_batches)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn batch_plans_are_bounded(plan in batch_plan_strategy()) {
            prop_assert!((1..6).contains(&plan.ages));
            prop_assert!(plan.records_per_age < 3);
            prop_assert!(plan.payload_len < 320);
        }

        #[test]
        fn sequence_plans_are_bounded(plan in sequence_plan_strategy()) {
            prop_assert!(plan.skip < 1000);
            prop_assert!((1..12).contains(&plan.records));
        }

        #[test]
        fn merge_keys_are_alphanumeric(key in merge_key_strategy()) {
            prop_assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
