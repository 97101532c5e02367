use std::sync::Arc;

use alert::{AlertCondition, AlertEngine, AlertHistory, Comparison, EvaluationRecord};
use async_trait::async_trait;
use market::{Quote, StoreError};
use proptest::prelude::*;

struct Discard;

#[async_trait]
impl AlertHistory for Discard {
    async fn record(&self, _: &EvaluationRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Number of false → true edges in the predicate sequence.
fn expected_fires(prices: &[f64], threshold: f64, comparison: Comparison) -> usize {
    let mut armed = true;
    let mut fires = 0;
    for &p in prices {
        let held = comparison.holds(p, threshold);
        if armed && held {
            fires += 1;
            armed = false;
        } else if !armed && !held {
            armed = true;
        }
    }
    fires
}

fn run(prices: &[f64], threshold: f64, comparison: Comparison) -> (usize, usize) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    rt.block_on(async {
        let engine = AlertEngine::new(Arc::new(Discard));
        engine
            .add_condition(AlertCondition::price("P", threshold, comparison))
            .unwrap();

        let mut fired = 0;
        let mut max_per_check = 0;
        for &p in prices {
            let n = engine.check(&Quote::new("P", p, 1.0)).await.len();
            fired += n;
            max_per_check = max_per_check.max(n);
        }
        (fired, max_per_check)
    })
}

proptest! {
    #[test]
    fn one_event_per_armed_to_triggered_transition(
        prices in prop::collection::vec(50.0f64..250.0, 0..60),
        threshold in 80.0f64..220.0,
        above in any::<bool>(),
    ) {
        let comparison = if above { Comparison::Above } else { Comparison::Below };
        let (fired, max_per_check) = run(&prices, threshold, comparison);

        prop_assert_eq!(fired, expected_fires(&prices, threshold, comparison));
        prop_assert!(max_per_check <= 1);
    }

    #[test]
    fn a_condition_that_keeps_holding_fires_once(
        prices in prop::collection::vec(151.0f64..500.0, 1..40),
    ) {
        let (fired, _) = run(&prices, 150.0, Comparison::Above);
        prop_assert_eq!(fired, 1);
    }
}
