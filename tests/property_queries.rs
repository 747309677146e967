//! Property tests for vector ranking and filter evaluation.

mod common;

use proptest::prelude::*;
use serde_json::json;

use common::row;
use dbweave::{DistanceMetric, Filter, Row, VectorSearchQuery};

const DIM: usize = 3;

fn component() -> impl Strategy<Value = f64> {
    -10.0..10.0f64
}

fn vector() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(component(), DIM)
}

fn candidates() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec((vector(), 0..3u8), 0..40).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (embedding, group))| {
                row(json!({
                    "id": i,
                    "group": format!("g{group}"),
                    "embedding": embedding,
                }))
            })
            .collect()
    })
}

fn metric() -> impl Strategy<Value = DistanceMetric> {
    prop_oneof![Just(DistanceMetric::Cosine), Just(DistanceMetric::L2)]
}

proptest! {
    #[test]
    fn ranked_rows_are_nearest_first(
        rows in candidates(),
        query in vector(),
        k in 1..10usize,
        metric in metric(),
    ) {
        let search = VectorSearchQuery::new("places", "embedding", query, k).with_metric(metric);
        let ranked = search.rank(rows.clone());

        prop_assert!(ranked.len() <= k);
        let distances: Vec<f64> = ranked
            .iter()
            .map(|r| r["distance"].as_f64().unwrap())
            .collect();
        prop_assert!(distances.windows(2).all(|w| w[0] <= w[1]));

        // Nothing closer was left out.
        if ranked.len() == k {
            let worst = distances[k - 1];
            let closer = rows
                .iter()
                .filter_map(|r| {
                    let stored: Vec<f64> = r["embedding"]
                        .as_array()?
                        .iter()
                        .filter_map(serde_json::Value::as_f64)
                        .collect();
                    metric.distance(&search.query_vector, &stored)
                })
                .filter(|d| *d < worst)
                .count();
            prop_assert!(closer < k);
        }
    }

    #[test]
    fn ranked_rows_satisfy_filters_and_similarity_floor(
        rows in candidates(),
        query in vector(),
        k in 1..10usize,
        floor in 0.05..0.95f64,
        metric in metric(),
    ) {
        let search = VectorSearchQuery::new("places", "embedding", query, k)
            .with_metric(metric)
            .with_threshold(floor)
            .with_filter(Filter::eq("group", "g1"));

        for r in search.rank(rows) {
            prop_assert_eq!(&r["group"], &json!("g1"));
            let similarity = r["similarity"].as_f64().unwrap();
            prop_assert!(similarity >= floor - 1e-9);
        }
    }
}

proptest! {
    #[test]
    fn range_filters_partition_numeric_rows(value in -1_000i64..1_000, bound in -1_000i64..1_000) {
        let r = row(json!({"v": value}));

        prop_assert_ne!(Filter::gt("v", bound).matches(&r), Filter::lte("v", bound).matches(&r));
        prop_assert_ne!(Filter::lt("v", bound).matches(&r), Filter::gte("v", bound).matches(&r));
        prop_assert_ne!(Filter::eq("v", bound).matches(&r), Filter::neq("v", bound).matches(&r));
    }

    #[test]
    fn in_filter_matches_iff_some_element_equals(
        value in 0i64..20,
        options in prop::collection::vec(0i64..20, 0..6),
    ) {
        let r = row(json!({"v": value}));
        let listed = options.iter().map(|o| json!(o)).collect();

        prop_assert_eq!(
            Filter::one_of("v", listed).matches(&r),
            options.contains(&value)
        );
    }

    #[test]
    fn like_without_wildcards_is_ascii_case_insensitive_equality(
        text in "[a-cA-C]{0,6}",
        pattern in "[a-cA-C]{0,6}",
    ) {
        let r = row(json!({"name": text.clone()}));
        prop_assert_eq!(
            Filter::like("name", pattern.clone()).matches(&r),
            text.eq_ignore_ascii_case(&pattern)
        );
    }
}
