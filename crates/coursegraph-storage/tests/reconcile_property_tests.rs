use coursegraph_dsl::{canonicalize, CourseCode, PrereqClause, PrereqExpression, PrereqItem};
use coursegraph_storage::{
    apply, groups_equal, plan, reconcile, MemoryStore, RelationshipStore, RetryPolicy,
    StoredRelationship,
};
use proptest::prelude::*;

/// A small code pool keeps collisions (duplicates, shared prereqs) frequent.
fn code() -> impl Strategy<Value = CourseCode> {
    (prop::sample::select(vec!["CS", "MATH", "STAT"]), 100u32..106)
        .prop_map(|(dept, num)| canonicalize(&format!("{dept}{num}")).unwrap())
}

fn item() -> impl Strategy<Value = PrereqItem> {
    (code(), proptest::option::of(50u8..=90)).prop_map(|(code, min_grade)| PrereqItem { code, min_grade })
}

fn expression() -> impl Strategy<Value = PrereqExpression> {
    proptest::collection::vec(proptest::collection::vec(item(), 1..4), 0..4).prop_map(|clauses| {
        clauses
            .into_iter()
            .map(PrereqClause::from)
            .collect::<PrereqExpression>()
    })
}

fn stored_rows() -> impl Strategy<Value = Vec<StoredRelationship>> {
    proptest::collection::vec((code(), 1u32..5, proptest::option::of(50u8..=90)), 0..8).prop_map(
        |rows| {
            rows.into_iter()
                .map(|(prereq, group_index, min_grade)| StoredRelationship {
                    course: root(),
                    prereq,
                    group_index,
                    min_grade,
                })
                .collect()
        },
    )
}

fn root() -> CourseCode {
    canonicalize("CS999").unwrap()
}

fn reversed(expr: &PrereqExpression) -> PrereqExpression {
    expr.iter()
        .rev()
        .map(|clause| clause.iter().rev().cloned().collect::<PrereqClause>())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn groups_equal_is_symmetric_and_order_insensitive(a in expression(), b in expression()) {
        prop_assert!(groups_equal(&a, &a));
        prop_assert_eq!(groups_equal(&a, &b), groups_equal(&b, &a));
        prop_assert!(groups_equal(&a, &reversed(&a)));
    }

    #[test]
    fn reconcile_twice_is_a_no_op(expr in expression(), seed in stored_rows()) {
        let store = MemoryStore::with_rows(seed);
        let policy = RetryPolicy::immediate(1);

        let first = reconcile(&store, &root(), &expr, &policy).unwrap();
        prop_assert!(first.is_complete());

        let stored = store.rows_for(&root()).unwrap();
        let second = plan(&root(), &expr, &stored);
        prop_assert!(second.is_empty(), "second plan: {:?}", second);

        let report = apply(&store, &second, &policy).unwrap();
        prop_assert!(!report.changed());
    }

    #[test]
    fn plan_never_touches_other_courses(expr in expression(), seed in stored_rows()) {
        let other = canonicalize("ECE100").unwrap();
        let mut rows = seed.clone();
        rows.push(StoredRelationship {
            course: other.clone(),
            prereq: root(),
            group_index: 1,
            min_grade: None,
        });
        let plan = plan(&root(), &expr, &rows);
        prop_assert!(plan.deletes.iter().all(|key| key.course == root()));
        prop_assert!(plan.upserts.iter().all(|row| row.course == root() && row.prereq != root()));
    }
}
