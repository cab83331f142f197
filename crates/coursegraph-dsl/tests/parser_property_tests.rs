use coursegraph_dsl::{
    canonicalize, parse_heuristic, split_outside_parens, PrereqClause, PrereqExpression,
    PrereqItem,
};
use proptest::prelude::*;

fn department() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Z]{2,5}").unwrap()
}

fn number() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[1-9][0-9]{1,2}[A-Z]?").unwrap()
}

fn spelled_code() -> impl Strategy<Value = (String, String, Option<u8>)> {
    (department(), number(), proptest::option::of(0u8..=100))
}

fn clause_plan() -> impl Strategy<Value = Vec<(String, String, Option<u8>)>> {
    proptest::collection::vec(spelled_code(), 1..=4)
}

/// Render clauses as "D N [with at least G%] or ..." joined by "; ".
fn render(plan: &[Vec<(String, String, Option<u8>)>]) -> String {
    plan.iter()
        .map(|clause| {
            clause
                .iter()
                .map(|(dept, num, grade)| match grade {
                    Some(g) => format!("{dept} {num} with at least {g}%"),
                    None => format!("{dept} {num}"),
                })
                .collect::<Vec<_>>()
                .join(" or ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn expected(plan: &[Vec<(String, String, Option<u8>)>]) -> PrereqExpression {
    plan.iter()
        .map(|clause| {
            clause
                .iter()
                .map(|(dept, num, grade)| PrereqItem {
                    code: canonicalize(&format!("{dept}{num}")).unwrap(),
                    min_grade: *grade,
                })
                .collect::<PrereqClause>()
        })
        .collect()
}

fn depth_zero_contains(part: &str, sep: char) -> bool {
    let mut depth = 0usize;
    for ch in part.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => return true,
            _ => {}
        }
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn semicolon_or_prose_parses_to_its_plan(plan in proptest::collection::vec(clause_plan(), 1..=4)) {
        let parsed = parse_heuristic(&render(&plan));
        prop_assert_eq!(parsed.normalized(), expected(&plan).normalized());
    }

    #[test]
    fn split_parts_never_hold_a_top_level_separator(text in "[A-Z0-9 ;,()]{0,40}") {
        for part in split_outside_parens(&text, ';') {
            prop_assert!(!depth_zero_contains(&part, ';'), "part {:?}", part);
            prop_assert_eq!(part.trim(), part.as_str());
            prop_assert!(!part.is_empty());
        }
    }

    #[test]
    fn semicolon_split_rejoins_to_the_input(
        clauses in proptest::collection::vec("[A-Za-z0-9%]([A-Za-z0-9 %,]{0,15}[A-Za-z0-9%])?", 2..=6),
    ) {
        let text = clauses.join("; ");
        let parts = split_outside_parens(&text, ';');
        prop_assert_eq!(&parts, &clauses);
        prop_assert_eq!(parts.join("; "), text);
    }

    #[test]
    fn canonicalize_ignores_case_spacing_and_hyphens(
        dept in department(),
        num in number(),
        lower in any::<bool>(),
        hyphen in any::<bool>(),
    ) {
        let dept_spelled = if lower { dept.to_lowercase() } else { dept.clone() };
        let sep = if hyphen { "-" } else { " " };
        let spelled = format!(" {dept_spelled}{sep}{num} ");
        let code = canonicalize(&spelled).unwrap();
        prop_assert_eq!(code.as_str(), format!("{dept}{num}"));
    }

    #[test]
    fn parser_output_is_well_formed(text in "[A-Za-z0-9 ;,()%]{0,80}") {
        let expr = parse_heuristic(&text);
        for clause in &expr {
            prop_assert!(!clause.is_empty());
            let mut seen = Vec::new();
            for item in clause {
                prop_assert!(!seen.contains(&item.code));
                seen.push(item.code.clone());
                if let Some(g) = item.min_grade {
                    prop_assert!(g <= 100);
                }
            }
        }
    }
}
