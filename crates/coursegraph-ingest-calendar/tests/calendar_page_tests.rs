//! Whole-page parsing against a trimmed-down calendar page.

use coursegraph_dsl::{canonicalize, parse_heuristic, PrereqItem};
use coursegraph_ingest_calendar::{extract_course_blocks, parse_calendar};

const CS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Computer Science</title></head>
<body>
<h1>Computer Science (CS)</h1>

<div class="divTable">
  <div class="divTableRow">
    <div class="divTableCell"><strong><a name="CS240"></a>CS 240 LEC,TST,TUT 0.50</strong></div>
    <div class="divTableCell" style="text-align:right">Course ID: 004380</div>
  </div>
  <div class="divTableRow">
    <div class="divTableCell colspan-2"><strong>Data Structures and Data Management</strong></div>
  </div>
  <div class="divTableRow">
    <div class="divTableCell colspan-2"><em>Prereq: (One of CS 116, CS 136, CS 146) or (CS 114 with at least 60%; CS 115); MATH 135 or MATH 145. Antireq: CS 240E</em></div>
  </div>
</div>

<div class="divTable">
  <div class="divTableRow">
    <div class="divTableCell"><strong>CS 245 LEC,TST,TUT 0.50</strong></div>
  </div>
  <div class="divTableRow">
    <div class="divTableCell colspan-2">Logic and Computation</div>
  </div>
  <div class="divTableRow">
    <div class="divTableCell colspan-2"><em>Prerequisite(s): CS 136 with a grade of at least 60%; Honours Mathematics students only. Coreq: MATH 239</em></div>
  </div>
</div>

<div class="divTable">
  <div class="divTableRow">
    <div class="divTableCell"><strong>CS 100 LAB,LEC 0.50</strong></div>
  </div>
  <div class="divTableRow">
    <div class="divTableCell colspan-2">Introduction to Computing through Applications</div>
  </div>
</div>

<div class="divTable">
  <div class="divTableRow">
    <div class="divTableCell"><strong>Special Topics</strong></div>
  </div>
</div>
</body>
</html>"#;

#[test]
fn page_yields_one_entry_per_course() {
    let courses = parse_calendar(CS_PAGE).unwrap();
    let codes: Vec<&str> = courses.keys().map(|c| c.as_str()).collect();
    assert_eq!(codes, vec!["CS100", "CS240", "CS245"]);

    assert_eq!(
        courses[&canonicalize("CS240").unwrap()],
        "(One of CS 116, CS 136, CS 146) or (CS 114 with at least 60%; CS 115); MATH 135 or MATH 145."
    );
    assert_eq!(
        courses[&canonicalize("CS245").unwrap()],
        "CS 136 with a grade of at least 60%; Honours Mathematics students only."
    );
    assert_eq!(courses[&canonicalize("CS100").unwrap()], "");
}

#[test]
fn header_cells_keep_credit_weight_text() {
    let blocks = extract_course_blocks(CS_PAGE).unwrap();
    assert_eq!(blocks[0].header, "CS 240 LEC,TST,TUT 0.50");
    assert!(blocks[0].cells.iter().any(|c| c == "Course ID: 004380"));
}

#[test]
fn extracted_prose_feeds_the_parser() {
    let courses = parse_calendar(CS_PAGE).unwrap();
    let expr = parse_heuristic(&courses[&canonicalize("CS240").unwrap()]);
    let code = |s: &str| canonicalize(s).unwrap();

    assert_eq!(expr.len(), 3);
    assert_eq!(
        expr.clauses()[0].items(),
        &[
            PrereqItem::new(code("CS116")),
            PrereqItem::new(code("CS136")),
            PrereqItem::new(code("CS146")),
            PrereqItem::with_grade(code("CS114"), 60),
        ]
    );
    assert_eq!(
        expr.clauses()[2].items(),
        &[PrereqItem::new(code("MATH135")), PrereqItem::new(code("MATH145"))]
    );
}
