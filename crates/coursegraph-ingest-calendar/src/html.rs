//! Calendar page structure.
//!
//! Each course is a `div.divTable` whose cells are `div`s with a class
//! starting with `divTableCell` (`divTableCell`, `divTableCell colspan-2`, ...).
//! The first plain `divTableCell` holds the header, e.g.
//! `"CS 136 LAB,LEC,TST,TUT 0.50"`.

use crate::CalendarError;
use coursegraph_dsl::{extract, CourseCode};
use scraper::{ElementRef, Html, Selector};

const CELL_CLASS: &str = "divTableCell";

/// One course block: its code and every non-empty cell text in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseBlock {
    pub code: CourseCode,
    pub header: String,
    pub cells: Vec<String>,
}

fn selector(css: &str) -> Result<Selector, CalendarError> {
    Selector::parse(css).map_err(|_| CalendarError::Selector(css.to_string()))
}

/// Whitespace-normalized visible text of an element.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_cell(el: &ElementRef<'_>) -> bool {
    el.value().classes().any(|class| class.starts_with(CELL_CLASS))
}

fn is_header_cell(el: &ElementRef<'_>) -> bool {
    el.value().classes().any(|class| class == CELL_CLASS)
}

/// Course blocks in page order. Blocks whose header carries no course code
/// are skipped.
pub fn extract_course_blocks(html: &str) -> Result<Vec<CourseBlock>, CalendarError> {
    let doc = Html::parse_document(html);
    let tables = selector("div.divTable")?;
    let divs = selector("div")?;

    let mut blocks = Vec::new();
    for table in doc.select(&tables) {
        let Some(header_cell) = table.select(&divs).find(is_header_cell) else {
            continue;
        };
        let header = element_text(header_cell);
        let Some(code) = extract(&header) else {
            tracing::debug!(header = %header, "skipping calendar block without a course code");
            continue;
        };

        let cells = table
            .select(&divs)
            .filter(is_cell)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect();

        blocks.push(CourseBlock { code, header, cells });
    }
    Ok(blocks)
}
