use crate::app::models::DumpSection;

fn is_indented(line: &str) -> bool {
    line.starts_with([' ', '\t'])
}

fn same_title(candidate: &str, title: &str) -> bool {
    let normalize = |value: &str| value.trim().trim_end_matches(':').trim_end().to_lowercase();
    normalize(candidate) == normalize(title)
}

/// Splits a `dumpsys` blob into sections.
///
/// A section starts at the first non-blank line and at every non-indented line that follows a
/// blank line. Section lines are kept verbatim (indentation included); blank lines are dropped.
pub fn split_sections(output: &str) -> Vec<DumpSection> {
    let mut sections: Vec<DumpSection> = Vec::new();
    let mut previous_blank = true;

    for raw in output.split('\n') {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            previous_blank = true;
            continue;
        }
        let starts_section = sections.is_empty() || (previous_blank && !is_indented(line));
        previous_blank = false;

        if starts_section {
            sections.push(DumpSection {
                title: line.trim().to_string(),
                lines: Vec::new(),
            });
        } else if let Some(current) = sections.last_mut() {
            current.lines.push(line.to_string());
        }
    }
    sections
}

pub fn find_sections(output: &str) -> Vec<String> {
    split_sections(output)
        .into_iter()
        .map(|section| section.title)
        .collect()
}

/// First section whose title matches `title`, ignoring case and a trailing `:`.
pub fn find_section(output: &str, title: &str) -> Option<DumpSection> {
    split_sections(output)
        .into_iter()
        .find(|section| same_title(&section.title, title))
}
