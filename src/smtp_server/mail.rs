/// Header whose value becomes the subject of a captured message.
pub(crate) const SUBJECT_HEADER: &str = "Subject";

/// Extract the subject of a raw message, or an empty string when it has none.
pub fn parse_subject(body: &str) -> String {
    header_value(body, SUBJECT_HEADER)
        .unwrap_or_default()
        .to_string()
}

/// Return the trimmed value of the first header called `name`.
///
/// Only the header block is scanned: the first empty line ends it. Field names are
/// compared without regard to case. Folded continuation lines are not joined.
pub fn header_value<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    for line in body.lines() {
        if line.is_empty() {
            break;
        }
        if let Some((field, value)) = line.split_once(':') {
            if field.eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}
