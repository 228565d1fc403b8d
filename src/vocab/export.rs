use crate::vocab::VocabularyEntry;

const HEADERS: &[&str] = &["Word", "Translation", "Date", "URL"];

/// Render entries as CSV with every field quoted.
pub fn export_csv(entries: &[VocabularyEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(HEADERS.join(","));
    for e in entries {
        let row = [
            quote(&e.word),
            quote(&e.translation),
            quote(&e.date.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            quote(&e.url),
        ];
        lines.push(row.join(","));
    }
    lines.join("\n")
}

/// Sort newest first, as the management list shows them.
pub fn newest_first(entries: &mut [VocabularyEntry]) {
    entries.sort_by(|a, b| b.date.cmp(&a.date));
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
