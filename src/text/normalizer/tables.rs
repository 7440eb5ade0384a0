//! Markdown tables → descriptive sentences.

use super::markup::fence_marker;

const EXAMPLE_ROWS: usize = 3;

pub(super) fn convert_tables(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut fence: Option<char> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(marker) = fence_marker(line) {
            match fence {
                None => fence = Some(marker),
                Some(open) if open == marker => fence = None,
                Some(_) => {}
            }
            out.push(line.to_string());
            i += 1;
            continue;
        }

        let starts_table = fence.is_none()
            && is_row(line)
            && lines.get(i + 1).is_some_and(|next| is_separator(next));
        if !starts_table {
            out.push(line.to_string());
            i += 1;
            continue;
        }

        let header = cells(line);
        let mut rows = Vec::new();
        let mut j = i + 2;
        while j < lines.len() && is_row(lines[j]) {
            rows.push(cells(lines[j]));
            j += 1;
        }

        out.push(String::new());
        out.push(describe(&header, &rows));
        out.push(String::new());
        i = j;
    }

    out.join("\n")
}

fn is_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 2 && trimmed.starts_with('|') && trimmed.ends_with('|')
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

fn cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

fn column_name(header: &[String], index: usize) -> String {
    match header.get(index) {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("Column {}", index + 1),
    }
}

fn describe(header: &[String], rows: &[Vec<String>]) -> String {
    let columns: Vec<String> = (0..header.len()).map(|i| column_name(header, i)).collect();

    if rows.is_empty() {
        return format!("Table with columns: {}.", columns.join(", "));
    }

    let mut sentences = vec![
        format!(
            "Table with {} and {}.",
            plural(rows.len(), "row"),
            plural(columns.len(), "column")
        ),
        format!("Columns are: {}.", columns.join(", ")),
    ];

    for (i, row) in rows.iter().take(EXAMPLE_ROWS).enumerate() {
        let pairs: Vec<String> = row
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(|(col, value)| format!("{}: {}", column_name(header, col), value))
            .collect();
        if pairs.is_empty() {
            sentences.push(format!("Row {} is empty.", i + 1));
        } else {
            sentences.push(format!("Row {}: {}.", i + 1, pairs.join(", ")));
        }
    }

    if rows.len() > EXAMPLE_ROWS {
        sentences.push(format!("And {} more.", plural(rows.len() - EXAMPLE_ROWS, "row")));
    }

    sentences.join(" ")
}
