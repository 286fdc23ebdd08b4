/// Default width of a chunk preview in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 160;

/// Collapse `text` onto one line and cut it to at most `max_chars`
/// characters, appending `...` when something was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }

    let mut cut: String = flat.chars().take(max_chars).collect();
    if let Some(space) = cut.rfind(' ')
        && space > max_chars / 2
    {
        cut.truncate(space);
    }
    cut.push_str("...");
    cut
}

/// Format a byte count with a binary unit suffix.
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Indent every line of `text` by `width` spaces.
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
