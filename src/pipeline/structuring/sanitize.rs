// Clean OCR text before it is embedded in the structuring prompt.
// Strips invisible Unicode, drops lines that try to steer the model,
// normalizes whitespace and bounds the length.

/// Maximum OCR text length embedded in a prompt (characters).
pub const MAX_OCR_TEXT_LENGTH: usize = 30_000;

/// Sanitize OCR output for prompt embedding. Logs how many lines were
/// dropped, never their content.
pub fn sanitize_ocr_text(raw: &str) -> String {
    let cleaned = remove_invisible_chars(raw);
    let (kept, removed) = remove_instruction_lines(&cleaned);

    if removed > 0 {
        tracing::warn!(
            removed_lines = removed,
            "Instruction-like lines removed from OCR text"
        );
    }

    let normalized = normalize_whitespace(&kept);
    truncate_to_max_length(&normalized, MAX_OCR_TEXT_LENGTH)
}

/// Remove zero-width, bidi and control characters. Keeps space, tab and
/// line breaks so table columns survive.
fn remove_invisible_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            if matches!(*c, ' ' | '\n' | '\t' | '\r') {
                return true;
            }
            if matches!(
                *c,
                '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}'
            ) {
                return false;
            }
            !c.is_control()
        })
        .collect()
}

fn is_role_marker(lower: &str) -> bool {
    ["system:", "assistant:", "user:", "[system]", "[inst]", "[/inst]", "<<sys>>"]
        .iter()
        .any(|marker| lower.starts_with(marker))
}

fn is_override_attempt(lower: &str) -> bool {
    [
        "ignore previous instructions",
        "ignore all instructions",
        "ignore the above instructions",
        "disregard your instructions",
        "new instructions:",
    ]
    .iter()
    .any(|phrase| lower.contains(phrase))
}

/// Returns (kept_text, removed_line_count).
fn remove_instruction_lines(text: &str) -> (String, usize) {
    let mut kept = Vec::new();
    let mut removed = 0usize;

    for line in text.lines() {
        let lower = line.trim().to_lowercase();
        if is_role_marker(&lower) || is_override_attempt(&lower) {
            removed += 1;
            continue;
        }
        kept.push(line);
    }

    (kept.join("\n"), removed)
}

/// Trim line ends, collapse runs of blank lines, drop leading/trailing blanks.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut prev_blank = true;

    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !prev_blank {
                lines.push("");
            }
            prev_blank = true;
        } else {
            lines.push(line);
            prev_blank = false;
        }
    }

    while lines.last() == Some(&"") {
        lines.pop();
    }

    lines.join("\n")
}

/// Truncate to `max_chars` characters, breaking at the last whitespace.
fn truncate_to_max_length(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let head = &text[..cut];
    match head.rfind(char::is_whitespace) {
        Some(pos) => format!("{}…[TRUNCATED]", &head[..pos]),
        None => format!("{head}…[TRUNCATED]"),
    }
}
