//! Salvage the JSON object from raw language-model output.
//!
//! The model wraps its answer in prose, leaves trailing commas, doubles
//! separators and writes `null` for fields it could not read. The repair is a
//! narrow character-level transform tuned for one flat object of string
//! fields; it does not attempt to be a general JSON5 parser. Its quirks are
//! part of the contract (`null` becomes `"",`, commas after `true`/`false`
//! or `}` disappear).

use super::StructuringError;

/// Extract the outermost `{...}` span of `raw` and repair it.
///
/// Fails only when no object span exists. The returned text may still be
/// invalid JSON; the parser reports that case.
pub fn repair(raw: &str) -> Result<String, StructuringError> {
    let start = raw.find('{').ok_or(StructuringError::NoJsonObjectFound)?;
    let end = raw.rfind('}').ok_or(StructuringError::NoJsonObjectFound)?;
    if end < start {
        return Err(StructuringError::NoJsonObjectFound);
    }

    let compact: Vec<char> = raw[start..=end]
        .chars()
        .filter(|&c| !is_separator_space(c))
        .collect();

    // Pass 1: a comma must introduce a quoted key or value.
    let first = drop_commas(&compact, |_, next| next == Some('"'));

    // Pass 2: a comma must close a string, an array or a number.
    let second = drop_commas(&first, |prev, _| {
        matches!(prev, Some('"') | Some(']')) || prev.is_some_and(char::is_numeric)
    });

    let joined: String = second.into_iter().collect();
    Ok(joined.replace("null", "\"\","))
}

/// ASCII whitespace only; Unicode spaces such as NBSP stay inside values.
fn is_separator_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0B' | '\x0C' | '\r')
}

/// Keep every non-comma character; keep a comma only when `keep(prev, next)`
/// holds. Neighbours outside the input are `None`.
fn drop_commas(chars: &[char], keep: impl Fn(Option<char>, Option<char>) -> bool) -> Vec<char> {
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| {
            if c != ',' {
                return true;
            }
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            keep(prev, next)
        })
        .map(|(_, &c)| c)
        .collect()
}
