//! File name sanitization.

/// Maximum number of characters kept in a sanitized name.
pub const MAX_NAME_LEN: usize = 200;

const REPLACEMENT: char = '_';

/// Turn a raw page title into a file system safe name.
///
/// Every character that is not an ASCII alphanumeric or `_` is replaced by `_`, runs of `_` are collapsed,
/// and the name is trimmed and truncated to [`MAX_NAME_LEN`] characters.
///
/// ```
/// assert_eq!(crawler::sanitize("Deep Learning: A Survey!!"), "Deep_Learning_A_Survey");
/// ```
pub fn sanitize(title: &str) -> String {
    let mut name = String::with_capacity(title.len());

    for c in title.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { REPLACEMENT };

        if c == REPLACEMENT && name.ends_with(REPLACEMENT) {
            continue;
        }

        name.push(c);
    }

    let name: String = trim(&name).chars().take(MAX_NAME_LEN).collect();

    // truncation may have exposed a trailing replacement
    trim(&name).to_owned()
}

#[inline]
fn trim(name: &str) -> &str {
    name.trim_matches(|c: char| c == REPLACEMENT || c.is_whitespace())
}
