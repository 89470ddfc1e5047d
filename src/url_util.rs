const PATH_DELIMITER: char = '/';

/// Joins `base` and `relative` with exactly one `/` between them.
///
/// Backslashes are normalized to `/`. When either side is empty the other is
/// returned unchanged.
pub fn combine_url(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        return base.to_owned();
    }
    if base.is_empty() {
        return relative.to_owned();
    }

    let base = base.replace('\\', "/");
    let relative = relative.replace('\\', "/");
    format!(
        "{}{PATH_DELIMITER}{}",
        base.trim_end_matches(PATH_DELIMITER),
        relative.trim_start_matches(PATH_DELIMITER)
    )
}

/// Appends an already encoded query string to `url`, using `&` when the URL
/// already carries a query and `?` otherwise.
pub fn append_query(url: &str, query: &str) -> String {
    let query = query.trim_start_matches('?');
    if query.is_empty() {
        return url.to_owned();
    }
    let separator = match url.find('?') {
        Some(index) if index > 0 => '&',
        _ => '?',
    };
    format!("{url}{separator}{query}")
}
