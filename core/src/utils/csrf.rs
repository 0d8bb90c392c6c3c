use regex::Regex;

/// Builds the case-insensitive `<input name="field" ... value="token">` matcher.
/// Attribute order is assumed to be name first, then value.
pub fn csrf_pattern(field: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"(?i)<input[^>]*name=["']?{}["']?[^>]*value=["']?([^"'>]+)["']?"#,
        regex::escape(field)
    ))
}

/// First token value for `field` in `html`, if any.
pub fn extract_csrf_token(html: &str, field: &str) -> Option<String> {
    let re = csrf_pattern(field).ok()?;
    extract_with(&re, html)
}

pub fn extract_with(re: &Regex, html: &str) -> Option<String> {
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
