//! Identifier case conversion used to derive default table names from entity type names.

/// Convert a single identifier from CamelCase to snake_case.
/// e.g. "ProductTag" -> "product_tag", "userId" -> "user_id"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Default table name for an entity type: snake_case name, pluralized with `s` unless it
/// already ends in one, then `_tbl`. e.g. "Tag" -> "tags_tbl", "Address" -> "address_tbl"
pub fn default_table_name(type_name: &str) -> String {
    let snake = to_snake_case(type_name);
    if snake.ends_with('s') {
        format!("{}_tbl", snake)
    } else {
        format!("{}s_tbl", snake)
    }
}
