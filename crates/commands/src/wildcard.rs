//! Wildcard expansion: `%`, `%f`, `%m` → current path, current path list,
//! marked path list, each shell-quoted and joined by spaces (§4.4 step 4).
//! Ported from `wildcards.py`'s escape-aware substitution: a wildcard is a
//! wildcard only when not immediately followed by an ASCII letter and not
//! preceded by `\`; the escape itself is consumed on substitution.

/// Supplies the path data a wildcard expands to. Kept as plain accessors
/// (not a trait) since the three wildcards are fixed by this spec, unlike
/// the original's open-ended `Wildcard` registration.
pub struct WildcardContext<'a> {
    pub current_path: Option<&'a str>,
    pub path_list: &'a [String],
    pub marked_paths: &'a [String],
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn join_quoted(paths: &[String]) -> String {
    paths.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" ")
}

/// True if the wildcard character at `idx` in `text` is a real wildcard
/// occurrence: not preceded by `\` and not immediately followed by an ASCII
/// letter (so `%f` is one wildcard, but `%foo` is not `%` followed by
/// literal `foo`).
fn is_real_wildcard(chars: &[char], idx: usize, wildcard_len: usize) -> bool {
    let preceded_by_escape = idx > 0 && chars[idx - 1] == '\\';
    let next = chars.get(idx + wildcard_len);
    let followed_by_letter = next.is_some_and(|c| c.is_ascii_alphabetic());
    !preceded_by_escape && !followed_by_letter
}

/// Expand `%`, `%f`, `%m` in `text` against `ctx`. Longer wildcards (`%f`,
/// `%m`) are matched before the bare `%` to avoid partial overlap.
pub fn expand_wildcards(text: &str, ctx: &WildcardContext<'_>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == '\\' && chars.get(i + 1) == Some(&'%') {
            out.push('%');
            i += 2;
            continue;
        }
        if chars[i] == '%' {
            if chars.get(i + 1) == Some(&'f') && is_real_wildcard(&chars, i, 2) {
                out.push_str(&join_quoted(ctx.path_list));
                i += 2;
                continue;
            }
            if chars.get(i + 1) == Some(&'m') && is_real_wildcard(&chars, i, 2) {
                out.push_str(&join_quoted(ctx.marked_paths));
                i += 2;
                continue;
            }
            if is_real_wildcard(&chars, i, 1) {
                if let Some(p) = ctx.current_path {
                    out.push_str(&shell_quote(p));
                }
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(cur: Option<&'a str>, list: &'a [String], marked: &'a [String]) -> WildcardContext<'a> {
        WildcardContext {
            current_path: cur,
            path_list: list,
            marked_paths: marked,
        }
    }

    #[test]
    fn bare_percent_expands_current_path() {
        let list = vec![];
        let c = ctx(Some("/tmp/a.png"), &list, &list);
        assert_eq!(expand_wildcards("open %", &c), "open /tmp/a.png");
    }

    #[test]
    fn percent_f_expands_path_list_quoted_and_joined() {
        let list = vec!["/tmp/a b.png".to_string(), "/tmp/c.png".to_string()];
        let marked = vec![];
        let c = ctx(None, &list, &marked);
        assert_eq!(expand_wildcards("thumbnail %f", &c), "thumbnail '/tmp/a b.png' /tmp/c.png");
    }

    #[test]
    fn percent_m_expands_marked_paths() {
        let list = vec![];
        let marked = vec!["/tmp/m.png".to_string()];
        let c = ctx(None, &list, &marked);
        assert_eq!(expand_wildcards("tag %m", &c), "tag /tmp/m.png");
    }

    #[test]
    fn wildcard_followed_by_letter_is_literal() {
        let list = vec![];
        let c = ctx(Some("/x"), &list, &list);
        assert_eq!(expand_wildcards("%foo", &c), "%foo");
    }

    #[test]
    fn escaped_wildcard_becomes_literal_percent() {
        let list = vec![];
        let c = ctx(Some("/x"), &list, &list);
        assert_eq!(expand_wildcards(r"price \%", &c), "price %");
    }

    #[test]
    fn no_overlap_between_percent_and_percent_m() {
        let list = vec![];
        let marked = vec!["/m.png".to_string()];
        let c = ctx(Some("/cur.png"), &list, &marked);
        // "%m" must resolve as the marked-list wildcard, not "%" + literal "m".
        assert_eq!(expand_wildcards("%m", &c), "/m.png");
    }
}
