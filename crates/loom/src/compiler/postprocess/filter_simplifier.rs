// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Collapses long OR-chains of `field.includes('keyword')` clauses into one
//! keyword-array membership test. The collapsed form never matches a clause
//! again, so a second pass changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;

static INCLUDES_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:String\(\s*(?P<wrapped>[A-Za-z_$][\w$]*(?:\??\.[A-Za-z_$][\w$]*)*)\s*\?\?\s*(?:''|"")\s*\)|(?P<bare>[A-Za-z_$][\w$]*(?:\??\.[A-Za-z_$][\w$]*)*?))(?P<lower>\??\.toLowerCase\(\))?\??\.includes\(\s*(?:'(?P<sq>(?:[^'\\]|\\.)*)'|"(?P<dq>(?:[^"\\]|\\.)*)")\s*\)$"#,
    )
    .unwrap()
});

struct IncludesClause {
    field: String,
    keyword: String,
    lowercase: bool,
}

/// Returns the collapsed condition, or `None` when it is left as it is.
pub fn simplify_condition(condition: &str, threshold: usize) -> Option<String> {
    let clauses = split_top_level_or(strip_wrapping_parens(condition.trim()));
    if clauses.len() <= threshold {
        return None;
    }

    let mut matched = Vec::new();
    let mut others = Vec::new();
    for clause in clauses {
        match parse_clause(clause) {
            Some(parsed) => matched.push(parsed),
            None => others.push(clause.trim().to_string()),
        }
    }
    if matched.len() <= threshold {
        return None;
    }

    let lowercase = matched.iter().any(|c| c.lowercase);
    let mut fields: Vec<String> = Vec::new();
    let mut keywords: Vec<String> = Vec::new();
    for clause in matched {
        if !fields.contains(&clause.field) {
            fields.push(clause.field);
        }
        let keyword = if lowercase {
            clause.keyword.to_lowercase()
        } else {
            clause.keyword
        };
        if !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
    }

    let keyword_list = keywords
        .iter()
        .map(|k| format!("'{}'", k.replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(", ");
    let field_list = fields.join(", ");
    let value = if lowercase {
        "String(f ?? '').toLowerCase()"
    } else {
        "String(f ?? '')"
    };
    let collapsed = format!("[{keyword_list}].some(k => [{field_list}].some(f => {value}.includes(k)))");

    if others.is_empty() {
        Some(collapsed)
    } else {
        others.insert(0, collapsed);
        Some(others.join(" || "))
    }
}

fn parse_clause(clause: &str) -> Option<IncludesClause> {
    let clause = strip_wrapping_parens(clause.trim());
    let captures = INCLUDES_CLAUSE.captures(clause)?;
    let field = captures
        .name("wrapped")
        .or_else(|| captures.name("bare"))?
        .as_str()
        .replace("?.", ".");
    let keyword = captures
        .name("sq")
        .or_else(|| captures.name("dq"))?
        .as_str()
        .replace("\\'", "'")
        .replace("\\\"", "\"");
    Some(IncludesClause {
        field,
        keyword,
        lowercase: captures.name("lower").is_some(),
    })
}

/// Removes parentheses that enclose the whole expression.
fn strip_wrapping_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && expr.ends_with(')') && closes_at_end(expr) {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

/// Whether the opening parenthesis at 0 is closed by the final character.
fn closes_at_end(expr: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let last = expr.len() - 1;
    for (i, ch) in expr.char_indices() {
        if let Some(q) = quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i == last;
                }
            }
            _ => {}
        }
    }
    false
}

/// Splits on `||` outside parentheses, brackets and string literals.
fn split_top_level_or(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i] as char;
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '|' if depth == 0 && bytes.get(i + 1) == Some(&b'|') => {
                parts.push(&expr[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize, template: impl Fn(usize) -> String) -> String {
        (0..n).map(template).collect::<Vec<_>>().join(" || ")
    }

    #[test]
    fn twelve_same_field_clauses_collapse_to_one_membership_test() {
        let condition = chain(12, |i| format!("item.subject.includes('x{i}')"));
        let collapsed = simplify_condition(&condition, 10).unwrap();
        assert!(collapsed.starts_with("['x0', 'x1',"));
        assert!(collapsed.ends_with("].some(k => [item.subject].some(f => String(f ?? '').includes(k)))"));
        assert!(!collapsed.contains("||"));
        assert_eq!(simplify_condition(&collapsed, 10), None);
    }

    #[test]
    fn fields_and_keywords_are_unioned_and_lowercased() {
        let condition = format!(
            "({})",
            chain(11, |i| {
                if i % 2 == 0 {
                    format!("String(item.subject ?? '').toLowerCase().includes('Urgent{i}')")
                } else {
                    format!("item.body?.toLowerCase().includes(\"late{i}\")")
                }
            })
        );
        let collapsed = simplify_condition(&condition, 10).unwrap();
        assert!(collapsed.contains("[item.subject, item.body]"));
        assert!(collapsed.contains("'urgent0'"));
        assert!(collapsed.contains("'late1'"));
        assert!(collapsed.contains("String(f ?? '').toLowerCase().includes(k)"));
    }

    #[test]
    fn short_chains_and_other_clauses_are_kept() {
        let short = chain(10, |i| format!("item.a.includes('k{i}')"));
        assert_eq!(simplify_condition(&short, 10), None);

        let mixed = format!("{} || item.priority > 3", chain(11, |i| format!("item.a.includes('k{i}')")));
        let collapsed = simplify_condition(&mixed, 10).unwrap();
        assert!(collapsed.ends_with(" || item.priority > 3"));
        assert_eq!(simplify_condition(&collapsed, 10), None);
    }

    #[test]
    fn or_inside_strings_and_groups_is_not_split() {
        assert_eq!(split_top_level_or("a.includes('x || y') || (b || c)").len(), 2);
        assert_eq!(strip_wrapping_parens("(a) || (b)"), "(a) || (b)");
        assert_eq!(strip_wrapping_parens("((a || b))"), "a || b");
    }
}
