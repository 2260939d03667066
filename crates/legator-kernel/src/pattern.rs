//! Glob matching for action keys: `*` matches any run of characters, `?`
//! matches one. Used by allow/deny lists and protection rule patterns over
//! `<tool>.<verb>` keys.

/// Match `text` against `pattern`. Matching is case-sensitive; action keys
/// are lowercased at classification time.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_at(&p, &t)
}

fn match_at(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            // Collapse consecutive stars, then try every split point.
            let rest = &p[1..];
            (0..=t.len()).any(|i| match_at(rest, &t[i..]))
        }
        Some('?') => !t.is_empty() && match_at(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && match_at(&p[1..], &t[1..]),
    }
}

/// Whether any pattern in the list matches.
pub fn any_match(patterns: &[String], text: &str) -> bool {
    patterns.iter().any(|p| glob_match(p, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(glob_match("kubectl.get", "kubectl.get"));
        assert!(!glob_match("kubectl.get", "kubectl.delete"));
    }

    #[test]
    fn trailing_star() {
        assert!(glob_match("kubectl.*", "kubectl.get"));
        assert!(glob_match("kubectl.*", "kubectl.delete"));
        assert!(!glob_match("kubectl.*", "ssh.exec"));
    }

    #[test]
    fn embedded_star() {
        assert!(glob_match("aws.s3.delete-*", "aws.s3.delete-object"));
        assert!(glob_match("aws.*.delete-*", "aws.rds.delete-db-instance"));
        assert!(!glob_match("aws.s3.delete-*", "aws.s3.list-objects"));
    }

    #[test]
    fn question_mark() {
        assert!(glob_match("sql.se?ect", "sql.select"));
        assert!(!glob_match("sql.se?ect", "sql.seect"));
    }

    #[test]
    fn star_matches_empty() {
        assert!(glob_match("*", ""));
        assert!(glob_match("kubectl.delete*", "kubectl.delete"));
    }

    #[test]
    fn any_match_over_list() {
        let patterns = vec!["kubectl.scale".to_string(), "ssh.systemctl".to_string()];
        assert!(any_match(&patterns, "ssh.systemctl"));
        assert!(!any_match(&patterns, "kubectl.delete"));
        assert!(!any_match(&[], "anything"));
    }
}
