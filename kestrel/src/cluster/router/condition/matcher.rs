use std::{collections::HashSet, net::Ipv4Addr};

use kestrel_base::Url;

/// One compiled clause of a condition rule: the value patterns the looked-up
/// parameter must match, and the ones it must not.
#[derive(Clone, Debug, Default)]
pub struct MatchPair {
    pub(crate) matches: HashSet<String>,
    pub(crate) mismatches: HashSet<String>,
}

impl MatchPair {
    /// Matching semantics:
    /// - only `matches` set: some pattern must match;
    /// - only `mismatches` set: no pattern may match;
    /// - both set: no mismatch may match, then some match must;
    /// - both empty: never matches.
    pub fn is_match(&self, value: &str, param: Option<&Url>) -> bool {
        if !self.matches.is_empty() && self.mismatches.is_empty() {
            return self
                .matches
                .iter()
                .any(|pattern| is_match_glob_pattern(pattern, value, param));
        }
        if !self.mismatches.is_empty() && self.matches.is_empty() {
            return !self
                .mismatches
                .iter()
                .any(|pattern| is_match_glob_pattern(pattern, value, param));
        }
        if !self.matches.is_empty() && !self.mismatches.is_empty() {
            // when both sides name the same value, mismatch wins
            if self
                .mismatches
                .iter()
                .any(|pattern| is_match_glob_pattern(pattern, value, param))
            {
                return false;
            }
            return self
                .matches
                .iter()
                .any(|pattern| is_match_glob_pattern(pattern, value, param));
        }
        false
    }
}

/// Glob match with a single `*` wildcard. A pattern starting with `$` is
/// substituted from the comparison URL before matching, so rules may say
/// e.g. `protocol = $protocol`. Host patterns may also be written in
/// `a.b.c.d/len` form.
pub fn is_match_glob_pattern(pattern: &str, value: &str, param: Option<&Url>) -> bool {
    let resolved;
    let mut pattern = pattern;
    if let Some(reference) = pattern.strip_prefix('$') {
        let Some(param) = param else {
            return false;
        };
        resolved = param
            .to_param_map()
            .get(reference)
            .cloned()
            .unwrap_or_default();
        pattern = &resolved;
    }

    if pattern == "*" {
        return true;
    }
    if pattern.is_empty() {
        return value.is_empty();
    }
    if pattern.contains('/') {
        return ipv4_in_block(value, pattern);
    }
    match pattern.find('*') {
        None => pattern == value,
        Some(i) if i == pattern.len() - 1 => value.starts_with(&pattern[..i]),
        Some(0) => value.ends_with(&pattern[1..]),
        Some(i) => {
            let (prefix, suffix) = (&pattern[..i], &pattern[i + 1..]);
            value.len() + 1 >= pattern.len()
                && value.starts_with(prefix)
                && value.ends_with(suffix)
        }
    }
}

fn ipv4_in_block(value: &str, block: &str) -> bool {
    let mut it = block.splitn(2, '/');
    let (Some(base), Some(len)) = (it.next(), it.next()) else {
        return false;
    };
    let (Ok(base), Ok(len), Ok(addr)) = (
        base.parse::<Ipv4Addr>(),
        len.parse::<u32>(),
        value.parse::<Ipv4Addr>(),
    ) else {
        return false;
    };
    if len > 32 {
        return false;
    }
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    (u32::from(addr) & mask) == (u32::from(base) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(matches: &[&str], mismatches: &[&str]) -> MatchPair {
        MatchPair {
            matches: matches.iter().map(|s| s.to_string()).collect(),
            mismatches: mismatches.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_star_patterns() {
        assert!(is_match_glob_pattern("10.20.153.*", "10.20.153.11", None));
        assert!(is_match_glob_pattern("*.153.11", "10.20.153.11", None));
        assert!(is_match_glob_pattern("10.*.11", "10.20.153.11", None));
        assert!(!is_match_glob_pattern("10.20.153.*", "10.20.154.11", None));
        assert!(is_match_glob_pattern("*", "anything", None));
    }

    #[test]
    fn test_dollar_reference_substitutes_from_param_url() {
        let consumer: Url = "tri://10.0.0.9:0/greet.Greeter".parse().unwrap();
        assert!(is_match_glob_pattern("$protocol", "tri", Some(&consumer)));
        assert!(!is_match_glob_pattern("$protocol", "grpc", Some(&consumer)));
        assert!(is_match_glob_pattern("$host", "10.0.0.9", Some(&consumer)));
        assert!(!is_match_glob_pattern("$protocol", "tri", None));
    }

    #[test]
    fn test_cidr_block() {
        assert!(is_match_glob_pattern("10.20.0.0/16", "10.20.153.11", None));
        assert!(!is_match_glob_pattern("10.20.0.0/16", "10.21.0.1", None));
        assert!(!is_match_glob_pattern("10.20.0.0/40", "10.20.0.1", None));
    }

    #[test]
    fn test_both_empty_never_matches() {
        assert!(!pair(&[], &[]).is_match("anything", None));
    }

    #[test]
    fn test_matches_only() {
        let p = pair(&["10.0.0.1", "10.0.0.2"], &[]);
        assert!(p.is_match("10.0.0.2", None));
        assert!(!p.is_match("10.0.0.3", None));
    }

    #[test]
    fn test_mismatches_only() {
        let p = pair(&[], &["10.0.0.1"]);
        assert!(!p.is_match("10.0.0.1", None));
        assert!(p.is_match("10.0.0.3", None));
    }

    #[test]
    fn test_mismatch_wins_over_match() {
        let p = pair(&["10.0.0.*"], &["10.0.0.1"]);
        assert!(!p.is_match("10.0.0.1", None));
        assert!(p.is_match("10.0.0.2", None));
    }
}
