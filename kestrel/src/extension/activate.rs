use std::cmp::Ordering;

use kestrel_base::Url;

/// Conditions under which an implementation auto-activates, and where it
/// lands in the activated list.
#[derive(Debug, Clone, Default)]
pub struct ActivateSpec {
    /// Groups this implementation belongs to; matched against the caller's
    /// group filter.
    pub group: Vec<String>,
    /// URL parameter keys whose presence (with a non-empty value) activates
    /// the implementation. Empty means always active within the group.
    pub value: Vec<String>,
    /// Names this implementation must precede.
    pub before: Vec<String>,
    /// Names this implementation must follow.
    pub after: Vec<String>,
    pub order: i32,
}

impl ActivateSpec {
    pub fn ordered(order: i32) -> Self {
        ActivateSpec {
            order,
            ..Default::default()
        }
    }
}

pub(crate) fn is_match_group(group: Option<&str>, groups: &[String]) -> bool {
    match group {
        None => true,
        Some(group) if group.is_empty() => true,
        Some(group) => groups.iter().any(|candidate| candidate == group),
    }
}

pub(crate) fn is_active(spec: &ActivateSpec, url: &Url) -> bool {
    if spec.value.is_empty() {
        return true;
    }
    spec.value.iter().any(|key| {
        url.params().iter().any(|(param_key, param_value)| {
            (param_key == key || param_key.ends_with(&format!(".{}", key)))
                && !param_value.is_empty()
        })
    })
}

/// Ordering for activated extensions: `before`/`after` directives first,
/// then the numeric order. Ties deliberately never compare `Equal` so that
/// callers placing results into ordered set-like structures cannot collapse
/// two distinct implementations into one slot.
pub(crate) fn activate_compare(a: &(String, ActivateSpec), b: &(String, ActivateSpec)) -> Ordering {
    if a.1.before.contains(&b.0) {
        return Ordering::Less;
    }
    if a.1.after.contains(&b.0) {
        return Ordering::Greater;
    }
    if b.1.before.contains(&a.0) {
        return Ordering::Greater;
    }
    if b.1.after.contains(&a.0) {
        return Ordering::Less;
    }
    if a.1.order > b.1.order {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(order: i32) -> ActivateSpec {
        ActivateSpec::ordered(order)
    }

    #[test]
    fn test_group_matching() {
        assert!(is_match_group(None, &["consumer".to_string()]));
        assert!(is_match_group(Some(""), &[]));
        assert!(is_match_group(
            Some("consumer"),
            &["provider".to_string(), "consumer".to_string()]
        ));
        assert!(!is_match_group(Some("consumer"), &["provider".to_string()]));
        assert!(!is_match_group(Some("consumer"), &[]));
    }

    #[test]
    fn test_value_key_presence_activates() {
        let url: Url = "tri://10.0.0.1:0/s?cache=lru&greet.validation=true"
            .parse()
            .unwrap();
        let mut spec = ActivateSpec::default();
        assert!(is_active(&spec, &url));
        spec.value = vec!["cache".to_string()];
        assert!(is_active(&spec, &url));
        // method-scoped parameter also counts
        spec.value = vec!["validation".to_string()];
        assert!(is_active(&spec, &url));
        spec.value = vec!["token".to_string()];
        assert!(!is_active(&spec, &url));
    }

    #[test]
    fn test_order_ties_never_equal() {
        let a = ("a".to_string(), spec(0));
        let b = ("b".to_string(), spec(0));
        assert_ne!(activate_compare(&a, &b), Ordering::Equal);
        assert_ne!(activate_compare(&b, &a), Ordering::Equal);
    }

    #[test]
    fn test_before_after_win_over_order() {
        let mut first = spec(100);
        first.before = vec!["second".to_string()];
        let pair_a = ("first".to_string(), first);
        let pair_b = ("second".to_string(), spec(0));
        assert_eq!(activate_compare(&pair_a, &pair_b), Ordering::Less);
        assert_eq!(activate_compare(&pair_b, &pair_a), Ordering::Greater);
    }

    #[test]
    fn test_numeric_order() {
        let a = ("a".to_string(), spec(1));
        let b = ("b".to_string(), spec(2));
        assert_eq!(activate_compare(&a, &b), Ordering::Less);
        assert_eq!(activate_compare(&b, &a), Ordering::Greater);
    }
}
