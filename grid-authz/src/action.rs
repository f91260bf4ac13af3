//! The action vocabulary and pattern matching.
//!
//! Role policies name actions either exactly (`state:write`), by namespace
//! (`state:*`) or globally (`*`).

pub const STATE_CREATE: &str = "state:create";
pub const STATE_READ: &str = "state:read";
pub const STATE_WRITE: &str = "state:write";
pub const STATE_DELETE: &str = "state:delete";
pub const STATE_LOCK: &str = "state:lock";
pub const STATE_UNLOCK: &str = "state:unlock";
pub const STATE_LIST: &str = "state:list";
pub const DEPENDENCY_READ: &str = "dependency:read";
pub const DEPENDENCY_WRITE: &str = "dependency:write";
pub const STATE_OUTPUT_READ: &str = "state-output:read";
pub const STATE_OUTPUT_SCHEMA_READ: &str = "state-output:schema-read";
pub const IAM_ADMIN: &str = "iam:admin";

/// Does a role's action pattern cover the requested action?
pub fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" || pattern == action {
        return true;
    }
    if let Some(namespace) = pattern.strip_suffix(":*") {
        return action
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with(':'));
    }
    false
}

/// Does any of a role's action patterns cover the requested action?
pub fn any_action_matches(patterns: &[String], action: &str) -> bool {
    patterns.iter().any(|p| action_matches(p, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(action_matches("state:write", STATE_WRITE));
        assert!(!action_matches("state:write", STATE_READ));
    }

    #[test]
    fn global_wildcard() {
        assert!(action_matches("*", STATE_WRITE));
        assert!(action_matches("*", IAM_ADMIN));
    }

    #[test]
    fn namespace_wildcard() {
        assert!(action_matches("state:*", STATE_LOCK));
        assert!(!action_matches("state:*", DEPENDENCY_WRITE));
        // "state:*" must not cover the "state-output" namespace.
        assert!(!action_matches("state:*", STATE_OUTPUT_SCHEMA_READ));
    }

    #[test]
    fn any_match_over_a_policy_list() {
        let policy = vec!["state:read".to_string(), "dependency:*".to_string()];
        assert!(any_action_matches(&policy, STATE_READ));
        assert!(any_action_matches(&policy, DEPENDENCY_WRITE));
        assert!(!any_action_matches(&policy, STATE_WRITE));
    }
}
