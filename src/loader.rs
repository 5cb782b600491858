use tracing::debug;

use crate::error::PolicyError;
use crate::parser::parse_policies;
use crate::policy_set::PolicySet;

/// Compile policy text into a `PolicySet`.
///
/// Policies get their `@id` annotation as id, or `policy0`, `policy1`, ... by
/// position. Parse errors and duplicate ids are reported as `PolicyError`.
///
/// Example:
/// ```rust
/// use treetop_slice::compile_policy;
/// let policy_text = r#"
///     permit (principal, action, resource);
///     forbid  (principal == User::"evil", action, resource);
/// "#;
/// let set = compile_policy(policy_text).unwrap();
/// assert_eq!(set.len(), 2);
/// ```
pub fn compile_policy(text: &str) -> Result<PolicySet, PolicyError> {
    let set = PolicySet::from_policies(parse_policies(text)?)?;
    debug!(event = "Loader", phase = "Compiled", policies = set.len());
    Ok(set)
}
