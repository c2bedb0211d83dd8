//! Detect tasks whose verification needs auxiliary test infrastructure.

/// True if `verify` mentions any of the test-runner `signatures`
/// (case-insensitive substring match).
pub fn requires_infra(verify: &str, signatures: &[String]) -> bool {
    let verify = verify.to_ascii_lowercase();
    signatures
        .iter()
        .map(|sig| sig.trim().to_ascii_lowercase())
        .any(|sig| !sig.is_empty() && verify.contains(&sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signatures() -> Vec<String> {
        vec!["playwright".to_string(), "cypress run".to_string()]
    }

    #[test]
    fn matches_known_runner() {
        assert!(requires_infra("npx Playwright test login", &signatures()));
        assert!(requires_infra("npm exec -- cypress run", &signatures()));
    }

    #[test]
    fn ignores_unit_test_commands_and_blank_signatures() {
        assert!(!requires_infra("cargo test", &signatures()));
        assert!(!requires_infra("cargo test", &[String::new()]));
    }
}
