//! Image reference comparison.
//!
//! Warm-pool acquisition and session reuse decide on "same image" by
//! repository and tag, ignoring any registry prefix the runtime may have
//! prepended when it resolved the pull.

/// Strip a registry prefix and normalize the tag of an image reference.
///
/// `docker.io/library/node:18-alpine`, `library/node:18-alpine` and
/// `node:18-alpine` all normalize to the same repository+tag form; a
/// reference without a tag is treated as `:latest`.
pub(crate) fn normalize_image(image: &str) -> String {
    let mut rest = image;

    // A leading path component holding '.' or ':' is a registry host.
    if let Some((head, tail)) = rest.split_once('/') {
        if head.contains('.') || head.contains(':') || head == "docker.io" {
            rest = tail;
        }
    }

    // The Docker Hub "library/" namespace is implicit for bare names.
    let rest = rest.strip_prefix("library/").unwrap_or(rest);

    // Tag separator is the last ':' after the final '/'.
    let has_tag = match rest.rfind(':') {
        Some(idx) => !rest[idx..].contains('/'),
        None => false,
    };

    if has_tag {
        rest.to_string()
    } else {
        format!("{}:latest", rest)
    }
}

/// Whether two image references name the same repository and tag.
pub fn images_match(a: &str, b: &str) -> bool {
    normalize_image(a) == normalize_image(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_prefix_ignored() {
        assert!(images_match("docker.io/library/node:18-alpine", "node:18-alpine"));
        assert!(images_match("registry.example.com:5000/python:3.9-slim", "python:3.9-slim"));
        assert!(images_match("library/alpine:latest", "alpine:latest"));
    }

    #[test]
    fn test_missing_tag_is_latest() {
        assert!(images_match("alpine", "alpine:latest"));
        assert!(!images_match("alpine", "alpine:3.19"));
    }

    #[test]
    fn test_different_repositories_do_not_match() {
        assert!(!images_match("node:18-alpine", "python:3.9-slim"));
        assert!(!images_match("node:18-alpine", "node:20-alpine"));
    }

    #[test]
    fn test_namespaced_repository_keeps_namespace() {
        assert!(images_match("ghcr.io/acme/runner:v1", "acme/runner:v1"));
        assert!(!images_match("acme/runner:v1", "runner:v1"));
    }
}
