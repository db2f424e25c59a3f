// src/uri.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Root-locator parsing: `s3://bucket/prefix` → (bucket, key prefix).
//!
//! The key prefix ("path") is always bucket-relative and always ends with a
//! `/` separator. It is re-derived whenever the root changes (construction,
//! rename, subdir).

use anyhow::{Context, Result};

/// Strip the scheme and split `s3://bucket/prefix` into `(bucket, path)`.
///
/// The returned path is separator-terminated; a bare bucket root yields `"/"`.
pub fn parse_root(root: &str) -> Result<(String, String)> {
    let trimmed = root.strip_prefix("s3://").unwrap_or(root);
    let mut split = trimmed.splitn(2, '/');
    let bucket = split
        .next()
        .filter(|b| !b.is_empty())
        .context("root locator has no bucket component")?
        .to_owned();
    let mut path = split.next().unwrap_or("").to_owned();
    if !path.ends_with('/') {
        path.push('/');
    }
    Ok((bucket, path))
}

/// Parse an absolute object locator `s3://bucket/key` into `(bucket, key)`.
/// Unlike [`parse_root`], the key is returned verbatim (no separator added).
pub fn parse_full_url(url: &str) -> Result<(String, String)> {
    let trimmed = url.strip_prefix("s3://").unwrap_or(url);
    let mut split = trimmed.splitn(2, '/');
    let bucket = split
        .next()
        .filter(|b| !b.is_empty())
        .context("locator has no bucket component")?
        .to_owned();
    let key = split.next().unwrap_or("").to_owned();
    Ok((bucket, key))
}

/// Join a sub-path onto a root locator, collapsing duplicate separators.
pub fn join_root(root: &str, sub: &str) -> String {
    let base = root.trim_end_matches('/');
    let sub = sub.trim_start_matches('/');
    if sub.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{sub}")
    }
}

/// Listing requests must not carry the leading separator a bare-bucket path
/// holds; S3 treats `/key` and `key` as different objects.
pub fn request_prefix(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_prefix() {
        let (bucket, path) = parse_root("s3://snark-test/benchmarks").unwrap();
        assert_eq!(bucket, "snark-test");
        assert_eq!(path, "benchmarks/");
    }

    #[test]
    fn path_is_always_separator_terminated() {
        let (_, path) = parse_root("s3://bucket/a/b/").unwrap();
        assert_eq!(path, "a/b/");
        let (_, path) = parse_root("s3://bucket").unwrap();
        assert_eq!(path, "/");
    }

    #[test]
    fn scheme_is_optional() {
        let (bucket, path) = parse_root("bucket/data").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(path, "data/");
    }

    #[test]
    fn rejects_empty_bucket() {
        assert!(parse_root("s3://").is_err());
    }

    #[test]
    fn full_url_keeps_key_verbatim() {
        let (bucket, key) = parse_full_url("s3://bucket/dir/obj.bin").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "dir/obj.bin");
    }

    #[test]
    fn join_collapses_separators() {
        assert_eq!(join_root("s3://b/root/", "/sub"), "s3://b/root/sub");
        assert_eq!(join_root("s3://b/root", "sub/"), "s3://b/root/sub/");
    }

    #[test]
    fn request_prefix_strips_leading_separator() {
        assert_eq!(request_prefix("/"), "");
        assert_eq!(request_prefix("data/"), "data/");
    }
}
