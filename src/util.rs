//! Wildcard pattern matching.
//!
//! Skip-user lists, nested-role exclusion filters and the custom-attribute
//! allow-list all use the same pattern syntax: `*` matches any run of
//! characters (including none), `?` matches exactly one character, and
//! everything else matches literally. Matching is case sensitive.

/// Checks whether `candidate` matches the wildcard `pattern`.
#[must_use]
pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();

    // Iterative matcher with backtracking over the last '*'.
    let (mut pi, mut ci) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ci < c.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == c[ci]) {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ci));
            pi += 1;
        } else if let Some((spi, sci)) = star {
            pi = spi + 1;
            ci = sci + 1;
            star = Some((spi, sci + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}

/// Checks whether `candidate` matches any of the given wildcard patterns.
#[must_use]
pub fn wildcard_match_any<S: AsRef<str>>(patterns: &[S], candidate: &str) -> bool {
    patterns
        .iter()
        .any(|p| wildcard_match(p.as_ref(), candidate))
}
