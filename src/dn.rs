//! Distinguished-name parsing and normalization.
//!
//! Implements the subset of RFC 4514 the engine needs: splitting a DN into
//! RDNs (honoring `\`-escapes and multi-valued `+` RDNs), case-insensitive
//! equality, and extraction of a named component. The original string is
//! preserved verbatim for display, so a role configured to use the full DN
//! as its name round-trips with the exact case stored in the directory.

use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// Error returned when a string is not a syntactically valid DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid distinguished name")]
pub struct InvalidDn;

/// A single relative distinguished name, possibly multi-valued.
#[derive(Debug, Clone)]
pub struct Rdn {
    /// Attribute/value pairs as given, with escape sequences resolved in
    /// the values.
    components: Vec<(String, String)>,
}

impl Rdn {
    /// Returns the value for `attr` within this RDN, case-insensitively.
    #[must_use]
    pub fn value_of(&self, attr: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(attr))
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed distinguished name.
///
/// Equality and hashing are case-insensitive over attribute types and
/// values, matching directory semantics; `Display` reproduces the original
/// string exactly.
#[derive(Debug, Clone)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Rdn>,
    /// Lowercased, sorted-within-RDN key used for equality and hashing.
    key: Vec<Vec<(String, String)>>,
}

impl DistinguishedName {
    /// Parses a DN, failing on empty input or malformed components.
    pub fn parse(s: &str) -> Result<Self, InvalidDn> {
        if s.trim().is_empty() {
            return Err(InvalidDn);
        }

        let mut rdns = Vec::new();
        for rdn_part in split_unescaped(s, &[',', ';']) {
            let mut components = Vec::new();
            for atom in split_unescaped(&rdn_part, &['+']) {
                components.push(parse_component(&atom)?);
            }
            if components.is_empty() {
                return Err(InvalidDn);
            }
            rdns.push(Rdn { components });
        }

        let key = rdns
            .iter()
            .map(|rdn| {
                let mut parts: Vec<(String, String)> = rdn
                    .components
                    .iter()
                    .map(|(t, v)| (t.to_ascii_lowercase(), v.to_ascii_lowercase()))
                    .collect();
                parts.sort();
                parts
            })
            .collect();

        Ok(Self {
            raw: s.to_string(),
            rdns,
            key,
        })
    }

    /// Checks whether `s` parses as a DN.
    #[must_use]
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Returns the RDNs, most specific (leftmost) first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Returns the value of the first component matching `attr`, scanning
    /// from the most specific RDN.
    ///
    /// For `CN=admins,OU=groups,DC=x` and `attr = "cn"` this yields
    /// `admins`.
    #[must_use]
    pub fn first_value_of(&self, attr: &str) -> Option<&str> {
        self.rdns.iter().find_map(|rdn| rdn.value_of(attr))
    }

    /// Returns the DN exactly as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DistinguishedName {}

impl Hash for DistinguishedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Splits `s` on any of `separators`, honoring backslash escapes.
fn split_unescaped(s: &str, separators: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if separators.contains(&c) {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        // dangling backslash, keep it for the component parser to reject
        current.push('\\');
    }
    parts.push(current);
    parts
}

/// Parses one `type=value` component, resolving value escapes.
fn parse_component(atom: &str) -> Result<(String, String), InvalidDn> {
    let eq = find_unescaped_eq(atom).ok_or(InvalidDn)?;
    let attr_type = atom[..eq].trim();
    let value = atom[eq + 1..].trim();

    if !is_valid_attribute_type(attr_type) {
        return Err(InvalidDn);
    }

    Ok((attr_type.to_string(), unescape_value(value)?))
}

fn find_unescaped_eq(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' {
            return Some(i);
        }
    }
    None
}

/// Attribute types are either short names (`cn`, `sAMAccountName`) or
/// dotted-decimal OIDs.
fn is_valid_attribute_type(t: &str) -> bool {
    if t.is_empty() {
        return false;
    }
    let mut chars = t.chars();
    let first = chars.next().unwrap_or(' ');
    if first.is_ascii_alphabetic() {
        chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
    } else if first.is_ascii_digit() {
        t.chars().all(|c| c.is_ascii_digit() || c == '.')
    } else {
        false
    }
}

/// Hex escapes are byte escapes: consecutive `\XX` pairs form a UTF-8
/// byte sequence, so `\C3\A9` decodes to a single `é`.
fn unescape_value(v: &str) -> Result<String, InvalidDn> {
    let mut out = Vec::with_capacity(v.len());
    let mut buf = [0u8; 4];
    let mut chars = v.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some(h1) if h1.is_ascii_hexdigit() => {
                let h2 = chars.next().filter(char::is_ascii_hexdigit).ok_or(InvalidDn)?;
                let byte = u8::from_str_radix(&format!("{h1}{h2}"), 16).map_err(|_| InvalidDn)?;
                out.push(byte);
            }
            Some(special) => out.extend_from_slice(special.encode_utf8(&mut buf).as_bytes()),
            None => return Err(InvalidDn),
        }
    }

    String::from_utf8(out).map_err(|_| InvalidDn)
}
