//! Small shared helpers: name validation and `key=value` flag parsing, used
//! by the CLI surface (`commands::*`) wherever the spec's name grammar or
//! tag syntax shows up.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CinderError, CinderResult};

/// Node/profile/overlay identifiers must match `[\w\-.:]+` per spec §7.
fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w\-.:]+$").unwrap())
}

pub fn validate_name(name: &str) -> CinderResult<()> {
    if name.is_empty() || !name_re().is_match(name) {
        return Err(CinderError::invalid(format!(
            "illegal name '{name}': must match [\\w\\-.:]+"
        )));
    }
    Ok(())
}

/// Parse a `key=value` CLI argument, used by `--tag k=v`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected key=value, got '{s}'")),
    }
}

/// Expand a bracketed range pattern like `n[01-03]` into `n01`, `n02`,
/// `n03`, preserving zero-padding from the wider of the two bounds. A
/// pattern with no brackets expands to itself.
pub fn expand_pattern(pattern: &str) -> CinderResult<Vec<String>> {
    let (Some(open), Some(close)) = (pattern.find('['), pattern.find(']')) else {
        return Ok(vec![pattern.to_string()]);
    };
    if close < open {
        return Err(CinderError::invalid(format!("malformed range in '{pattern}'")));
    }
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let body = &pattern[open + 1..close];
    let (start, end) = body
        .split_once('-')
        .ok_or_else(|| CinderError::invalid(format!("malformed range in '{pattern}'")))?;
    let width = start.len().max(end.len());
    let start: u32 = start
        .parse()
        .map_err(|_| CinderError::invalid(format!("malformed range bound in '{pattern}'")))?;
    let end: u32 = end
        .parse()
        .map_err(|_| CinderError::invalid(format!("malformed range bound in '{pattern}'")))?;
    if start > end {
        return Err(CinderError::invalid(format!("range start > end in '{pattern}'")));
    }
    Ok((start..=end)
        .map(|n| format!("{prefix}{n:0width$}{suffix}", width = width))
        .collect())
}

/// Add `offset` to an IPv4 address's host bits, used by `node add --ipaddr`
/// to assign consecutive addresses across an expanded node range.
pub fn offset_ipv4(base: &str, offset: u32) -> CinderResult<String> {
    let addr: Ipv4Addr = base
        .parse()
        .map_err(|_| CinderError::invalid(format!("'{base}' is not a valid IPv4 address")))?;
    let next = u32::from(addr)
        .checked_add(offset)
        .ok_or_else(|| CinderError::invalid("ipaddr offset overflowed"))?;
    Ok(Ipv4Addr::from(next).to_string())
}

/// Validate a hardware-address string via `mac_address`'s parser, returning
/// the canonical colon-separated form.
pub fn validate_hwaddr(raw: &str) -> CinderResult<String> {
    raw.parse::<mac_address::MacAddress>()
        .map(|m| m.to_string())
        .map_err(|_| CinderError::invalid(format!("'{raw}' is not a valid hardware address")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_zero_padded_range() {
        assert_eq!(
            expand_pattern("n[01-03]").unwrap(),
            vec!["n01".to_string(), "n02".to_string(), "n03".to_string()]
        );
    }

    #[test]
    fn passthrough_without_brackets() {
        assert_eq!(expand_pattern("n01").unwrap(), vec!["n01".to_string()]);
    }

    #[test]
    fn offsets_ipv4_consecutively() {
        assert_eq!(offset_ipv4("10.10.0.1", 0).unwrap(), "10.10.0.1");
        assert_eq!(offset_ipv4("10.10.0.1", 2).unwrap(), "10.10.0.3");
    }

    #[test]
    fn rejects_illegal_name() {
        assert!(validate_name("bad name!").is_err());
        assert!(validate_name("good-name.01:x").is_ok());
    }
}
