use std::sync::Arc;

use super::registry::Encoding;

const IDENTITY: &str = "identity";
const WILDCARD: &str = "*";

/// Outcome of negotiating one request against one asset's variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Matched(Arc<Encoding>),
    NoMatch,
}

impl Selection {
    pub fn encoding(&self) -> Option<&Arc<Encoding>> {
        match self {
            Selection::Matched(encoding) => Some(encoding),
            Selection::NoMatch => None,
        }
    }
}

/// Picks the encoding to serve from `available`, given the raw `Accept-Encoding`
/// header and the server's preference list (highest priority first).
///
/// Never fails: malformed header entries are skipped. An absent or blank header
/// selects the uncompressed variant when there is one.
pub fn select(
    accept_encoding: Option<&str>,
    available: &[Arc<Encoding>],
    preference: &[String],
) -> Selection {
    let header = match accept_encoding.map(str::trim) {
        Some(header) if !header.is_empty() => header,
        _ => return uncompressed(available),
    };

    let mut accepted = Vec::new();
    let mut refused = Vec::new();
    for (token, q) in header.split(',').filter_map(parse_entry) {
        if q > 0.0 {
            accepted.push((token, q));
        } else {
            refused.push(token);
        }
    }
    // stable: equal qualities keep header order
    accepted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut order: Vec<String> = accepted.into_iter().map(|(token, _)| token).collect();
    if !refused.iter().any(|t| t == IDENTITY) {
        order.push(Encoding::UNCOMPRESSED.to_string());
    }
    apply_preference(&mut order, preference);
    log::trace!("Negotiation order for {:?}: {:?}", header, order);

    for token in &order {
        let found = match token.as_str() {
            IDENTITY | Encoding::UNCOMPRESSED => available.iter().find(|e| e.is_uncompressed()),
            WILDCARD => wildcard(available, preference, &refused),
            _ => available.iter().find(|e| e.matches_token(token)),
        };
        if let Some(encoding) = found {
            return Selection::Matched(Arc::clone(encoding));
        }
    }
    Selection::NoMatch
}

fn uncompressed(available: &[Arc<Encoding>]) -> Selection {
    available
        .iter()
        .find(|e| e.is_uncompressed())
        .map_or(Selection::NoMatch, |e| Selection::Matched(Arc::clone(e)))
}

/// Splits one `token[;q=value]` entry. Missing or unparsable quality means 1.0.
fn parse_entry(entry: &str) -> Option<(String, f32)> {
    let mut parts = entry.split(';');
    let token = parts.next()?.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }

    let q = parts
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim().eq_ignore_ascii_case("q").then(|| parse_quality(value))
        })
        .unwrap_or(1.0);

    Some((token.to_ascii_lowercase(), q))
}

fn parse_quality(value: &str) -> f32 {
    match value.trim().parse::<f32>() {
        Ok(q) if q.is_nan() || q < 0.0 => 0.0,
        Ok(q) => q,
        Err(_) => 1.0,
    }
}

/// Moves every preferred token present in `order` to the front, applying the
/// lowest priority first so the highest ends up leading.
fn apply_preference(order: &mut Vec<String>, preference: &[String]) {
    for name in preference.iter().rev() {
        if let Some(pos) = order.iter().position(|t| t.eq_ignore_ascii_case(name)) {
            let token = order.remove(pos);
            order.insert(0, token);
        }
    }
}

fn is_refused(encoding: &Encoding, refused: &[String]) -> bool {
    refused
        .iter()
        .any(|t| encoding.matches_token(t) || (encoding.is_uncompressed() && t == IDENTITY))
}

/// `*` prefers server-preferred encodings, then compressed ones in registry order,
/// then the uncompressed file. Encodings refused with `q=0` are skipped.
fn wildcard<'a>(
    available: &'a [Arc<Encoding>],
    preference: &[String],
    refused: &[String],
) -> Option<&'a Arc<Encoding>> {
    let acceptable = || available.iter().filter(|e| !is_refused(e, refused));

    preference
        .iter()
        .find_map(|p| acceptable().find(|e| e.matches_token(p)))
        .or_else(|| {
            acceptable()
                .filter(|e| !e.is_uncompressed())
                .min_by_key(|e| e.rank())
        })
        .or_else(|| acceptable().find(|e| e.is_uncompressed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionRegistry;
    use rstest::rstest;

    fn registry() -> CompressionRegistry {
        let mut registry = CompressionRegistry::new();
        registry.register("gzip", "gz");
        registry.register("zstd", "zst");
        registry.register("br", "br");
        registry
    }

    fn available(registry: &CompressionRegistry, names: &[&str]) -> Vec<Arc<Encoding>> {
        names
            .iter()
            .map(|n| Arc::clone(registry.get(n).unwrap()))
            .collect()
    }

    fn pick(header: Option<&str>, names: &[&str], preference: &[&str]) -> Option<String> {
        let registry = registry();
        let preference: Vec<String> = preference.iter().map(|s| s.to_string()).collect();
        select(header, &available(&registry, names), &preference)
            .encoding()
            .map(|e| e.name().to_string())
    }

    #[rstest]
    #[case::higher_quality_wins(Some("gzip;q=0.5, br;q=0.8"), &["gzip", "br", "none"], &[], Some("br"))]
    #[case::preference_breaks_tie(Some("gzip;q=0.8, br;q=0.8"), &["gzip", "br", "none"], &["br"], Some("br"))]
    #[case::header_order_breaks_tie(Some("gzip;q=0.8, br;q=0.8"), &["gzip", "br", "none"], &[], Some("gzip"))]
    #[case::identity_means_uncompressed(Some("identity"), &["gzip", "none"], &[], Some("none"))]
    #[case::no_header(None, &["gzip", "br", "none"], &["br"], Some("none"))]
    #[case::blank_header(Some("  "), &["gzip", "br", "none"], &["br"], Some("none"))]
    #[case::no_header_no_uncompressed(None, &["gzip"], &[], None)]
    #[case::fallback_to_uncompressed(Some("deflate"), &["gzip", "none"], &[], Some("none"))]
    #[case::nothing_acceptable(Some("deflate"), &["gzip"], &[], None)]
    #[case::zero_quality_excluded(Some("gzip;q=0, br;q=0.1"), &["gzip", "none"], &[], Some("none"))]
    #[case::preference_beats_quality(Some("gzip, br;q=0.1"), &["gzip", "br"], &["br"], Some("br"))]
    #[case::preference_absent_from_header(Some("gzip"), &["gzip", "br"], &["br"], Some("gzip"))]
    #[case::preference_priority(Some("gzip, br, zstd"), &["gzip", "br", "zstd"], &["zstd", "br"], Some("zstd"))]
    #[case::unparsable_quality_is_one(Some("gzip;q=0.9, br;q=abc"), &["gzip", "br"], &[], Some("br"))]
    #[case::malformed_entries_skipped(Some(",,;q=1, g zip, gzip"), &["gzip", "none"], &[], Some("gzip"))]
    #[case::case_insensitive(Some("GZip"), &["gzip", "none"], &[], Some("gzip"))]
    #[case::identity_refused(Some("identity;q=0, deflate"), &["gzip", "none"], &[], None)]
    #[case::wildcard_refusal_keeps_fallback(Some("*;q=0, deflate"), &["gzip", "none"], &[], Some("none"))]
    #[case::wildcard_prefers_compressed(Some("*"), &["none", "br", "gzip"], &[], Some("gzip"))]
    #[case::wildcard_honours_preference(Some("*"), &["none", "br", "gzip"], &["br"], Some("br"))]
    #[case::wildcard_skips_refused(Some("gzip;q=0, *"), &["none", "gzip"], &[], Some("none"))]
    fn negotiation(
        #[case] header: Option<&str>,
        #[case] names: &[&str],
        #[case] preference: &[&str],
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(pick(header, names, preference).as_deref(), expected);
    }

    #[test]
    fn selection_is_deterministic() {
        let registry = registry();
        let available = available(&registry, &["none", "gzip", "br", "zstd"]);
        let preference = vec!["br".to_string()];
        let header = Some("zstd;q=0.7, gzip;q=0.7, *;q=0.1");

        let first = select(header, &available, &preference);
        let second = select(header, &available, &preference);
        assert_eq!(first, second);
        assert_eq!(first.encoding().map(|e| e.name()), Some("zstd"));
    }

    #[test]
    fn quality_parsing() {
        assert_eq!(parse_entry(" br ; q=0.25"), Some(("br".to_string(), 0.25)));
        assert_eq!(parse_entry("gzip;level=3"), Some(("gzip".to_string(), 1.0)));
        assert_eq!(parse_entry("gzip;q=-1"), Some(("gzip".to_string(), 0.0)));
        assert_eq!(parse_entry("gzip;Q=0"), Some(("gzip".to_string(), 0.0)));
        assert_eq!(parse_entry("   "), None);
    }
}
