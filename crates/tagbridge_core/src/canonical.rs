/// Normalize a URL into the key used to decide whether two saved articles are the same.
///
/// Steps run in a fixed order: strip `https://`, strip `http://`, strip `www.`, drop the
/// query string, drop the fragment, then drop one trailing `/`. Comparison is byte-exact
/// afterwards; no case folding or percent decoding happens here.
pub fn canonicalize(url: &str) -> String {
    let mut value = url;
    value = value.strip_prefix("https://").unwrap_or(value);
    value = value.strip_prefix("http://").unwrap_or(value);
    value = value.strip_prefix("www.").unwrap_or(value);
    if let Some((head, _)) = value.split_once('?') {
        value = head;
    }
    if let Some((head, _)) = value.split_once('#') {
        value = head;
    }
    value = value.strip_suffix('/').unwrap_or(value);
    value.to_string()
}
