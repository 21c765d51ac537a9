use url::Url;

use crate::eligibility::normalize;
use crate::state::PrefillCapture;

/// The embedded app's URL as loaded into the iframe.
pub struct AppDestination<'a> {
    base: &'a Url,
}

impl<'a> AppDestination<'a> {
    pub fn new(base: &'a Url) -> Self {
        Self { base }
    }

    /// Base URL plus `optly_iframe=1`, `ts` and any captured prefill values.
    /// Values are percent-encoded the way `encodeURIComponent` does it.
    pub fn build(&self, now_ms: i64, prefill: &PrefillCapture) -> String {
        let mut pairs = vec![("optly_iframe", "1".to_string()), ("ts", now_ms.to_string())];
        if let Some(postcode) = prefill.postcode.as_deref().filter(|v| !v.is_empty()) {
            pairs.push(("prefill_postcode", encode_uri_component(postcode)));
        }
        if let Some(first_name) = prefill.first_name.as_deref().filter(|v| !v.is_empty()) {
            pairs.push(("prefill_first_name", encode_uri_component(first_name)));
        }
        let appended = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut url = self.base.clone();
        let fragment = url.fragment().map(str::to_string);
        url.set_fragment(None);
        let mut out: String = url.into();
        match self.base.query() {
            None => out.push('?'),
            Some("") => {}
            Some(_) => out.push('&'),
        }
        out.push_str(&appended);
        if let Some(fragment) = fragment {
            out.push('#');
            out.push_str(&fragment);
        }
        out
    }

    /// Case-insensitive prefix match against the base URL.
    pub fn matches(&self, src: &str) -> bool {
        normalize(src).starts_with(&normalize(self.base.as_str()))
    }
}

fn encode_uri_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(char::from(byte)),
            b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')' => out.push(char::from(byte)),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://solar-form-optly-def.vercel.app/loader").expect("valid url")
    }

    #[test]
    fn builds_url_with_fixed_and_prefill_parameters() {
        let base = base();
        let prefill = PrefillCapture {
            postcode: Some("SW1A1AA".to_string()),
            first_name: Some("Mary Ann".to_string()),
            ..PrefillCapture::default()
        };

        let url = AppDestination::new(&base).build(1_700_000_000_000, &prefill);
        assert_eq!(
            url,
            "https://solar-form-optly-def.vercel.app/loader?optly_iframe=1&ts=1700000000000&prefill_postcode=SW1A1AA&prefill_first_name=Mary%20Ann"
        );
    }

    #[test]
    fn prefill_values_are_encoded_like_uri_components() {
        assert_eq!(encode_uri_component("Mary Ann"), "Mary%20Ann");
        assert_eq!(encode_uri_component("O'Neil (Jr.)"), "O'Neil%20(Jr.)");
        assert_eq!(encode_uri_component("a+b&c=d"), "a%2Bb%26c%3Dd");
        assert_eq!(encode_uri_component("Zoë"), "Zo%C3%AB");
    }

    #[test]
    fn appends_to_an_existing_query() {
        let base = Url::parse("https://app.example.com/loader?variant=b").expect("valid url");
        let url = AppDestination::new(&base).build(5, &PrefillCapture::default());
        assert_eq!(url, "https://app.example.com/loader?variant=b&optly_iframe=1&ts=5");
    }

    #[test]
    fn matches_is_a_case_insensitive_prefix_check() {
        let base = base();
        let destination = AppDestination::new(&base);
        assert!(destination.matches("HTTPS://Solar-Form-Optly-Def.vercel.app/loader?ts=1"));
        assert!(!destination.matches("https://forms.thirdparty.example/widget"));
        assert!(!destination.matches(""));
    }
}
