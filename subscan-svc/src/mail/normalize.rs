//! Message surface normalization
//!
//! Body text arrives in every encoding quirk a mailer can produce. The
//! pipeline sees one canonical form: NBSP collapsed to space, tabs and CR
//! stripped, space runs deduplicated, newlines preserved (the platform
//! extractors are line-based).

use regex::Regex;
use std::sync::LazyLock;

use crate::mail::EmailMeta;
use crate::resolve::domains::domain_of_email;
use crate::resolve::EmailSurface;

/// Cap on extracted link domains per message
const LINK_DOMAIN_CAP: usize = 200;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://([^/\s"'<>)\]]+)"#).unwrap());

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ ]{2,}").unwrap());

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize a body into canonical whitespace form
pub fn normalize_body(raw: &str) -> String {
    let replaced = raw
        .replace('\u{a0}', " ")
        .replace('\r', "")
        .replace('\t', " ");
    let spaced = SPACE_RUN.replace_all(&replaced, " ");
    let collapsed = BLANK_RUN.replace_all(&spaced, "\n\n");
    collapsed.trim().to_string()
}

/// Reduce HTML to searchable text: drop tags, decode the common entities
pub fn html_to_text(html: &str) -> String {
    let no_tags = TAG.replace_all(html, " ");
    let decoded = no_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    normalize_body(&decoded)
}

/// Extract unique link domains from text and html, order-preserving
pub fn extract_link_domains(text: &str, html: &str) -> Vec<String> {
    let mut domains = Vec::new();
    for source in [text, html] {
        for caps in URL.captures_iter(source) {
            let host = caps[1]
                .split(':')
                .next()
                .unwrap_or("")
                .trim_matches('.')
                .to_lowercase();
            if host.is_empty() || !host.contains('.') {
                continue;
            }
            if !domains.contains(&host) {
                domains.push(host);
                if domains.len() >= LINK_DOMAIN_CAP {
                    return domains;
                }
            }
        }
    }
    domains
}

/// Split a From-style address into (display, email)
///
/// Handles `Name <a@b.com>`, bare `a@b.com`, and quoted display names.
pub fn parse_address(raw: &str) -> (String, String) {
    let raw = raw.trim();
    if let (Some(open), Some(close)) = (raw.rfind('<'), raw.rfind('>')) {
        if open < close {
            let email = raw[open + 1..close].trim().to_lowercase();
            let display = raw[..open].trim().trim_matches('"').trim().to_string();
            return (display, email);
        }
    }
    if raw.contains('@') {
        return (String::new(), raw.to_lowercase());
    }
    (raw.to_string(), String::new())
}

/// Pull the first domain out of a header that may hold addresses or URLs
pub fn domains_in_header(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    for caps in URL.captures_iter(value) {
        let host = caps[1].split(':').next().unwrap_or("").to_lowercase();
        if host.contains('.') && !out.contains(&host) {
            out.push(host);
        }
    }
    for part in value.split([',', ' ', '<', '>']) {
        if let Some(domain) = domain_of_email(part) {
            if domain.contains('.') && !out.contains(&domain) {
                out.push(domain);
            }
        }
    }
    out
}

/// Build the resolver's input surface from metadata and optional bodies
pub fn build_surface(meta: &EmailMeta, text: &str, html: &str) -> EmailSurface {
    let reply_to_domain = meta
        .headers
        .get("reply-to")
        .and_then(|v| domains_in_header(v).into_iter().next());
    let return_path_domain = meta
        .headers
        .get("return-path")
        .and_then(|v| domains_in_header(v).into_iter().next());
    let list_unsub_domains = meta
        .headers
        .get("list-unsubscribe")
        .map(|v| domains_in_header(v))
        .unwrap_or_default();

    let link_domains = extract_link_domains(text, html);

    let haystack = format!("{} {} {}", meta.subject, meta.snippet, text).to_lowercase();

    EmailSurface {
        from: meta.from.clone(),
        from_email: meta.from_email.clone(),
        from_domain: meta.from_domain.clone(),
        reply_to_domain,
        return_path_domain,
        list_unsub_domains,
        link_domains,
        haystack,
    }
}

/// First line of normalized text, truncated, for snippet fallback
pub fn snippet_of(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.chars().take(160).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_body_whitespace() {
        let raw = "Total\t$9.99\r\n\u{a0}\u{a0}thanks     for  paying\n\n\n\nbye";
        let got = normalize_body(raw);
        assert_eq!(got, "Total $9.99\n thanks for paying\n\nbye");
    }

    #[test]
    fn test_html_to_text() {
        let html = "<div><b>Invoice&nbsp;total:</b> &amp; $5.00</div>";
        assert_eq!(html_to_text(html), "Invoice total: & $5.00");
    }

    #[test]
    fn test_extract_link_domains_dedupes() {
        let text = "visit https://netflix.com/account and https://netflix.com/help";
        let html = r#"<a href="https://help.netflix.com:443/x">help</a>"#;
        let got = extract_link_domains(text, html);
        assert_eq!(got, vec!["netflix.com", "help.netflix.com"]);
    }

    #[test]
    fn test_link_domain_cap() {
        let text: String = (0..300)
            .map(|i| format!("https://d{}.example.com/x ", i))
            .collect();
        assert_eq!(extract_link_domains(&text, "").len(), 200);
    }

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(
            parse_address("Netflix <info@account.netflix.com>"),
            ("Netflix".to_string(), "info@account.netflix.com".to_string())
        );
        assert_eq!(
            parse_address("\"Billing Team\" <billing@x.io>"),
            ("Billing Team".to_string(), "billing@x.io".to_string())
        );
        assert_eq!(
            parse_address("info@account.netflix.com"),
            (String::new(), "info@account.netflix.com".to_string())
        );
    }

    #[test]
    fn test_domains_in_header() {
        let got = domains_in_header("<mailto:unsub@mail.brand.com>, <https://brand.com/u>");
        assert!(got.contains(&"brand.com".to_string()));
        assert!(got.contains(&"mail.brand.com".to_string()));
    }

    #[test]
    fn test_build_surface_lowercases_haystack() {
        let meta = EmailMeta {
            id: "1".to_string(),
            from: "Netflix <info@account.netflix.com>".to_string(),
            from_email: "info@account.netflix.com".to_string(),
            from_domain: "account.netflix.com".to_string(),
            subject: "Your Netflix Billing".to_string(),
            snippet: String::new(),
            date_ms: Some(1),
            headers: HashMap::new(),
        };
        let surface = build_surface(&meta, "You Were CHARGED $15.49", "");
        assert!(surface.haystack.contains("you were charged"));
        assert!(surface.haystack.contains("your netflix billing"));
    }
}
