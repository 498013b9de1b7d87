//! Domain classification and normalization
//!
//! Closed sets: consumer mailbox domains can never be a merchant identity,
//! and mail-infrastructure (ESP) domains only ever carry someone else's
//! mail. Subdomains match their parents by suffix on a label boundary.

/// Consumer mailbox providers; matching one is a strong anti-merchant signal
pub const CONSUMER_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "ymail.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "msn.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
];

/// Mail-sending infrastructure; never a merchant identity
pub const INFRA_DOMAINS: &[&str] = &[
    "sendgrid.net",
    "mailgun.org",
    "amazonses.com",
    "list-manage.com",
    "mailchimp.com",
    "sparkpostmail.com",
    "sendinblue.com",
    "postmarkapp.com",
    "mandrillapp.com",
    "cmail19.com",
    "cmail20.com",
    "rsgsv.net",
];

/// Subdomain prefixes stripped during normalization
const MAIL_SUBDOMAIN_PREFIXES: &[&str] = &["mail", "email", "em", "m", "news", "notify", "noreply"];

/// True when `candidate` equals `parent` or is a subdomain of it
pub fn domain_matches(candidate: &str, parent: &str) -> bool {
    let candidate = candidate.to_lowercase();
    let parent = parent.to_lowercase();
    candidate == parent || candidate.ends_with(&format!(".{parent}"))
}

/// Membership against one of the closed sets, by suffix
fn in_set(domain: &str, set: &[&str]) -> bool {
    set.iter().any(|parent| domain_matches(domain, parent))
}

pub fn is_consumer_domain(domain: &str) -> bool {
    in_set(domain, CONSUMER_DOMAINS)
}

pub fn is_infra_domain(domain: &str) -> bool {
    in_set(domain, INFRA_DOMAINS)
}

/// Lowercase and strip one known mail subdomain prefix
///
/// `mail.example.com` → `example.com`; `em.news.example.com` is stripped one
/// label at a time, so repeated prefixes collapse too.
pub fn normalize_domain(domain: &str) -> String {
    let mut domain = domain.trim().trim_end_matches('.').to_lowercase();
    loop {
        let Some((head, rest)) = domain.split_once('.') else {
            break;
        };
        // Only strip when a real registrable domain remains
        if MAIL_SUBDOMAIN_PREFIXES.contains(&head) && rest.contains('.') {
            domain = rest.to_string();
        } else {
            break;
        }
    }
    domain
}

/// Registrable-ish base: the last two labels (three for common ccTLD pairs)
pub fn base_domain(domain: &str) -> String {
    let domain = domain.to_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() <= 2 {
        return domain;
    }
    let take = if is_cc_second_level(labels[labels.len() - 2], labels[labels.len() - 1]) {
        3
    } else {
        2
    };
    labels[labels.len().saturating_sub(take)..].join(".")
}

fn is_cc_second_level(second: &str, tld: &str) -> bool {
    matches!(second, "co" | "com" | "org" | "net" | "ac" | "gov")
        && matches!(tld, "uk" | "jp" | "au" | "nz" | "in" | "br" | "za")
}

/// Extract the domain part of an email address, lowercased
pub fn domain_of_email(email: &str) -> Option<String> {
    let at = email.rfind('@')?;
    let domain = email[at + 1..].trim().trim_end_matches('>');
    if domain.is_empty() {
        return None;
    }
    Some(domain.to_lowercase())
}

/// Human label from a domain: `account.netflix.com` → `Netflix`
pub fn pretty_label(domain: &str) -> String {
    let base = base_domain(&normalize_domain(domain));
    let name = base.split('.').next().unwrap_or(&base);
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
