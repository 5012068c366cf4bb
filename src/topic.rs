use serde::Serialize;

/// Template used when the configured one is missing or blank.
pub const DEFAULT_TOPIC_TEMPLATE: &str = "teams/${hostname}";

const HOSTNAME_TOKEN: &str = "${hostname}";
const HOSTNAME_LOWER_TOKEN: &str = "${hostnameLower}";
const HOSTNAME_UPPER_TOKEN: &str = "${hostnameUpper}";

/// Topic the display is subscribed to, together with the host it was derived for.
///
/// `topic` is `None` whenever the broker connection is not healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTopic {
    pub topic: Option<String>,
    pub hostname: String,
}

impl ResolvedTopic {
    pub fn unavailable(hostname: &str) -> Self {
        Self {
            topic: None,
            hostname: hostname.to_string(),
        }
    }
}

/// Returns the template to use, falling back to the built-in default when blank.
pub fn effective_template(template: Option<&str>) -> &str {
    match template {
        Some(t) if !t.trim().is_empty() => t,
        _ => DEFAULT_TOPIC_TEMPLATE,
    }
}

/// Substitutes the host name placeholders in `template` and canonicalises the
/// host name to lowercase.
///
/// The uppercase token is expanded first so that `${hostname}` cannot match
/// inside `${hostnameUpper}` or `${hostnameLower}`. The final pass rewrites
/// any literal raw or uppercased host name to lowercase, which makes the
/// function idempotent: resolving an already resolved topic is a no-op.
pub fn resolve_topic(template: &str, hostname: &str) -> String {
    let lower = hostname.to_lowercase();
    let upper = hostname.to_uppercase();

    let rendered = effective_template(Some(template))
        .replace(HOSTNAME_UPPER_TOKEN, &upper)
        .replace(HOSTNAME_LOWER_TOKEN, &lower)
        .replace(HOSTNAME_TOKEN, hostname);

    if hostname.is_empty() {
        return rendered;
    }

    rendered.replace(hostname, &lower).replace(&upper, &lower)
}
