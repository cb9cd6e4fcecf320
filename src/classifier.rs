//! Click classifier
//!
//! Maps a click target descriptor to at most one semantic event. Rules are
//! tried in priority order and the first match wins, so a button-styled
//! download link counts once, as a download.

use crate::types::{ClickTarget, ContactKind, EventType};
use url::Url;

/// File extensions counted as downloads
pub const DOWNLOAD_EXTENSIONS: [&str; 6] = ["pdf", "doc", "docx", "xls", "xlsx", "zip"];

/// Label used when a button has no visible text
pub const UNKNOWN_BUTTON_LABEL: &str = "Unknown Button";

/// Outcome of classifying a click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub event_type: EventType,
    pub label: String,
    pub contact: Option<ContactKind>,
    pub href: Option<String>,
}

impl Classification {
    fn new(event_type: EventType, label: impl Into<String>, href: Option<&str>) -> Self {
        Self {
            event_type,
            label: label.into(),
            contact: None,
            href: href.map(str::to_string),
        }
    }

    fn contact(kind: ContactKind, href: &str) -> Self {
        Self {
            event_type: EventType::ContactClick,
            label: kind.as_str().to_string(),
            contact: Some(kind),
            href: Some(href.to_string()),
        }
    }
}

/// Classifier bound to the host of the current page
#[derive(Debug, Clone, Default)]
pub struct ClickClassifier {
    page_host: Option<String>,
}

impl ClickClassifier {
    pub fn new(page_host: Option<&str>) -> Self {
        Self {
            page_host: page_host.map(|h| h.to_ascii_lowercase()),
        }
    }

    pub fn classify(&self, target: &ClickTarget) -> Option<Classification> {
        classify(target, self.page_host.as_deref())
    }
}

/// Classify a click. Never fails: malformed hrefs simply skip the href rules.
pub fn classify(target: &ClickTarget, page_host: Option<&str>) -> Option<Classification> {
    let href = target
        .href
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty());

    if let Some(filename) = download_filename(target, href, page_host) {
        return Some(Classification::new(EventType::FileDownload, filename, href));
    }

    if let Some(href) = href {
        let lower = href.to_ascii_lowercase();
        if lower.starts_with("mailto:") {
            return Some(Classification::contact(ContactKind::Email, href));
        }
        if lower.starts_with("tel:") {
            return Some(Classification::contact(ContactKind::Phone, href));
        }
        if is_external(href, page_host) {
            return Some(Classification::new(EventType::ExternalLinkClick, href, Some(href)));
        }
    }

    if is_button(target) {
        let label = target
            .text
            .as_deref()
            .map(collapse_whitespace)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_BUTTON_LABEL.to_string());
        return Some(Classification::new(EventType::ButtonClick, label, href));
    }

    None
}

/// Filename for a download, if the target is one
fn download_filename(
    target: &ClickTarget,
    href: Option<&str>,
    page_host: Option<&str>,
) -> Option<String> {
    let url = href.and_then(|h| resolve(h, page_host));
    let last_segment = url
        .as_ref()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .and_then(|u| u.path_segments())
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if let Some(attr) = target.download.as_deref() {
        let attr = attr.trim();
        if !attr.is_empty() {
            return Some(attr.to_string());
        }
        return Some(last_segment.unwrap_or_else(|| "download".to_string()));
    }

    let segment = last_segment?;
    let (_, extension) = segment.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    DOWNLOAD_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(segment)
}

/// Resolve `href` against the current page so relative links parse too
fn resolve(href: &str, page_host: Option<&str>) -> Option<Url> {
    match Url::parse(href) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = format!("https://{}/", page_host.unwrap_or("localhost"));
            Url::parse(&base).ok()?.join(href).ok()
        }
        Err(_) => None,
    }
}

fn is_external(href: &str, page_host: Option<&str>) -> bool {
    let absolute = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) if href.starts_with("//") => {
            match Url::parse(&format!("https:{href}")) {
                Ok(url) => url,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };

    if !matches!(absolute.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = absolute.host_str() else {
        return false;
    };

    match page_host {
        Some(page_host) => !host.eq_ignore_ascii_case(page_host),
        None => true,
    }
}

fn is_button(target: &ClickTarget) -> bool {
    let tag = target
        .tag_name
        .as_deref()
        .is_some_and(|t| t.trim().eq_ignore_ascii_case("button"));
    let role = target
        .role
        .as_deref()
        .is_some_and(|r| r.trim().eq_ignore_ascii_case("button"));
    tag || role
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HOST: Option<&str> = Some("example.com");

    fn event_type(target: &ClickTarget) -> Option<EventType> {
        classify(target, HOST).map(|c| c.event_type)
    }

    #[test]
    fn test_pdf_with_button_role_is_download() {
        let target = ClickTarget::link("/files/Annual-Report.PDF?v=2#page=3")
            .with_role("button")
            .with_text("Download report");

        let result = classify(&target, HOST).unwrap();
        assert_eq!(result.event_type, EventType::FileDownload);
        assert_eq!(result.label, "Annual-Report.PDF");
    }

    #[test]
    fn test_download_extensions() {
        for ext in DOWNLOAD_EXTENSIONS {
            let target = ClickTarget::link(format!("https://cdn.other.net/a/file.{ext}"));
            assert_eq!(event_type(&target), Some(EventType::FileDownload), "{ext}");
        }
        let target = ClickTarget::link("/files/readme.txt");
        assert_eq!(event_type(&target), None);
    }

    #[test]
    fn test_download_attribute() {
        let named = ClickTarget::link("/export?id=7").with_download("contacts.csv");
        let result = classify(&named, HOST).unwrap();
        assert_eq!(result.event_type, EventType::FileDownload);
        assert_eq!(result.label, "contacts.csv");

        let bare = ClickTarget::link("/exports/data.csv").with_download("");
        assert_eq!(classify(&bare, HOST).unwrap().label, "data.csv");
    }

    #[test]
    fn test_mailto_button_is_contact_email() {
        let target = ClickTarget::link("mailto:a@b.com").with_role("button");
        let result = classify(&target, HOST).unwrap();
        assert_eq!(result.event_type, EventType::ContactClick);
        assert_eq!(result.contact, Some(ContactKind::Email));
        assert_eq!(result.label, "email");
    }

    #[test]
    fn test_tel_is_contact_phone() {
        let target = ClickTarget::link("TEL:+15551234567");
        let result = classify(&target, HOST).unwrap();
        assert_eq!(result.contact, Some(ContactKind::Phone));
        assert_eq!(result.label, "phone");
    }

    #[test]
    fn test_external_link() {
        let target = ClickTarget::link("https://partner.io/landing?utm=x");
        let result = classify(&target, HOST).unwrap();
        assert_eq!(result.event_type, EventType::ExternalLinkClick);
        assert_eq!(result.label, "https://partner.io/landing?utm=x");

        let protocol_relative = ClickTarget::link("//partner.io/x");
        assert_eq!(event_type(&protocol_relative), Some(EventType::ExternalLinkClick));
    }

    #[test]
    fn test_same_host_link_is_not_external() {
        assert_eq!(event_type(&ClickTarget::link("https://EXAMPLE.com/pricing")), None);
        assert_eq!(event_type(&ClickTarget::link("/pricing")), None);
    }

    #[test]
    fn test_unknown_page_host_treats_absolute_links_as_external() {
        let target = ClickTarget::link("https://example.com/pricing");
        assert_eq!(
            classify(&target, None).map(|c| c.event_type),
            Some(EventType::ExternalLinkClick)
        );
    }

    #[test]
    fn test_button_label() {
        let target = ClickTarget::button("  Start   free\n trial ");
        assert_eq!(classify(&target, HOST).unwrap().label, "Start free trial");

        let unlabeled = ClickTarget::default().with_role("BUTTON");
        let result = classify(&unlabeled, HOST).unwrap();
        assert_eq!(result.event_type, EventType::ButtonClick);
        assert_eq!(result.label, UNKNOWN_BUTTON_LABEL);
    }

    #[test]
    fn test_internal_link_button_is_button_click() {
        let target = ClickTarget::link("/signup").with_role("button").with_text("Sign up");
        let result = classify(&target, HOST).unwrap();
        assert_eq!(result.event_type, EventType::ButtonClick);
        assert_eq!(result.href.as_deref(), Some("/signup"));
    }

    #[test]
    fn test_malformed_targets_yield_nothing() {
        assert_eq!(event_type(&ClickTarget::default()), None);
        assert_eq!(event_type(&ClickTarget::link("   ")), None);
        assert_eq!(event_type(&ClickTarget::link("http://[::1")), None);
        assert_eq!(event_type(&ClickTarget::link("javascript:void(0)")), None);
    }

    #[test]
    fn test_classifier_lowercases_host() {
        let classifier = ClickClassifier::new(Some("Example.com"));
        assert!(classifier
            .classify(&ClickTarget::link("https://example.com/a"))
            .is_none());
    }
}
