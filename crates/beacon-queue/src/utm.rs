//! Campaign parameter extraction.

use beacon_core::Utm;
use url::Url;

/// Parse `utm_*` query parameters from `page_url`.
///
/// Empty values count as absent. Returns `None` when the URL does not parse
/// or carries no campaign parameter at all.
pub fn parse_utm(page_url: &str) -> Option<Utm> {
    let url = Url::parse(page_url).ok()?;
    let mut utm = Utm::default();

    for (key, value) in url.query_pairs() {
        if value.is_empty() {
            continue;
        }
        let slot = match key.as_ref() {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            "utm_term" => &mut utm.term,
            "utm_content" => &mut utm.content,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    (!utm.is_empty()).then_some(utm)
}
