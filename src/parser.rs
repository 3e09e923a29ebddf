//! HTML extraction for listing pages and issue detail pages.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::models::{IssueRecord, ListingItem, ListingPage, StatusPolicy};
use crate::network::FetchError;
use crate::validate::{self, is_within_region};

const NEXT_PAGE_LABEL: &str = "Következő";
const AUTHORITY_REPLY_MARKER: &str = "Az illetékes válasza";
const FORWARDED_MARKER: &str = "elküldte az ügyet az illetékesnek:";

lazy_static! {
    static ref CARD: Selector = Selector::parse("article.card").expect("Invalid card selector");
    static ref CARD_LINK: Selector = Selector::parse("a.card__media__bg").expect("Invalid card link selector");
    static ref BADGE: Selector = Selector::parse("span.badge").expect("Invalid badge selector");
    static ref PAGINATION_LINK: Selector = Selector::parse("a.pagination__link").expect("Invalid pagination selector");

    static ref TITLE: Selector = Selector::parse("h1.report__title").expect("Invalid title selector");
    static ref AUTHOR_LINK: Selector = Selector::parse("div.report__reporter div.report__author a").expect("Invalid author selector");
    static ref AUTHOR: Selector = Selector::parse("div.report__reporter div.report__author").expect("Invalid author selector");
    static ref REPORT_DATE: Selector = Selector::parse("time.report__date").expect("Invalid date selector");
    static ref CATEGORY: Selector = Selector::parse("div.report__category a").expect("Invalid category selector");
    static ref INSTITUTION: Selector = Selector::parse("div.report__institution a").expect("Invalid institution selector");
    static ref SUPPORTER: Selector = Selector::parse("span.report__partner__about").expect("Invalid supporter selector");
    static ref DESCRIPTION: Selector = Selector::parse("p.report__description").expect("Invalid description selector");
    static ref ADDRESS: Selector = Selector::parse("address.report__location__address").expect("Invalid address selector");
    static ref DISTRICT: Selector = Selector::parse("span.report__location__address__district").expect("Invalid district selector");
    static ref GALLERY_LINK: Selector = Selector::parse("div.report__gallery a[href]").expect("Invalid gallery selector");

    static ref COMMENT_BODY: Selector = Selector::parse("div.comment__body").expect("Invalid comment selector");
    static ref COMMENT_MESSAGE: Selector = Selector::parse("p.comment__message").expect("Invalid comment message selector");
    static ref COMMENT_DATE: Selector = Selector::parse("time.comment__date").expect("Invalid comment date selector");
    static ref ANY_TIME: Selector = Selector::parse("time").expect("Invalid time selector");

    static ref RESOLVED_MESSAGE: Regex = Regex::new(r"(?is)lezárta a bejelentést.*Megoldott.*eredménnyel")
        .expect("Invalid resolution regex");

    static ref META_LATITUDE: Regex = Regex::new(
        r#"(?i)<meta\s+property=["'](?:og:latitude|place:location:latitude)["']\s+content=["']([+-]?\d+\.?\d*)["']"#
    ).expect("Invalid latitude meta regex");
    static ref META_LONGITUDE: Regex = Regex::new(
        r#"(?i)<meta\s+property=["'](?:og:longitude|place:location:longitude)["']\s+content=["']([+-]?\d+\.?\d*)["']"#
    ).expect("Invalid longitude meta regex");

    /// Two-group (lat, lng) patterns, most specific first.
    static ref COORDINATE_PAIRS: Vec<Regex> = [
        r#"(?i)window\.mapInitData\s*=\s*\{[^}]*"center"\s*:\s*\{\s*"lat"\s*:\s*([+-]?\d+\.?\d*)\s*,\s*"lng"\s*:\s*([+-]?\d+\.?\d*)\s*\}"#,
        r#"(?i)"center"\s*:\s*\{\s*"lat"\s*:\s*([+-]?\d+\.?\d*)\s*,\s*"lng"\s*:\s*([+-]?\d+\.?\d*)\s*\}"#,
        r#"(?i)center\s*[:=]\s*\{\s*lat\s*:\s*([+-]?\d+\.?\d*)\s*,\s*lng\s*:\s*([+-]?\d+\.?\d*)\s*\}"#,
        r#"(?i)coords?\s*[:=]\s*\[([+-]?\d+\.?\d*),\s*([+-]?\d+\.?\d*)\]"#,
        r#"(?i)center\s*[:=]\s*\[([+-]?\d+\.?\d*),\s*([+-]?\d+\.?\d*)\]"#,
        r#"(?i)position\s*[:=]\s*\{[^}]*lat[^}]*:\s*([+-]?\d+\.?\d*)[^}]*lng?[^}]*:\s*([+-]?\d+\.?\d*)"#,
        r#"([+-]?\d{1,2}\.\d+),\s*([+-]?\d{1,3}\.\d+)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid coordinate regex"))
    .collect();
}

fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

/// Text of the first `span.badge` under `scope` that is not a comment counter.
fn status_badge(scope: ElementRef) -> Option<String> {
    scope
        .select(&BADGE)
        .find(|badge| !badge.value().classes().any(|c| c.contains("badge--comment")))
        .map(text_of)
        .and_then(non_empty)
}

/// Cards (key + status badge) and the "next page" link of a listing page.
pub fn parse_listing(html: &str, page_url: &str) -> Result<ListingPage, FetchError> {
    let base = Url::parse(page_url).map_err(|e| FetchError::InvalidUrl(format!("{page_url}: {e}")))?;
    let document = Html::parse_document(html);

    let mut items = Vec::new();
    for card in document.select(&CARD) {
        let Some(href) = card
            .select(&CARD_LINK)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            debug!("Skipping card with unusable link {:?}", href);
            continue;
        };
        items.push(ListingItem {
            url: url.to_string(),
            status: status_badge(card),
        });
    }

    let next_page = document
        .select(&PAGINATION_LINK)
        .find(|link| text_of(*link).contains(NEXT_PAGE_LABEL))
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| base.join(href.trim()).ok())
        .map(|u| u.to_string());

    Ok(ListingPage { items, next_page })
}

/// Full issue record from a detail page.
///
/// A resolved status without a locatable resolution date, a missing or
/// unparseable report date, and double-encoded text are all errors.
pub fn parse_issue(html: &str, url: &str, policy: &StatusPolicy) -> Result<IssueRecord, FetchError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let date_text = document
        .select(&REPORT_DATE)
        .next()
        .map(text_of)
        .ok_or_else(|| FetchError::MissingField {
            url: url.to_string(),
            field: "date",
        })?;
    let date = validate::normalize_hungarian_date(&date_text)
        .map_err(|e| FetchError::from_validation(url, e))?;

    let status = status_badge(root).ok_or_else(|| FetchError::MissingField {
        url: url.to_string(),
        field: "status",
    })?;

    let mut record = IssueRecord::new(url, date, status);
    record.title = select_text(&document, &TITLE).unwrap_or_default();
    record.description = select_text(&document, &DESCRIPTION).unwrap_or_default();
    record.category = select_text(&document, &CATEGORY);
    record.responsible_institution = select_text(&document, &INSTITUTION);
    record.supporter = select_text(&document, &SUPPORTER);
    record.address = extract_address(&document);
    record.images = extract_images(&document, url);

    match document.select(&AUTHOR_LINK).next() {
        Some(link) => {
            record.reporter_name = non_empty(text_of(link));
            record.reporter_profile_url = link.value().attr("href").map(str::to_string);
        }
        None => record.reporter_name = select_text(&document, &AUTHOR),
    }

    if policy.is_resolved(&record.status) {
        let resolved_on = extract_resolution_date(&document).ok_or_else(|| {
            FetchError::MissingResolutionDate {
                url: url.to_string(),
            }
        })?;
        record.resolution_date = Some(resolved_on);
    }
    record.first_authority_response_date = extract_first_authority_response_date(&document);

    if let Some((latitude, longitude)) = extract_gps_coordinates(html) {
        record.latitude = Some(latitude);
        record.longitude = Some(longitude);
    }

    validate::check_encoding(&record).map_err(|e| FetchError::from_validation(url, e))?;
    Ok(record)
}

fn select_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).next().map(text_of).and_then(non_empty)
}

/// "City line, district" from the location block.
fn extract_address(document: &Html) -> Option<String> {
    let address = document.select(&ADDRESS).next()?;
    let own_text: String = address
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect();
    let city = own_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string);
    let district = address.select(&DISTRICT).next().map(text_of).and_then(non_empty);

    let parts: Vec<String> = [city, district].into_iter().flatten().collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn extract_images(document: &Html, page_url: &str) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    document
        .select(&GALLERY_LINK)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| match &base {
            Some(base) => base.join(href.trim()).ok().map(|u| u.to_string()),
            None => Some(href.trim().to_string()),
        })
        .collect()
}

/// Date of the comment that closed the report as solved.
pub fn extract_resolution_date(document: &Html) -> Option<NaiveDate> {
    for body in document.select(&COMMENT_BODY) {
        let closes = body
            .select(&COMMENT_MESSAGE)
            .any(|message| RESOLVED_MESSAGE.is_match(&message.html()));
        if !closes {
            continue;
        }
        let date = body
            .select(&ANY_TIME)
            .map(text_of)
            .filter(|t| !t.is_empty())
            .find_map(|t| validate::normalize_hungarian_date(&t).ok());
        if date.is_some() {
            return date;
        }
    }
    None
}

/// Date of the first reply from the responsible authority.
///
/// Comments are listed newest first, so the last explicit reply is the
/// earliest. Without an explicit reply, the newest-side comment mentioning the
/// authority a report was forwarded to counts.
pub fn extract_first_authority_response_date(document: &Html) -> Option<NaiveDate> {
    let bodies: Vec<ElementRef> = document.select(&COMMENT_BODY).collect();
    let message = |body: &ElementRef| body.select(&COMMENT_MESSAGE).next().map(text_of);
    let comment_date = |body: &ElementRef| {
        body.select(&COMMENT_DATE)
            .next()
            .map(text_of)
            .and_then(|t| validate::normalize_hungarian_date(&t).ok())
    };

    let explicit = bodies
        .iter()
        .filter(|body| message(*body).is_some_and(|m| m.contains(AUTHORITY_REPLY_MARKER)))
        .filter_map(comment_date)
        .last();
    if explicit.is_some() {
        return explicit;
    }

    for (i, body) in bodies.iter().enumerate() {
        let Some(text) = message(body) else { continue };
        if !text.contains(FORWARDED_MARKER) {
            continue;
        }
        let Some((_, authority)) = text.split_once(':') else { continue };
        let authority = authority.trim().to_lowercase();
        if authority.is_empty() {
            continue;
        }
        for earlier in bodies[..i].iter().rev() {
            let mentions = message(earlier).is_some_and(|m| m.to_lowercase().contains(&authority));
            if mentions {
                if let Some(date) = comment_date(earlier) {
                    return Some(date);
                }
            }
        }
    }
    None
}

/// Coordinates from meta tags, map init data or generic patterns, restricted
/// to the Budapest bounding box.
pub fn extract_gps_coordinates(html: &str) -> Option<(f64, f64)> {
    let last_value = |re: &Regex| {
        re.captures_iter(html)
            .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .last()
    };
    if let (Some(lat), Some(lng)) = (last_value(&META_LATITUDE), last_value(&META_LONGITUDE)) {
        if is_within_region(lat, lng) {
            return Some((lat, lng));
        }
    }

    for pattern in COORDINATE_PAIRS.iter() {
        for captures in pattern.captures_iter(html) {
            let lat = captures.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            let lng = captures.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
            if let (Some(lat), Some(lng)) = (lat, lng) {
                if is_within_region(lat, lng) {
                    return Some((lat, lng));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <article class="card">
            <a class="card__media__bg" href="/bejelentesek/budapest/101"></a>
            <span class="badge badge--comment">3</span>
            <span class="badge badge--success">MEGOLDOTT</span>
          </article>
          <article class="card">
            <a class="card__media__bg" href="https://jarokelo.hu/bejelentesek/budapest/100"></a>
            <span class="badge">FOLYAMATBAN</span>
          </article>
          <article class="card">
            <a class="card__media__bg" href="/bejelentesek/budapest/99"></a>
          </article>
          <article class="card"><p>no link</p></article>
          <nav>
            <a class="pagination__link" href="/bejelentesek?page=1">Előző</a>
            <a class="pagination__link" href="/bejelentesek?page=3">Következő</a>
          </nav>
        </body></html>
    "#;

    fn detail(status: &str, comments: &str) -> String {
        format!(
            r#"<html><head>
                <meta property="og:latitude" content="47.4979">
                <meta property="og:longitude" content="19.0402">
              </head><body>
              <h1 class="report__title">Kátyú az úttesten</h1>
              <div class="report__reporter"><div class="report__author"><a href="/profil/anna">Anna</a></div></div>
              <time class="report__date">2025. szeptember 15.</time>
              <div class="report__category"><a>Úthiba</a></div>
              <div class="report__institution"><a>Budapest Közút</a></div>
              <p class="report__description">Mély lyuk a sávban.</p>
              <span class="badge badge--comment">2</span>
              <span class="badge">{status}</span>
              <address class="report__location__address">Budapest, Fő utca 1.
                <span class="report__location__address__district">I. kerület</span>
              </address>
              <div class="report__gallery"><a href="/uploads/1.jpg"></a><a href="/uploads/2.jpg"></a></div>
              {comments}
            </body></html>"#
        )
    }

    const RESOLVED_COMMENTS: &str = r#"
        <div class="comment__body">
          <p class="comment__message">A Járókelő lezárta a bejelentést <b>Megoldott</b> eredménnyel.</p>
          <time class="comment__date">2025. október 2. 10:15</time>
        </div>
        <div class="comment__body">
          <p class="comment__message">Az illetékes válasza: javítjuk.</p>
          <time class="comment__date">2025. szeptember 20. 08:00</time>
        </div>
        <div class="comment__body">
          <p class="comment__message">Az illetékes válasza: megkaptuk.</p>
          <time class="comment__date">2025. szeptember 17. 09:00</time>
        </div>
    "#;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_listing_cards_and_next_page() {
        let page = parse_listing(LISTING, "https://jarokelo.hu/bejelentesek?page=2").unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].url, "https://jarokelo.hu/bejelentesek/budapest/101");
        assert_eq!(page.items[0].status.as_deref(), Some("MEGOLDOTT"));
        assert_eq!(page.items[1].status.as_deref(), Some("FOLYAMATBAN"));
        assert_eq!(page.items[2].status, None);
        assert_eq!(page.next_page.as_deref(), Some("https://jarokelo.hu/bejelentesek?page=3"));
    }

    #[test]
    fn test_parse_listing_without_next_link() {
        let page = parse_listing("<html><body></body></html>", "https://jarokelo.hu/bejelentesek").unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_page, None);
    }

    #[test]
    fn test_parse_issue_fields() {
        let html = detail("FOLYAMATBAN", "");
        let url = "https://jarokelo.hu/bejelentesek/budapest/101";
        let record = parse_issue(&html, url, &StatusPolicy::default()).unwrap();

        assert_eq!(record.url, url);
        assert_eq!(record.title, "Kátyú az úttesten");
        assert_eq!(record.reporter_name.as_deref(), Some("Anna"));
        assert_eq!(record.reporter_profile_url.as_deref(), Some("/profil/anna"));
        assert_eq!(record.date, date("2025-09-15"));
        assert_eq!(record.category.as_deref(), Some("Úthiba"));
        assert_eq!(record.responsible_institution.as_deref(), Some("Budapest Közút"));
        assert_eq!(record.status, "FOLYAMATBAN");
        assert_eq!(record.address.as_deref(), Some("Budapest, Fő utca 1., I. kerület"));
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.resolution_date, None);
        assert_eq!(record.latitude, Some(47.4979));
        assert_eq!(record.longitude, Some(19.0402));
    }

    #[test]
    fn test_parse_resolved_issue_dates() {
        let html = detail("MEGOLDOTT", RESOLVED_COMMENTS);
        let record = parse_issue(&html, "https://jarokelo.hu/b/1", &StatusPolicy::default()).unwrap();
        assert_eq!(record.resolution_date, Some(date("2025-10-02")));
        assert_eq!(record.first_authority_response_date, Some(date("2025-09-17")));
    }

    #[test]
    fn test_resolved_without_date_is_fatal() {
        let html = detail("MEGOLDOTT", "");
        let err = parse_issue(&html, "https://jarokelo.hu/b/1", &StatusPolicy::default()).unwrap_err();
        assert!(matches!(err, FetchError::MissingResolutionDate { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_corrupted_text_is_fatal() {
        let html = detail("FOLYAMATBAN", "").replace("Kátyú az úttesten", "KĂĄtyĂş");
        let err = parse_issue(&html, "https://jarokelo.hu/b/1", &StatusPolicy::default()).unwrap_err();
        assert!(matches!(err, FetchError::EncodingCorruption { .. }));
    }

    #[test]
    fn test_missing_date_is_skippable() {
        let html = detail("FOLYAMATBAN", "").replace("report__date", "other");
        let err = parse_issue(&html, "https://jarokelo.hu/b/1", &StatusPolicy::default()).unwrap_err();
        assert!(matches!(err, FetchError::MissingField { field: "date", .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_forwarded_authority_fallback() {
        let html = r#"<html><body>
            <div class="comment__body">
              <p class="comment__message">Budapest Közút: a hibát rögzítettük.</p>
              <time class="comment__date">2025. szeptember 22.</time>
            </div>
            <div class="comment__body">
              <p class="comment__message">A Járókelő elküldte az ügyet az illetékesnek: Budapest Közút</p>
              <time class="comment__date">2025. szeptember 16.</time>
            </div>
        </body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(extract_first_authority_response_date(&document), Some(date("2025-09-22")));
    }

    #[test]
    fn test_gps_from_map_init_data() {
        let html = r#"<script>window.mapInitData = {"zoom":15,"center":{"lat":47.51,"lng":19.05}};</script>"#;
        assert_eq!(extract_gps_coordinates(html), Some((47.51, 19.05)));
    }

    #[test]
    fn test_gps_outside_region_is_ignored() {
        let html = r#"<meta property="og:latitude" content="48.2"><meta property="og:longitude" content="16.37">"#;
        assert_eq!(extract_gps_coordinates(html), None);
    }
}
