//! Course page parsing
//!
//! Turns the root page of a course into a `CourseDocument`. The course name
//! and the declared review count are required; every other section degrades
//! to an empty sub-document when the page omits it.

use crate::documents::{course_ga_id, Address, CourseDocument, Layout, TeeStats};
use crate::harvest::ParseError;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Parses a course root page
pub fn parse_course_page(html: &str, url: &str) -> Result<CourseDocument, ParseError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let name = select_all(root, "[itemprop='name']")
        .into_iter()
        .find(|el| !inside_review(*el))
        .map(text_of)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ParseError::new(url, "missing course name"))?;

    let review_count = select_first(root, "[itemprop='reviewCount']")
        .map(text_of)
        .ok_or_else(|| ParseError::new(url, "missing review count"))
        .and_then(|raw| {
            parse_count(&raw)
                .ok_or_else(|| ParseError::new(url, format!("invalid review count {:?}", raw)))
        })?;

    Ok(CourseDocument {
        ga_url: url.to_string(),
        ga_id: course_ga_id(url),
        course_id: None,
        name,
        review_count,
        address: parse_address(root),
        layout: parse_layout(root),
        key_info: parse_key_info(root),
        tees: parse_tees(root),
        extras: parse_extras(root),
    })
}

fn parse_count(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn parse_address(root: ElementRef) -> Address {
    let mut address = Address::default();

    for item in select_all(root, ".address") {
        let value = text_of(item);
        if value.is_empty() {
            continue;
        }

        let slot = match item.value().attr("itemprop") {
            Some("streetAddress") => &mut address.street,
            Some("addressLocality") => &mut address.locality,
            Some("addressRegion") => &mut address.region,
            Some("postalCode") => &mut address.postal_code,
            Some("addressCountry") => &mut address.country,
            Some("telephone") => &mut address.telephone,
            Some("sameAs") | Some("url") => &mut address.website,
            Some(other) => {
                address.other.insert(other.to_string(), value);
                continue;
            }
            None => {
                // Unlabelled lines are keyed by their first non-generic class
                let key = item
                    .value()
                    .classes()
                    .find(|c| *c != "address")
                    .unwrap_or("address")
                    .to_string();
                address.other.insert(key, value);
                continue;
            }
        };
        *slot = Some(value);
    }

    address
}

fn parse_layout(root: ElementRef) -> Layout {
    let mut layout = Layout::default();

    for item in select_all(root, ".course-essential-info-top li") {
        let Some((key, value)) = split_pair(&text_of(item), ':') else {
            continue;
        };
        let slot = match key.to_ascii_lowercase().as_str() {
            "holes" => &mut layout.holes,
            "par" => &mut layout.par,
            "length" => &mut layout.length,
            "slope" => &mut layout.slope,
            "rating" => &mut layout.rating,
            _ => continue,
        };
        *slot = Some(value);
    }

    layout
}

fn parse_key_info(root: ElementRef) -> BTreeMap<String, String> {
    // The first two divs are the section heading and its wrapper
    select_all(root, ".key-info div")
        .into_iter()
        .skip(2)
        .filter_map(|item| split_pair(&text_of(item), ':'))
        .collect()
}

fn parse_tees(root: ElementRef) -> BTreeMap<String, TeeStats> {
    let mut tees = BTreeMap::new();

    let Some(table) = select_all(root, "table")
        .into_iter()
        .find(|t| select_first(*t, "th").is_some())
    else {
        return tees;
    };

    let rows = select_all(table, "tr");
    let Some((header, body)) = rows.split_first() else {
        return tees;
    };
    let headings: Vec<String> = select_all(*header, "th").into_iter().map(text_of).collect();

    for row in body {
        let cells: Vec<String> = select_all(*row, "td, th").into_iter().map(text_of).collect();
        let Some((name, values)) = cells.split_first() else {
            continue;
        };
        let name: String = name.chars().filter(|c| *c != '.' && *c != '$').collect();
        let name = name.trim().to_string();
        if name.is_empty() {
            continue;
        }

        let mut stats = TeeStats::default();
        for (heading, value) in headings.iter().skip(1).zip(values) {
            let slot = match heading.to_ascii_lowercase().as_str() {
                "length" | "yards" | "yardage" => &mut stats.length,
                "par" => &mut stats.par,
                "slope" => &mut stats.slope,
                "rating" => &mut stats.rating,
                _ => continue,
            };
            if !value.is_empty() {
                *slot = Some(value.clone());
            }
        }
        tees.insert(name, stats);
    }

    tees
}

fn parse_extras(root: ElementRef) -> BTreeMap<String, bool> {
    select_all(root, "#more .col-sm-4 div")
        .into_iter()
        .filter_map(|item| split_pair(&text_of(item), ':'))
        .map(|(amenity, answer)| (amenity, answer.eq_ignore_ascii_case("yes")))
        .collect()
}

fn inside_review(element: ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map_or(false, |e| e.attr("itemprop") == Some("review"))
    })
}

/// Every element under `scope` matching `css`; empty for an invalid selector
pub(crate) fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => scope.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// First element under `scope` matching `css`
pub(crate) fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    let found = scope.select(&selector).next();
    found
}

/// Element text with whitespace collapsed
pub(crate) fn text_of(element: ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `Key: Value` once, trimming both halves
pub(crate) fn split_pair(text: &str, separator: char) -> Option<(String, String)> {
    let (key, value) = text.split_once(separator)?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
