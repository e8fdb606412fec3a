//! Label-anchored field extraction over parsed HTML.
//!
//! Every structured field of every record family goes through [`extract`]:
//! find the element that carries a label ("Foro:", "Classe:") and keep what
//! follows it. The label strings are the only per-field configuration.

use scraper::{ElementRef, Selector};
use tracing::warn;

use super::text::normalize;

/// Text of the first element under `fragment` matching `container` whose text
/// contains `label`, with everything up to and including the label removed.
///
/// The element lookup ignores whitespace and case, so a label rendered with
/// different spacing still finds its element; the strip itself is exact and
/// falls back to the whole text when the exact label is not present.
/// Returns an empty string when nothing matches.
pub fn extract(fragment: ElementRef<'_>, container: &Selector, label: &str) -> String {
    let wanted = squash(label);
    let found = fragment
        .select(container)
        .map(inner_text)
        .find(|text| squash(text).contains(&wanted));

    match found {
        Some(text) => after_label(&text, label),
        None => {
            warn!(label, "label not found");
            String::new()
        }
    }
}

/// Strip `label` (first occurrence) and whatever precedes it, then normalize.
/// Text without the label is kept whole.
pub fn after_label(text: &str, label: &str) -> String {
    let rest = match text.find(label) {
        Some(pos) => &text[pos + label.len()..],
        None => text,
    };
    normalize(rest)
}

/// Concatenated text nodes of an element, each trimmed, space separated.
pub fn inner_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text nodes that are direct children of `element`, normalized.
pub fn own_text(element: ElementRef<'_>) -> String {
    let text: Vec<&str> = element
        .children()
        .filter_map(|node| node.value().as_text())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    normalize(&text.join(" "))
}

/// Normalized text of the first element matching `selector`, or empty.
pub fn text_of(fragment: ElementRef<'_>, selector: &Selector) -> String {
    fragment
        .select(selector)
        .next()
        .map(|el| normalize(&inner_text(el)))
        .unwrap_or_default()
}

/// Normalized, non-empty texts of every element matching `selector`.
pub fn all_text_of(fragment: ElementRef<'_>, selector: &Selector) -> Vec<String> {
    fragment
        .select(selector)
        .map(|el| normalize(&inner_text(el)))
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn attr_of(fragment: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    fragment
        .select(selector)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn has(fragment: ElementRef<'_>, selector: &Selector) -> bool {
    fragment.select(selector).next().is_some()
}

/// First element matching `container` whose text contains `label`.
pub fn labeled<'a>(
    fragment: ElementRef<'a>,
    container: &Selector,
    label: &str,
) -> Option<ElementRef<'a>> {
    let wanted = squash(label);
    fragment
        .select(container)
        .find(|el| squash(&inner_text(*el)).contains(&wanted))
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    fn sel(css: &str) -> Selector {
        Selector::parse(css).unwrap()
    }

    const ROW: &str = r#"
        <table>
          <tr><td><strong>Classe:</strong> Procedimento Comum Cível</td></tr>
          <tr><td><strong>Foro:</strong>  Foro de   São Paulo </td></tr>
          <tr><td><strong>Vara :</strong> 2ª Vara Cível</td></tr>
          <tr><td><strong>Data de Disponibilização:</strong> 09/02/2024</td></tr>
        </table>"#;

    #[test]
    fn label_prefix_strip() {
        assert_eq!(after_label("Foro: São Paulo", "Foro:"), "São Paulo");
        assert_eq!(after_label("São Paulo", "Foro:"), "São Paulo");
    }

    #[test]
    fn first_occurrence_wins() {
        assert_eq!(after_label("Foro: Foro: Central", "Foro:"), "Foro: Central");
    }

    #[test]
    fn extracts_from_fragment() {
        let doc = Html::parse_fragment(ROW);
        let root = doc.root_element();
        assert_eq!(extract(root, &sel("tr"), "Classe:"), "Procedimento Comum Cível");
        assert_eq!(extract(root, &sel("tr"), "Foro:"), "Foro de São Paulo");
        assert_eq!(extract(root, &sel("tr"), "Data de Disponibilização:"), "09/02/2024");
    }

    #[test]
    fn tolerates_label_spacing() {
        let doc = Html::parse_fragment(ROW);
        // Element found through the loose match; exact label absent, text kept whole.
        assert_eq!(extract(doc.root_element(), &sel("tr"), "Vara:"), "Vara : 2ª Vara Cível");
    }

    #[test]
    fn missing_label_is_empty() {
        let doc = Html::parse_fragment(ROW);
        assert_eq!(extract(doc.root_element(), &sel("tr"), "Magistrado:"), "");
        assert_eq!(extract(doc.root_element(), &sel("li"), "Classe:"), "");
    }

    #[test]
    fn label_with_nothing_after_is_empty() {
        let doc = Html::parse_fragment("<table><tr><td>Assunto:</td></tr></table>");
        assert_eq!(extract(doc.root_element(), &sel("tr"), "Assunto:"), "");
    }

    #[test]
    fn direct_reads() {
        let doc = Html::parse_fragment(
            r#"<div><span class="t">A</span><span class="t"> </span><span class="t">B, C</span>
               <a class="l" href=" /x?y=1 ">go</a></div>"#,
        );
        let root = doc.root_element();
        assert_eq!(text_of(root, &sel(".t")), "A");
        assert_eq!(all_text_of(root, &sel(".t")), vec!["A", "B C"]);
        assert_eq!(attr_of(root, &sel("a.l"), "href").as_deref(), Some("/x?y=1"));
        assert_eq!(attr_of(root, &sel("a.l"), "name"), None);
        assert!(has(root, &sel("a.l")));
        assert!(!has(root, &sel("a.missing")));

        let cell = Html::parse_fragment(r#"<table><tr><td> Juntada de Petição <span>Intermediária</span> </td></tr></table>"#);
        let td = cell.select(&sel("td")).next().unwrap();
        assert_eq!(own_text(td), "Juntada de Petição");
    }
}
