use encoding_rs::WINDOWS_1252;

/// Characters that break the delimited handoff files.
const STRIPPED: &[char] = &['"', '\'', ',', ';', '\r'];

/// Clean scraped text for storage.
///
/// Repairs words that were UTF-8 decoded as Latin-1 ("SÃ£o" -> "São") when the
/// repair is unambiguous, drops control characters and delimiter characters,
/// and collapses every whitespace run (NBSP included) to one space.
/// `normalize(normalize(x)) == normalize(x)` for every input.
pub fn normalize(text: &str) -> String {
    let mut current = normalize_once(text);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split(char::is_whitespace).filter(|w| !w.is_empty()) {
        let repaired = repair_mojibake(word);
        let word = repaired.as_deref().unwrap_or(word);
        let cleaned: String = word
            .chars()
            .filter(|c| !c.is_control() && !STRIPPED.contains(c))
            .collect();
        if cleaned.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&cleaned);
    }
    out
}

/// Re-decode a word whose bytes were read as windows-1252 but are really UTF-8.
/// Returns `None` when the word is not mojibake (or the repair is not clean).
fn repair_mojibake(word: &str) -> Option<String> {
    if !word.chars().any(|c| ('\u{c2}'..='\u{f4}').contains(&c)) {
        return None;
    }
    let (bytes, _, had_errors) = WINDOWS_1252.encode(word);
    if had_errors {
        return None;
    }
    String::from_utf8(bytes.into_owned())
        .ok()
        .filter(|repaired| repaired != word)
}

/// Decode a response body: UTF-8 when valid, otherwise the server's Latin-1.
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_newlines() {
        assert_eq!(normalize("  Foro\n\tde   São Paulo \r\n"), "Foro de São Paulo");
        assert_eq!(normalize("a\u{a0}\u{a0}b"), "a b");
    }

    #[test]
    fn strips_delimiters() {
        assert_eq!(normalize(r#"Ação "de" cobrança; valor: 1,00"#), "Ação de cobrança valor: 100");
        assert_eq!(normalize("it's"), "its");
    }

    #[test]
    fn drops_control_characters() {
        assert_eq!(normalize("abc\u{0}\u{7}def"), "abcdef");
    }

    #[test]
    fn repairs_mojibake() {
        assert_eq!(normalize("SÃ£o Paulo"), "São Paulo");
        assert_eq!(normalize("ExecuÃ§Ã£o de SentenÃ§a"), "Execução de Sentença");
        assert_eq!(normalize("Ã“rgÃ£o julgador"), "Órgão julgador");
    }

    #[test]
    fn passes_through_unrepairable_accents() {
        assert_eq!(normalize("São Paulo"), "São Paulo");
        assert_eq!(normalize("Ã"), "Ã");
        assert_eq!(normalize("ÂNGULO"), "ÂNGULO");
    }

    #[test]
    fn empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\t ,; "), "");
    }

    #[test]
    fn idempotent() {
        let samples = [
            "",
            "already clean",
            "SÃ£o Paulo",
            "Ã,£",
            "ÃƒÂ£o",
            "  x , y ;; \"z\"  ",
            "tab\there\u{a0}nbsp",
            "Relator(a): Des. Fulano — 1ª Câmara",
            "\u{1}\u{2}\u{3}",
            "mixed São and SÃ£o",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn decodes_latin1_bodies() {
        assert_eq!(decode_body("São".as_bytes()), "São");
        assert_eq!(decode_body(&[0x53, 0xE3, 0x6F]), "São");
    }
}
