//! First-instance movement table (`#tabelaTodasMovimentacoes`).

use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use super::{Record, RecordKind};
use crate::parser::fields::{own_text, text_of};

static ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#tabelaTodasMovimentacoes tr").unwrap());
static DATE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".dataMovimentacao").unwrap());
static DESCRIPTION_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".descricaoMovimentacao").unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static DETAIL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());

/// One record per movement row, in page order (newest first). `seq` counts
/// from the oldest row at the bottom, so an event keeps its `seq` when newer
/// ones are added above it. Rows without date and title (spacers) are
/// dropped before numbering.
pub fn movements(page: ElementRef<'_>, numero_processo: &str) -> Vec<Record> {
    let rows: Vec<_> = page.select(&ROWS).filter_map(movement).collect();
    let total = rows.len();
    rows.into_iter()
        .enumerate()
        .map(|(i, (data, titulo, descricao))| {
            Record::new(RecordKind::Movement)
                .with("numero_processo", numero_processo)
                .with("seq", (total - 1 - i).to_string())
                .with("data", data)
                .with("titulo", titulo)
                .with("descricao", descricao)
        })
        .collect()
}

fn movement(row: ElementRef<'_>) -> Option<(String, String, String)> {
    let data = text_of(row, &DATE);
    let (titulo, descricao) = match row.select(&DESCRIPTION_CELL).next() {
        Some(cell) => {
            let linked = text_of(cell, &LINK);
            let titulo = if linked.is_empty() { own_text(cell) } else { linked };
            (titulo, text_of(cell, &DETAIL))
        }
        None => (String::new(), String::new()),
    };

    if data.is_empty() && titulo.is_empty() {
        None
    } else {
        Some((data, titulo, descricao))
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;
    use crate::db::Store;

    const TABLE: &str = r##"
        <table>
          <tbody id="tabelaTodasMovimentacoes">
            <tr class="containerMovimentacao">
              <td class="dataMovimentacao">12/02/2024</td>
              <td class="descricaoMovimentacao">
                Conclusos para Sentença
              </td>
            </tr>
            <tr class="containerMovimentacao">
              <td class="dataMovimentacao">09/02/2024</td>
              <td class="descricaoMovimentacao">
                <a class="linkMovVincProc" href="#">Julgada Procedente a Ação</a>
                <span style="font-style: italic;">Vistos, etc.</span>
              </td>
            </tr>
            <tr><td></td><td></td></tr>
            <tr class="containerMovimentacao">
              <td class="dataMovimentacao">01/02/2024</td>
              <td class="descricaoMovimentacao">Juntada de Petição <span>Réplica</span></td>
            </tr>
          </tbody>
        </table>"##;

    #[test]
    fn rows_in_order_with_seq() {
        let doc = Html::parse_fragment(TABLE);
        let moves = movements(doc.root_element(), "P1");
        assert_eq!(moves.len(), 3);

        assert_eq!(moves[0].key(), &["P1".to_string(), "2".to_string()][..]);
        assert_eq!(moves[0].get("data"), "12/02/2024");
        assert_eq!(moves[0].get("titulo"), "Conclusos para Sentença");
        assert_eq!(moves[0].get("descricao"), "");

        assert_eq!(moves[1].get("titulo"), "Julgada Procedente a Ação");
        assert_eq!(moves[1].get("descricao"), "Vistos etc.");

        assert_eq!(moves[2].get("seq"), "0");
        assert_eq!(moves[2].get("titulo"), "Juntada de Petição");
        assert_eq!(moves[2].get("descricao"), "Réplica");
    }

    fn docket(events: &[(&str, &str)]) -> String {
        let rows: String = events
            .iter()
            .map(|(data, titulo)| {
                format!(
                    r#"<tr><td class="dataMovimentacao">{}</td><td class="descricaoMovimentacao">{}</td></tr>"#,
                    data, titulo
                )
            })
            .collect();
        format!(r#"<table><tbody id="tabelaTodasMovimentacoes">{}</tbody></table>"#, rows)
    }

    #[test]
    fn new_event_on_top_keeps_older_seqs() {
        let before = Html::parse_fragment(&docket(&[
            ("02/01/2024", "Segundo"),
            ("01/01/2024", "Primeiro"),
        ]));
        let after = Html::parse_fragment(&docket(&[
            ("03/01/2024", "Terceiro"),
            ("02/01/2024", "Segundo"),
            ("01/01/2024", "Primeiro"),
        ]));

        let store = Store::open_in_memory().unwrap();
        let first = movements(before.root_element(), "P1");
        assert_eq!(store.insert_missing(&first).unwrap(), 2);
        let second = movements(after.root_element(), "P1");
        assert_eq!(store.insert_missing(&second).unwrap(), 1);

        let titulo = |seq: &str| {
            store
                .get(RecordKind::Movement, &["P1", seq])
                .unwrap()
                .map(|r| r.get("titulo").to_string())
        };
        assert_eq!(titulo("0").as_deref(), Some("Primeiro"));
        assert_eq!(titulo("1").as_deref(), Some("Segundo"));
        assert_eq!(titulo("2").as_deref(), Some("Terceiro"));
        assert_eq!(titulo("3"), None);
    }

    #[test]
    fn no_table_no_rows() {
        let doc = Html::parse_fragment("<div>Sem movimentações</div>");
        assert!(movements(doc.root_element(), "P1").is_empty());
    }
}
