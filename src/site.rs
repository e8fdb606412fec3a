//! URL templates for every e-SAJ endpoint the pipeline touches.

use chrono::{Local, NaiveDate};

#[derive(Debug, Clone)]
pub struct Site {
    base: String,
}

impl Site {
    pub fn new(base_url: &str) -> Self {
        Site {
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    // ── First-instance judgments (cjpg) ──

    pub fn cjpg_search(&self, query: &str) -> String {
        self.cjpg_search_until(query, Local::now().date_naive())
    }

    /// Search ordered by date, newest first, with judgments up to `until`.
    pub fn cjpg_search_until(&self, query: &str, until: NaiveDate) -> String {
        format!(
            "{}/cjpg/pesquisar.do?conversationId=&dadosConsulta.pesquisaLivre={}\
             &tipoNumero=UNIFICADO&numeroDigitoAnoUnificado=&foroNumeroUnificado=\
             &dadosConsulta.nuProcesso=&dadosConsulta.nuProcessoAntigo=\
             &classeTreeSelection.values=&classeTreeSelection.text=\
             &assuntoTreeSelection.values=&assuntoTreeSelection.text=\
             &agenteSelectedEntitiesList=&contadoragente=0&contadorMaioragente=0\
             &cdAgente=&nmAgente=&dadosConsulta.dtInicio=&dadosConsulta.dtFim={}\
             &varasTreeSelection.values=&varasTreeSelection.text=&dadosConsulta.ordenacao=DESC",
            self.base,
            urlencoding::encode(query),
            urlencoding::encode(&until.format("%d/%m/%Y").to_string()),
        )
    }

    pub fn cjpg_page(&self, page: u32) -> String {
        format!("{}/cjpg/trocarDePagina.do?pagina={}", self.base, page)
    }

    pub fn cjpg_document(
        &self,
        cd_processo: &str,
        cd_foro: &str,
        nm_alias: &str,
        cd_documento: &str,
    ) -> String {
        format!(
            "{}/cjpg/obterArquivo.do?cdProcesso={}&cdForo={}&nmAlias={}&cdDocumento={}",
            self.base, cd_processo, cd_foro, nm_alias, cd_documento
        )
    }

    // ── Second-instance judgments (cjsg) ──

    pub fn cjsg_search(&self, query: &str) -> String {
        format!(
            "{}/cjsg/resultadoCompleta.do?conversationId=&dados.buscaInteiroTeor={}\
             &dados.pesquisarComSinonimos=S&dados.pesquisarComSinonimos=S&dados.buscaEmenta=\
             &dados.nuProcOrigem=&dados.nuRegistro=&agenteSelectedEntitiesList=&contadoragente=0\
             &contadorMaioragente=0&codigoCr=&codigoTr=&nmAgente=&juizProlatorSelectedEntitiesList=\
             &contadorjuizProlator=0&contadorMaiorjuizProlator=0&codigoJuizCr=&codigoJuizTr=&nmJuiz=\
             &classesTreeSelection.values=&classesTreeSelection.text=&assuntosTreeSelection.values=\
             &assuntosTreeSelection.text=&comarcaSelectedEntitiesList=&contadorcomarca=0\
             &contadorMaiorcomarca=0&cdComarca=&nmComarca=&secoesTreeSelection.values=\
             &secoesTreeSelection.text=&dados.dtJulgamentoInicio=&dados.dtJulgamentoFim=\
             &dados.dtPublicacaoInicio=&dados.dtPublicacaoFim=&dados.origensSelecionadas=T\
             &tipoDecisaoSelecionados=A&dados.ordenarPor=dtPublicacao",
            self.base,
            urlencoding::encode(query),
        )
    }

    pub fn cjsg_page(&self, page: u32) -> String {
        format!(
            "{}/cjsg/trocaDePagina.do?tipoDeDecisao=A&pagina={}",
            self.base, page
        )
    }

    // ── Case detail (cpopg / cposg) ──

    /// Case-number lookup; `family` is "cpopg" or "cposg".
    pub fn case_search(&self, family: &str, key: &str) -> String {
        format!(
            "{}/{}/search.do?conversationId=&paginaConsulta=0&cbPesquisa=NUMPROC\
             &numeroDigitoAnoUnificado=&foroNumeroUnificado=&dePesquisaNuUnificado=\
             &dePesquisaNuUnificado=UNIFICADO&dePesquisa={}&tipoNuProcesso=SAJ",
            self.base,
            family,
            urlencoding::encode(key),
        )
    }

    pub fn case_show(&self, family: &str, code: &str) -> String {
        format!(
            "{}/{}/show.do?processo.codigo={}",
            self.base,
            family,
            urlencoding::encode(code)
        )
    }

    /// Resolve an href found on a `family` page against the site.
    pub fn absolute(&self, family: &str, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{}{}", self.base, href)
        } else {
            format!("{}/{}/{}", self.base, family, href)
        }
    }

    /// Second-instance lookup linked from a first-instance case page.
    pub fn cpopg_consulta_sg(
        &self,
        nu_processo: &str,
        cd_processo_sg: &str,
        cd_foro_sg: &str,
        is_processo_origem_cr: &str,
    ) -> String {
        format!(
            "{}/cpopg/abrirConsultaProcessoSG.do?nuProcesso={}&cdProcessoSg={}&cdForoSg={}&isProcessoOrigemCr={}",
            self.base,
            urlencoding::encode(nu_processo),
            urlencoding::encode(cd_processo_sg),
            urlencoding::encode(cd_foro_sg),
            urlencoding::encode(is_processo_origem_cr),
        )
    }

    pub fn cposg_movement_access(
        &self,
        cd_documento: &str,
        origem_recurso: &str,
        cd_processo: &str,
    ) -> String {
        format!(
            "{}/cposg/verificarAcessoMovimentacao.do?cdDocumento={}&origemRecurso={}&cdProcesso={}",
            self.base, cd_documento, origem_recurso, cd_processo
        )
    }

    pub fn pdf(&self, parametros: &str) -> String {
        format!("{}/pastadigital/getPDF.do?{}", self.base, parametros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Site {
        Site::new("https://esaj.tjsp.jus.br/")
    }

    #[test]
    fn search_query_is_encoded() {
        let until = NaiveDate::from_ymd_opt(2024, 2, 9).unwrap();
        let url = site().cjpg_search_until("dano moral & cia", until);
        assert!(url.starts_with("https://esaj.tjsp.jus.br/cjpg/pesquisar.do?"));
        assert!(url.contains("pesquisaLivre=dano%20moral%20%26%20cia&"));
        assert!(url.contains("dtFim=09%2F02%2F2024&"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn page_urls() {
        assert_eq!(
            site().cjpg_page(3),
            "https://esaj.tjsp.jus.br/cjpg/trocarDePagina.do?pagina=3"
        );
        assert_eq!(
            site().cjsg_page(2),
            "https://esaj.tjsp.jus.br/cjsg/trocaDePagina.do?tipoDeDecisao=A&pagina=2"
        );
    }

    #[test]
    fn case_lookup_substitutes_key() {
        let url = site().case_search("cpopg", "1000123-45.2023.8.26.0100");
        assert!(url.contains("/cpopg/search.do?"));
        assert!(url.contains("dePesquisa=1000123-45.2023.8.26.0100&"));
    }

    #[test]
    fn absolute_links() {
        let s = site();
        assert_eq!(
            s.absolute("cpopg", "/cpopg/show.do?processo.codigo=X"),
            "https://esaj.tjsp.jus.br/cpopg/show.do?processo.codigo=X"
        );
        assert_eq!(
            s.absolute("cpopg", "show.do?processo.codigo=X"),
            "https://esaj.tjsp.jus.br/cpopg/show.do?processo.codigo=X"
        );
        assert_eq!(
            s.absolute("cpopg", "https://other/x"),
            "https://other/x"
        );
    }
}
