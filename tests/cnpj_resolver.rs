//! Resolver tests: plain HTTP search first, rendered page fallback second.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meli_enricher::cnpj_finder::{
    build_search_client, AutomationError, CnpjLookup, CnpjResolver, PageRenderer,
    AUTOMATION_ERROR, BOT_DETECTION_MARKER, NOT_FOUND, TARGET_SITES,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records every rendered URL and answers with a canned page.
#[derive(Clone)]
struct FakeRenderer {
    calls: Arc<Mutex<Vec<String>>>,
    page: Option<String>,
}

impl FakeRenderer {
    fn returning(html: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            page: Some(html.to_string()),
        }
    }

    fn failing() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            page: None,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, url: &str) -> Result<String, AutomationError> {
        self.calls.lock().unwrap().push(url.to_string());
        match &self.page {
            Some(html) => Ok(html.clone()),
            None => Err(AutomationError::Profile(io::Error::new(
                io::ErrorKind::Other,
                "chromedriver unavailable",
            ))),
        }
    }
}

fn result_page(blocks: &[&str]) -> String {
    let body: String = blocks
        .iter()
        .map(|text| format!("<div class=\"g\">{}</div>", text))
        .collect();
    format!("<html><body><div id=\"rso\">{}</div></body></html>", body)
}

fn resolver(server: &MockServer, renderer: FakeRenderer) -> CnpjResolver<FakeRenderer> {
    CnpjResolver::new(
        reqwest::Client::new(),
        &format!("{}/search", server.uri()),
        renderer,
    )
}

#[tokio::test]
async fn fast_path_hit_skips_browser() {
    let server = MockServer::start().await;
    let expected_query = format!("\"storeX\" \"Recife\" {}", TARGET_SITES);

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", expected_query.as_str()))
        .and(query_param("gl", "br"))
        .and(query_param("hl", "pt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(result_page(&[
            "Outra Empresa Ltda 99.888.777/0001-66",
            "STOREX COMERCIO - Recife PE - CNPJ 12.345.678/0001-90",
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let renderer = FakeRenderer::returning("<html></html>");
    let cnpj = resolver(&server, renderer.clone())
        .resolve(".storeX.", "Recife")
        .await;

    assert_eq!(cnpj, "12.345.678/0001-90");
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn bot_detection_page_falls_back_to_browser() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><body>{} 11.111.111/0001-11</body></html>",
            BOT_DETECTION_MARKER
        )))
        .mount(&server)
        .await;

    let renderer = FakeRenderer::returning(&result_page(&[
        "Loja Azul - Curitiba - 22.333.444/0001-55",
    ]));
    let cnpj = resolver(&server, renderer.clone())
        .resolve("LojaAzul", "Curitiba")
        .await;

    assert_eq!(cnpj, "22.333.444/0001-55");
    let calls = renderer.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with(&format!("{}/search?q=", server.uri())));
    assert!(calls[0].ends_with("&gl=br&hl=pt"));
}

#[tokio::test]
async fn no_match_anywhere_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(result_page(&["nothing here"])))
        .mount(&server)
        .await;

    let renderer = FakeRenderer::returning(&result_page(&["still nothing"]));
    let cnpj = resolver(&server, renderer.clone())
        .resolve("semcnpj", "Natal")
        .await;

    assert_eq!(cnpj, NOT_FOUND);
    assert_eq!(renderer.calls().len(), 1);
}

#[tokio::test]
async fn server_error_falls_back_to_browser() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let renderer = FakeRenderer::returning(&result_page(&["33.444.555/0001-66"]));
    let cnpj = resolver(&server, renderer.clone())
        .resolve("qualquer", "Belem")
        .await;

    assert_eq!(cnpj, "33.444.555/0001-66");
    assert_eq!(renderer.calls().len(), 1);
}

#[tokio::test]
async fn browser_failure_is_automation_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(result_page(&[])))
        .mount(&server)
        .await;

    let renderer = FakeRenderer::failing();
    let cnpj = resolver(&server, renderer.clone())
        .resolve("qualquer", "Belem")
        .await;

    assert_eq!(cnpj, AUTOMATION_ERROR);
    assert_eq!(renderer.calls().len(), 1);
}

#[tokio::test]
async fn unreachable_search_engine_falls_back_to_browser() {
    let renderer = FakeRenderer::returning(&result_page(&["44.555.666/0001-77"]));
    let resolver = CnpjResolver::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1/search",
        renderer.clone(),
    );

    let cnpj = resolver.resolve("qualquer", "Belem").await;

    assert_eq!(cnpj, "44.555.666/0001-77");
    let calls = renderer.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("http://127.0.0.1:1/search?q="));
}

#[tokio::test]
async fn nickname_dots_are_stripped_only_once() {
    let server = MockServer::start().await;
    let expected_query = format!("\".dupla.\" \"Natal\" {}", TARGET_SITES);

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", expected_query.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(result_page(&[
            "Dupla Comercio - Natal RN - 55.666.777/0001-88",
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let renderer = FakeRenderer::failing();
    let resolver = resolver(&server, renderer.clone());

    // Records already carry the sanitized nickname
    let from_record = resolver.find_cnpj(".dupla.", "Natal").await;
    let from_raw = resolver.resolve("..dupla..", "Natal").await;

    assert_eq!(from_record, "55.666.777/0001-88");
    assert_eq!(from_raw, "55.666.777/0001-88");
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn search_client_does_not_replay_cookies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "NID=tracking; Path=/")
                .set_body_string(result_page(&["66.777.888/0001-99"])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let resolver = CnpjResolver::new(
        build_search_client().unwrap(),
        &format!("{}/search", server.uri()),
        FakeRenderer::failing(),
    );

    resolver.resolve("primeira", "Natal").await;
    resolver.resolve("segunda", "Natal").await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|request| request.headers.get("cookie").is_none()));
}

#[test]
fn search_url_is_percent_encoded() {
    let resolver = CnpjResolver::new(
        reqwest::Client::new(),
        "https://search.test/search",
        FakeRenderer::failing(),
    );
    let url = resolver.search_page_url("\"a b\" \"c\"");
    assert_eq!(
        url,
        "https://search.test/search?q=%22a%20b%22%20%22c%22&gl=br&hl=pt"
    );
}
