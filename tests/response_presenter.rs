mod common;
use common::MockServer;

use reqflow::models::StoredRequest;
use reqflow::services::lifecycle::RequestController;
use reqflow::services::logger::Logger;
use reqflow::services::presenter::{self, ContentClass, Rendering, ResponseView};
use reqflow::services::transport::HttpTransport;
use std::sync::Arc;

fn controller() -> RequestController {
    let transport = Arc::new(HttpTransport::new().expect("transport"));
    RequestController::new(Logger::new("test"), transport, None)
}

#[tokio::test]
async fn cookies_view_lists_set_cookie_values() {
    let server = MockServer::start().await;
    let controller = controller();
    controller
        .send(StoredRequest::get("req_cookie", server.url("/cookie")))
        .await
        .expect("send");

    let rendering = controller
        .view("req_cookie", ResponseView::Cookies)
        .expect("cookies view");
    assert_eq!(rendering.text(), Some("insomnia-test-cookie=value123"));

    let headers = controller
        .view("req_cookie", ResponseView::Headers)
        .expect("headers view");
    assert!(headers
        .text()
        .expect("text")
        .lines()
        .any(|line| line == "Set-Cookie: insomnia-test-cookie=value123"));

    let console = controller
        .view("req_cookie", ResponseView::Console)
        .expect("console view");
    assert!(console
        .text()
        .expect("text")
        .lines()
        .any(|line| line == "< Set-Cookie: insomnia-test-cookie=value123"));
}

#[tokio::test]
async fn csv_defaults_to_raw_data() {
    let server = MockServer::start().await;
    let controller = controller();
    let snapshot = controller
        .send(StoredRequest::get("req_csv", server.url("/csv")))
        .await
        .expect("send");
    let response = snapshot.response.as_ref().expect("response");

    let class = presenter::classify(response.content_type.as_deref(), &response.body);
    assert_eq!(class, ContentClass::Csv);
    assert_eq!(presenter::default_view(class), ResponseView::RawData);
    assert_eq!(snapshot.to_json()["default_view"], "raw_data");
    assert_eq!(
        presenter::render(response, &snapshot.timeline, ResponseView::RawData).text(),
        Some("name,count\nalpha,1\nbeta,2\n")
    );
}

#[tokio::test]
async fn pdf_preview_is_a_binary_summary() {
    let server = MockServer::start().await;
    let controller = controller();
    controller
        .send(StoredRequest::get("req_pdf", server.url("/pdf")))
        .await
        .expect("send");

    match controller
        .view("req_pdf", ResponseView::Preview)
        .expect("preview")
    {
        Rendering::Binary {
            mime_type, size, ..
        } => {
            assert_eq!(mime_type, "application/pdf");
            assert!(size > 0);
        }
        other => panic!("expected binary rendering, got {:?}", other),
    }

    let console = controller
        .view("req_pdf", ResponseView::Console)
        .expect("console");
    assert!(console
        .text()
        .expect("text")
        .lines()
        .any(|line| line == "< Content-Type: application/pdf"));
}

#[tokio::test]
async fn json_preview_is_pretty_printed() {
    let server = MockServer::start().await;
    let controller = controller();
    controller
        .send(StoredRequest::get("req_json", server.url("/json")))
        .await
        .expect("send");

    let preview = controller
        .view("req_json", ResponseView::Preview)
        .expect("preview");
    assert_eq!(preview.text(), Some("{\n  \"id\": \"1\"\n}"));

    let raw = controller
        .view("req_json", ResponseView::RawData)
        .expect("raw data");
    assert_eq!(raw.text(), Some(r#"{"id":"1"}"#));
    let status = controller.status("req_json").expect("status");
    assert_eq!(
        status.response.as_ref().expect("response").status_tag(),
        "200 OK"
    );

    let xml = controller
        .send(StoredRequest::get("req_xml", server.url("/xml")))
        .await
        .expect("send xml");
    let response = xml.response.as_ref().expect("response");
    assert_eq!(
        presenter::classify(response.content_type.as_deref(), &response.body),
        ContentClass::Xml
    );
}
