//! Server surface tests: health, routing, method handling.

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::{Value, json};

    use crate::{TestGateway, http_client, local_mount};

    async fn gateway() -> (TestGateway, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("hello.txt"), b"hello").expect("write file");
        let gateway = TestGateway::start(&json!([local_mount("/", dir.path())]), &[]).await;
        (gateway, dir)
    }

    #[tokio::test]
    async fn test_should_report_health() {
        let (gateway, _dir) = gateway().await;
        let response = http_client()
            .get(gateway.url("/health"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["status"], "running");
        assert_eq!(body["service"], "relaygate");
    }

    #[tokio::test]
    async fn test_should_tag_responses_with_request_id() {
        let (gateway, _dir) = gateway().await;
        let response = http_client()
            .get(gateway.url("/p/hello.txt"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["server"], "RelayGate");
        assert_eq!(response.text().await.expect("body"), "hello");
    }

    #[tokio::test]
    async fn test_should_reject_non_get_methods() {
        let (gateway, _dir) = gateway().await;
        let response = http_client()
            .post(gateway.url("/d/hello.txt"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET");
    }

    #[tokio::test]
    async fn test_should_return_404_outside_entry_points() {
        let (gateway, _dir) = gateway().await;
        let client = http_client();
        for path in ["/", "/files/hello.txt", "/download/hello.txt"] {
            let response = client.get(gateway.url(path)).send().await.expect("request");
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        }
    }

    #[tokio::test]
    async fn test_should_serve_concurrent_requests() {
        let (gateway, _dir) = gateway().await;
        let client = http_client();
        let requests = (0..8).map(|_| {
            let client = client.clone();
            let url = gateway.url("/p/hello.txt");
            async move { client.get(url).send().await.expect("request").text().await }
        });

        let handles: Vec<_> = requests.map(tokio::spawn).collect();
        for handle in handles {
            let body = handle.await.expect("task").expect("body");
            assert_eq!(body, "hello");
        }
    }
}
