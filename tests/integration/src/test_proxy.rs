//! Redirect and plain proxy integration tests.

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use http::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
    use serde_json::json;

    use crate::{Origin, TestGateway, http_client, http_mount, local_mount};

    const README: &str = "# Release notes\n\nFixed *everything*.\n\n<script>alert('owned')</script>\n";

    async fn origin_with_files() -> Origin {
        let origin = Origin::start().await;
        origin.put("/files/README.md", "text/markdown", README);
        origin.put("/files/archive.zip", "application/zip", &b"PK\x03\x04zipdata"[..]);
        origin
    }

    #[tokio::test]
    async fn test_should_redirect_download_to_storage_link() {
        let origin = origin_with_files().await;
        let gateway =
            TestGateway::start(&json!([http_mount("/remote", &origin.url("/files"))]), &[]).await;

        let response = http_client()
            .get(gateway.url("/d/remote/archive.zip"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], origin.url("/files/archive.zip"));
        assert_eq!(response.headers()["referrer-policy"], "no-referrer");
    }

    #[tokio::test]
    async fn test_should_forward_query_on_redirect_when_enabled() {
        let origin = origin_with_files().await;
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[("forward_direct_link_params", "true")],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/d/remote/archive.zip?sign=abc&token=t1"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[LOCATION].to_str().expect("ascii location");
        assert!(location.contains("token=t1"), "{location}");
        assert!(!location.contains("sign="), "{location}");
    }

    #[tokio::test]
    async fn test_should_refuse_proxy_for_non_text_types() {
        let origin = origin_with_files().await;
        let gateway =
            TestGateway::start(&json!([http_mount("/remote", &origin.url("/files"))]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/remote/archive.zip"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.text().await.expect("body").contains("proxy not allowed"));
        assert!(
            origin.requests().iter().all(|r| r.method == http::Method::HEAD),
            "refused content must not be fetched"
        );
    }

    #[tokio::test]
    async fn test_should_render_markdown_as_sanitized_html() {
        let origin = origin_with_files().await;
        let gateway =
            TestGateway::start(&json!([http_mount("/remote", &origin.url("/files"))]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/remote/README.md"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        let html = response.text().await.expect("body");
        assert!(html.contains("<h1>Release notes</h1>"), "{html}");
        assert!(html.contains("<em>everything</em>"), "{html}");
        assert!(!html.contains("<script"), "{html}");
    }

    #[tokio::test]
    async fn test_should_pass_raw_markdown_through() {
        let origin = origin_with_files().await;
        let gateway =
            TestGateway::start(&json!([http_mount("/remote", &origin.url("/files"))]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/remote/README.md?raw=true"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/markdown");
        assert_eq!(response.text().await.expect("body"), README);
    }

    #[tokio::test]
    async fn test_should_surface_upstream_not_found() {
        let origin = origin_with_files().await;
        let gateway =
            TestGateway::start(&json!([http_mount("/remote", &origin.url("/files"))]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/remote/missing.md"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[tokio::test]
    async fn test_should_pass_upstream_error_body_through_unrendered() {
        let origin = Origin::start().await;
        let error_body = "# down\n\n<script>x</script>\n";
        origin.put_failing_get(
            "/files/STATUS.md",
            StatusCode::SERVICE_UNAVAILABLE,
            "text/markdown",
            error_body,
        );
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[("filter_readme_scripts", "true")],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/p/remote/STATUS.md"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/markdown");
        assert_eq!(response.text().await.expect("body"), error_body);
    }

    #[tokio::test]
    async fn test_should_treat_short_raw_flag_as_passthrough() {
        let origin = origin_with_files().await;
        let gateway =
            TestGateway::start(&json!([http_mount("/remote", &origin.url("/files"))]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/remote/README.md?raw=t"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.expect("body"), README);
    }

    #[tokio::test]
    async fn test_should_serve_local_byte_range() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("video.bin"), b"0123456789").expect("write file");
        let gateway = TestGateway::start(&json!([local_mount("/", dir.path())]), &[]).await;

        let response = http_client()
            .get(gateway.url("/d/video.bin"))
            .header(RANGE, "bytes=2-5")
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.bytes().await.expect("body").as_ref(), b"2345");
    }

    #[tokio::test]
    async fn test_should_reject_unsatisfiable_range() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("video.bin"), b"0123456789").expect("write file");
        let gateway = TestGateway::start(&json!([local_mount("/", dir.path())]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/video.bin"))
            .header(RANGE, "bytes=50-60")
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */10");
    }

    #[tokio::test]
    async fn test_should_decode_percent_encoded_paths() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir(dir.path().join("my docs")).expect("create dir");
        std::fs::write(dir.path().join("my docs/a b.txt"), b"spaced out").expect("write file");
        let gateway = TestGateway::start(&json!([local_mount("/", dir.path())]), &[]).await;

        let response = http_client()
            .get(gateway.url("/p/my%20docs/a%20b.txt"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.expect("body"), "spaced out");
    }
}
