//! Decrypt streaming integration tests.

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use http::header::CONTENT_TYPE;
    use serde_json::json;

    use crate::{
        Origin, TestGateway, http_client, http_mount, local_mount, seal_container,
    };

    const PASSWORD: &str = "correct horse battery staple";

    fn report_plaintext() -> Vec<u8> {
        b"%PDF-1.7\nquarterly report body that spans several encrypted frames\n%%EOF\n".repeat(4)
    }

    #[tokio::test]
    async fn test_should_serve_remote_container_as_pdf() {
        let origin = Origin::start().await;
        let plaintext = report_plaintext();
        origin.put(
            "/files/report.sccgpdf",
            "application/octet-stream",
            seal_container(&plaintext, PASSWORD, None),
        );
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[("encv_decrypt_password", PASSWORD)],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/d/remote/report.sccgpdf"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
        assert_eq!(response.bytes().await.expect("body").as_ref(), plaintext.as_slice());
    }

    #[tokio::test]
    async fn test_should_serve_local_container_through_proxy_entry() {
        let dir = tempfile::tempdir().expect("temp dir");
        let plaintext = b"plain words inside a text container".repeat(3);
        std::fs::write(
            dir.path().join("notes.sccgt"),
            seal_container(&plaintext, PASSWORD, None),
        )
        .expect("write container");
        let gateway = TestGateway::start(
            &json!([local_mount("/", dir.path())]),
            &[("encv_decrypt_password", PASSWORD)],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/p/notes.sccgt"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.bytes().await.expect("body").as_ref(), plaintext.as_slice());
    }

    #[tokio::test]
    async fn test_should_return_500_without_decrypt_password_and_never_fetch() {
        let origin = Origin::start().await;
        origin.put(
            "/files/movie.sccgv",
            "application/octet-stream",
            seal_container(b"frames", PASSWORD, None),
        );
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/d/remote/movie.sccgv"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        let page = response.text().await.expect("body");
        assert!(page.contains("Decryption key not configured"));
        assert!(
            origin
                .requests()
                .iter()
                .all(|r| r.method == http::Method::HEAD),
            "container content must not be fetched"
        );
    }

    #[tokio::test]
    async fn test_should_pick_up_password_after_settings_refresh() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("clip.sccgv"),
            seal_container(b"moving pictures", PASSWORD, None),
        )
        .expect("write container");
        let gateway = TestGateway::start(&json!([local_mount("/", dir.path())]), &[]).await;
        let client = http_client();

        let before = client
            .get(gateway.url("/d/clip.sccgv"))
            .send()
            .await
            .expect("request");
        assert_eq!(before.status(), StatusCode::INTERNAL_SERVER_ERROR);

        gateway.set("encv_decrypt_password", PASSWORD);
        let after = client
            .get(gateway.url("/d/clip.sccgv"))
            .send()
            .await
            .expect("request");
        assert_eq!(after.status(), StatusCode::OK);
        assert_eq!(after.headers()[CONTENT_TYPE], "video/mp4");
        assert_eq!(after.bytes().await.expect("body").as_ref(), b"moving pictures");
    }

    #[tokio::test]
    async fn test_should_return_500_for_wrong_password() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("photo.sccgi"),
            seal_container(b"pixels", PASSWORD, None),
        )
        .expect("write container");
        let gateway = TestGateway::start(
            &json!([local_mount("/", dir.path())]),
            &[("encv_decrypt_password", "not the password")],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/d/photo.sccgi"))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_should_return_500_when_container_fetch_fails() {
        let origin = Origin::start().await;
        origin.put_failing_get(
            "/files/gone.sccgv",
            StatusCode::NOT_FOUND,
            "application/octet-stream",
            seal_container(b"frames", PASSWORD, None),
        );
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[("encv_decrypt_password", PASSWORD)],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/d/remote/gone.sccgv"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[tokio::test]
    async fn test_should_fetch_keyfile_through_public_url() {
        let origin = Origin::start().await;
        let keyfile = b"0123456789abcdef-keyfile-material";
        origin.put("/files/vault/key.bin", "application/octet-stream", keyfile.to_vec());
        origin.put(
            "/files/vault/secret.sccgt",
            "application/octet-stream",
            seal_container(b"needs both secrets", PASSWORD, Some(("key.bin", keyfile))),
        );
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[("encv_decrypt_password", PASSWORD)],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/p/remote/vault/secret.sccgt"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.bytes().await.expect("body").as_ref(), b"needs both secrets");
        assert!(
            origin
                .requests()
                .iter()
                .any(|r| r.method == http::Method::GET && r.uri == "/files/vault/key.bin"),
            "keyfile should be fetched via the gateway's own download entry"
        );
    }

    #[tokio::test]
    async fn test_should_truncate_response_when_container_is_cut_short() {
        let origin = Origin::start().await;
        let mut sealed = seal_container(&report_plaintext(), PASSWORD, None);
        sealed.truncate(sealed.len() - 10);
        origin.put("/files/cut.sccgpdf", "application/octet-stream", sealed);
        let gateway = TestGateway::start(
            &json!([http_mount("/remote", &origin.url("/files"))]),
            &[("encv_decrypt_password", PASSWORD)],
        )
        .await;

        let response = http_client()
            .get(gateway.url("/d/remote/cut.sccgpdf"))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.bytes().await.is_err(),
            "a container missing its final frame must not look complete"
        );
    }
}
