// tests/http_request.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use httpmock::prelude::*;
use restflow_jmes::JmesEvaluator;
use restflow_nodes::attachments::MemoryAttachmentStore;
use restflow_nodes::http::body::form_data_content_type;
use restflow_nodes::{
    register_all_nodes, Attachment, EmitEvent, Message, NodeError, NodeExecutionContext,
    NodeOutput, NodeRegistry, NodeServices, RecordingEmitter, Settings,
};
use serde_json::{json, Value};

struct Harness {
    registry: NodeRegistry,
    store: Arc<MemoryAttachmentStore>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryAttachmentStore::default());
        let services = NodeServices::new(Arc::new(JmesEvaluator::new()), store.clone(), Settings::default());
        let mut registry = NodeRegistry::new();
        register_all_nodes(&mut registry, &services);
        Self { registry, store }
    }

    async fn run(
        &self,
        node: &str,
        parameters: Value,
        message: Message,
    ) -> (Result<NodeOutput, NodeError>, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::default());
        let ctx = NodeExecutionContext {
            parameters,
            message,
            emitter: emitter.clone(),
        };
        let node = self.registry.get(node).expect("node registered");
        (node.execute(&ctx).await, emitter)
    }

    async fn action(&self, parameters: Value) -> (Result<NodeOutput, NodeError>, Arc<RecordingEmitter>) {
        self.run("httpRequestAction", parameters, Message::empty()).await
    }
}

/// JMESPath 字面量形式的 URL
fn url_literal(server: &MockServer, path: &str) -> String {
    format!("'{}'", server.url(path))
}

fn body_of(output: NodeOutput) -> Value {
    match output {
        NodeOutput::Message(msg) => msg.body,
        NodeOutput::Emitted => panic!("expected a returned message"),
    }
}

#[tokio::test]
async fn every_method_issues_one_request() -> anyhow::Result<()> {
    let harness = Harness::new();
    for (method, name) in [(GET, "GET"), (POST, "POST"), (PUT, "PUT"), (PATCH, "PATCH"), (DELETE, "DELETE")] {
        let server = MockServer::start();
        let mock = server.mock(move |when, then| {
            when.method(method).path("/items");
            then.status(200)
                .header("content-type", "application/json")
                .body(format!(r#"{{"method":"{name}","items":[1,2]}}"#));
        });

        let (output, _) = harness
            .action(json!({ "reader": { "url": url_literal(&server, "/items"), "method": name } }))
            .await;
        assert_eq!(body_of(output?), json!({ "method": name, "items": [1, 2] }));
        mock.assert();
    }
    Ok(())
}

#[tokio::test]
async fn url_and_body_evaluated_against_message() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/users/42")
            .header("x-request-id", "req-1")
            .body_includes(r#""name":"Ann""#);
        then.status(201).header("content-type", "application/json").body(r#"{"id":42}"#);
    });

    let params = json!({
        "reader": {
            "url": format!("join('', ['{}', to_string(id)])", server.url("/users/")),
            "method": "POST",
            "headers": [{ "key": "X-Request-Id", "value": "requestId" }],
            "body": { "contentType": "application/json", "raw": "{name: name}" }
        }
    });
    let message = Message::with_body(json!({ "id": 42, "requestId": "req-1", "name": "Ann" }));
    let (output, _) = harness.run("httpRequestAction", params, message).await;
    assert_eq!(body_of(output?), json!({ "id": 42 }));
    mock.assert();
    Ok(())
}

#[tokio::test]
async fn basic_auth_header_is_sent() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/secure").header("authorization", "Basic Sm9objpEb2U=");
        then.status(200).header("content-type", "application/json").body(r#"{"ok":true}"#);
    });

    let (output, _) = harness
        .action(json!({
            "reader": {
                "url": url_literal(&server, "/secure"),
                "method": "GET",
                "headers": [{ "key": "Authorization", "value": "'Basic stale'", "_type": "CREDS_HEADER_TYPE" }]
            },
            "auth": { "type": "Basic Auth", "basic": { "username": "John", "password": "Doe" } }
        }))
        .await;
    assert_eq!(body_of(output?), json!({ "ok": true }));
    mock.assert();
    Ok(())
}

#[tokio::test]
async fn xml_response_is_converted() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/xml");
        then.status(200).header("content-type", "application/xml").body("<xml>foo</xml>");
    });

    let (output, _) = harness
        .action(json!({ "reader": { "url": url_literal(&server, "/xml"), "method": "GET" } }))
        .await;
    assert_eq!(body_of(output?), json!({ "xml": "foo" }));
    Ok(())
}

#[tokio::test]
async fn malformed_xml_fails_even_in_dont_throw_mode() {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/xml");
        then.status(200).header("content-type", "application/xml").body("<xml>foo</xmlx>");
    });

    for dont_throw in [false, true] {
        let (output, _) = harness
            .action(json!({
                "reader": { "url": url_literal(&server, "/xml"), "method": "GET" },
                "dontThrowErrorFlg": dont_throw
            }))
            .await;
        assert!(matches!(output, Err(NodeError::Parse(_))));
    }
}

#[tokio::test]
async fn no_content_in_both_modes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(DELETE).path("/items/1");
        then.status(204);
    });
    let url = url_literal(&server, "/items/1");

    let (output, _) = harness.action(json!({ "reader": { "url": url, "method": "DELETE" } })).await;
    assert_eq!(body_of(output?), json!({}));

    let (output, _) = harness
        .action(json!({ "reader": { "url": url, "method": "DELETE" }, "dontThrowErrorFlg": true }))
        .await;
    let body = body_of(output?);
    assert_eq!(body["body"], json!({}));
    assert_eq!(body["statusCode"], 204);
    assert_eq!(body["statusMessage"], "No Content");
    assert!(body["headers"].is_object());
    Ok(())
}

#[tokio::test]
async fn not_found_in_both_modes() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404).header("content-type", "application/json").body(r#"{"error":"nope"}"#);
    });
    let url = url_literal(&server, "/missing");

    let (output, _) = harness.action(json!({ "reader": { "url": url, "method": "GET" } })).await;
    let err = output.unwrap_err();
    assert_eq!(err.to_string(), "Code: 404 Message: Not Found");
    assert_eq!(err.name(), "HTTP error");
    assert!(matches!(err, NodeError::HttpStatus { ref body, .. } if body == r#"{"error":"nope"}"#));

    let (output, _) = harness
        .action(json!({ "reader": { "url": url, "method": "GET" }, "dontThrowErrorFlg": true }))
        .await;
    let body = body_of(output?);
    assert_eq!(body["statusCode"], 404);
    assert_eq!(body["statusMessage"], "Not Found");
    assert_eq!(body["body"], json!({ "error": "nope" }));
    assert_eq!(body["headers"]["content-type"], "application/json");
    Ok(())
}

#[tokio::test]
async fn redirects_followed_unless_disabled() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/A");
        then.status(302)
            .header("location", "/B")
            .header("content-type", "application/json")
            .body(r#"{"moved":true}"#);
    });
    let target = server.mock(|when, then| {
        when.method(GET).path("/B");
        then.status(200).header("content-type", "application/json").body(r#"{"final":true}"#);
    });
    let url = url_literal(&server, "/A");

    let (output, _) = harness
        .action(json!({ "reader": { "url": url, "method": "GET" }, "followRedirect": "followRedirects" }))
        .await;
    assert_eq!(body_of(output?), json!({ "final": true }));
    target.assert();

    let (output, _) = harness
        .action(json!({ "reader": { "url": url, "method": "GET" }, "followRedirect": "doNotFollowRedirects" }))
        .await;
    assert_eq!(body_of(output?), json!({ "moved": true }));
    target.assert_calls(1);
    Ok(())
}

#[tokio::test]
async fn split_result_emits_items_sequentially() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/list");
        then.status(200).header("content-type", "application/json").body(r#"["a","b","c"]"#);
    });

    let (output, emitter) = harness
        .action(json!({ "reader": { "url": url_literal(&server, "/list"), "method": "GET" }, "splitResult": true }))
        .await;
    assert_eq!(output?, NodeOutput::Emitted);

    let events = emitter.events().await;
    assert_eq!(
        events,
        vec![
            EmitEvent::Data(Message::with_body(json!("a"))),
            EmitEvent::Data(Message::with_body(json!("b"))),
            EmitEvent::Data(Message::with_body(json!("c"))),
            EmitEvent::End,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn array_without_split_is_wrapped() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/list");
        then.status(200).header("content-type", "application/json").body(r#"["a","b"]"#);
    });

    let (output, emitter) = harness
        .action(json!({ "reader": { "url": url_literal(&server, "/list"), "method": "GET" } }))
        .await;
    assert_eq!(body_of(output?), json!({ "result": ["a", "b"] }));
    assert!(emitter.events().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn reboundable_status_emits_rebound_then_end() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/busy");
        then.status(408);
    });

    let (output, emitter) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/busy"), "method": "GET" },
            "enableRebound": true,
            "dontThrowErrorFlg": true
        }))
        .await;
    assert_eq!(output?, NodeOutput::Emitted);
    assert_eq!(
        emitter.events().await,
        vec![
            EmitEvent::Rebound("Code: 408 Message: Request Timeout".into()),
            EmitEvent::End
        ]
    );
    Ok(())
}

#[tokio::test]
async fn server_error_without_rebound_is_wrapped_in_dont_throw_mode() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/boom");
        then.status(500).header("content-type", "text/plain").body("boom");
    });

    let (output, emitter) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/boom"), "method": "GET" },
            "dontThrowErrorFlg": true
        }))
        .await;
    let body = body_of(output?);
    assert_eq!(body["statusCode"], 500);
    assert_eq!(body["body"], json!({ "result": "boom" }));
    assert_eq!(emitter.count("rebound").await, 0);
    Ok(())
}

fn oauth2_auth(server: &MockServer, expiry: &str) -> Value {
    json!({
        "type": "OAuth2",
        "oauth2": {
            "tokenUri": server.url("/token"),
            "clientId": "cid",
            "clientSecret": "csecret",
            "keys": {
                "access_token": "expired-token",
                "refresh_token": "refresh-1",
                "tokenExpiryTime": expiry
            }
        }
    })
}

#[tokio::test]
async fn expired_oauth2_token_is_refreshed_and_persisted() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .body_includes("grant_type=refresh_token")
            .body_includes("refresh_token=refresh-1")
            .body_includes("client_id=cid");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"access_token":"fresh-token","refresh_token":"refresh-2","expires_in":3600}"#);
    });
    let api = server.mock(|when, then| {
        when.method(GET).path("/data").header("authorization", "Bearer fresh-token");
        then.status(200).header("content-type", "application/json").body(r#"{"data":1}"#);
    });

    let (output, emitter) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/data"), "method": "GET" },
            "auth": oauth2_auth(&server, "2000-01-01T00:00:00Z")
        }))
        .await;
    assert_eq!(body_of(output?), json!({ "data": 1 }));
    token.assert();
    api.assert();

    let events = emitter.events().await;
    assert_eq!(events.len(), 1);
    let EmitEvent::UpdateKeys(keys) = &events[0] else {
        panic!("expected updateKeys, got {events:?}");
    };
    assert_eq!(keys["type"], "OAuth2");
    assert_eq!(keys["oauth2"]["keys"]["access_token"], "fresh-token");
    assert_eq!(keys["oauth2"]["keys"]["refresh_token"], "refresh-2");
    assert_eq!(keys["oauth2"]["keys"]["expires_in"], 3600);
    assert!(keys["oauth2"]["keys"]["tokenExpiryTime"].is_string());
    Ok(())
}

#[tokio::test]
async fn rejected_oauth2_refresh_is_auth_error() {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(401).body("invalid_grant");
    });
    let api = server.mock(|when, then| {
        when.method(GET).path("/data");
        then.status(200);
    });

    let (output, emitter) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/data"), "method": "GET" },
            "auth": oauth2_auth(&server, "2000-01-01T00:00:00Z")
        }))
        .await;
    let err = output.unwrap_err();
    assert!(matches!(err, NodeError::Auth(_)));
    assert_eq!(
        err.to_string(),
        "Error in authentication. Status code: 401, Body: invalid_grant"
    );
    assert!(emitter.events().await.is_empty());
    api.assert_calls(0);
}

#[tokio::test]
async fn refresh_response_without_refresh_token_fails() {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"access_token":"fresh-token"}"#);
    });

    let (output, _) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/data"), "method": "GET" },
            "auth": oauth2_auth(&server, "2000-01-01T00:00:00Z")
        }))
        .await;
    assert!(matches!(output, Err(NodeError::Auth(ref m)) if m.contains("access_type=offline")));
}

#[tokio::test]
async fn out_of_range_expires_in_is_auth_error() {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"access_token":"fresh-token","refresh_token":"refresh-2","expires_in":100000000000000000}"#);
    });
    let api = server.mock(|when, then| {
        when.method(GET).path("/data");
        then.status(200);
    });

    let (output, emitter) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/data"), "method": "GET" },
            "auth": oauth2_auth(&server, "2000-01-01T00:00:00Z")
        }))
        .await;
    assert!(matches!(output, Err(NodeError::Auth(ref m)) if m.contains("expires_in")));
    assert!(emitter.events().await.is_empty());
    api.assert_calls(0);
}

#[tokio::test]
async fn form_data_inlines_files_and_message_attachments() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/files/notes.txt");
        then.status(200).body("notes-content");
    });
    server.mock(|when, then| {
        when.method(GET).path("/files/report.csv");
        then.status(200).body("a,b\n1,2");
    });
    server.mock(|when, then| {
        when.method(GET).path("/files/gone");
        then.status(404);
    });
    let upload = server.mock(|when, then| {
        when.method(POST)
            .path("/upload")
            .header("content-type", form_data_content_type())
            .body_includes("Content-Disposition: form-data; name=\"title\"\r\n\r\nQ3\r\n")
            .body_includes("name=\"notes\"; filename=\"notes.txt\"")
            .body_includes("notes-content")
            .body_includes("name=\"report.csv\"; filename=\"report.csv\"\r\nContent-Type: text/csv")
            .body_includes("a,b\n1,2")
            .body_includes("--__X_ELASTICIO_BOUNDARY__--");
        then.status(200).header("content-type", "application/json").body(r#"{"uploaded":2}"#);
    });

    let mut attachments = BTreeMap::new();
    attachments.insert(
        "report.csv".to_string(),
        Attachment {
            url: server.url("/files/report.csv"),
            size: Some(7),
            content_type: Some("text/csv".into()),
        },
    );
    let message = Message::with_body(json!({ "title": "Q3" })).with_attachments(attachments);
    let params = json!({
        "reader": {
            "url": url_literal(&server, "/upload"),
            "method": "POST",
            "headers": [{ "key": "Content-Type", "value": "'multipart/form-data'" }],
            "body": {
                "contentType": "multipart/form-data",
                "formData": [
                    { "key": "title", "value": "title" },
                    { "key": "notes", "value": server.url("/files/notes.txt"), "filename": "notes.txt" },
                    { "key": "broken", "value": server.url("/files/gone"), "filename": "gone.bin" }
                ]
            }
        }
    });

    let (output, _) = harness.run("httpRequestAction", params, message).await;
    let NodeOutput::Message(outward) = output? else {
        panic!("expected a returned message");
    };
    assert_eq!(outward.body, json!({ "uploaded": 2 }));
    assert!(outward.attachments.contains_key("report.csv"));
    upload.assert();
    Ok(())
}

#[tokio::test]
async fn urlencoded_body_is_sent() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/form")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("a=1&b=two");
        then.status(200).header("content-type", "text/plain").body("saved");
    });

    let (output, _) = harness
        .run(
            "httpRequestAction",
            json!({
                "reader": {
                    "url": url_literal(&server, "/form"),
                    "method": "PUT",
                    "body": {
                        "contentType": "application/x-www-form-urlencoded",
                        "urlencoded": [{ "key": "a", "value": "'1'" }, { "key": "b", "value": "b" }]
                    }
                }
            }),
            Message::with_body(json!({ "b": "two" })),
        )
        .await;
    assert_eq!(body_of(output?), json!({ "result": "saved" }));
    mock.assert();
    Ok(())
}

#[tokio::test]
async fn binary_response_is_stored_as_attachment() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/report.pdf");
        then.status(200).header("content-type", "application/pdf").body("%PDF-1.4 data");
    });

    let (output, _) = harness
        .action(json!({ "reader": { "url": url_literal(&server, "/report.pdf"), "method": "GET" } }))
        .await;
    let NodeOutput::Message(outward) = output? else {
        panic!("expected a returned message");
    };
    assert_eq!(outward.body, json!({}));
    assert_eq!(outward.attachments.len(), 1);
    let (name, attachment) = outward.attachments.iter().next().expect("one attachment");
    assert!(name.ends_with(".pdf"));
    assert_eq!(attachment.url, "memory://0");
    assert_eq!(attachment.size, Some(13));

    let uploads = harness.store.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(&uploads[0].0[..], b"%PDF-1.4 data");
    Ok(())
}

#[tokio::test]
async fn override_treats_json_as_text() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/json");
        then.status(200).header("content-type", "application/json").body(r#"{"a":1}"#);
    });

    let (output, _) = harness
        .action(json!({
            "reader": { "url": url_literal(&server, "/json"), "method": "GET" },
            "overrideContentType": "treatAsText"
        }))
        .await;
    assert_eq!(body_of(output?), json!({ "result": r#"{"a":1}"# }));
    Ok(())
}

#[tokio::test]
async fn idempotent_get_yields_identical_output() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/stable");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"n":1,"nested":{"list":[true,null,"x"]}}"#);
    });
    let params = json!({ "reader": { "url": url_literal(&server, "/stable"), "method": "GET" } });

    let (first, _) = harness.action(params.clone()).await;
    let (second, _) = harness.action(params).await;
    let first = serde_json::to_vec(&body_of(first?))?;
    let second = serde_json::to_vec(&body_of(second?))?;
    assert_eq!(first, second);
    mock.assert_calls(2);
    Ok(())
}

#[tokio::test]
async fn passthrough_is_available_to_templates() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/from-step");
        then.status(200).header("content-type", "application/json").body(r#"{"ok":true}"#);
    });

    let message = Message::with_body(json!({}))
        .with_passthrough(json!({ "step_1": { "url": server.url("/from-step") } }));
    let (output, _) = harness
        .run(
            "httpRequestAction",
            json!({ "reader": { "url": "elasticio.step_1.url", "method": "GET" } }),
            message,
        )
        .await;
    assert_eq!(body_of(output?), json!({ "ok": true }));
    mock.assert();
    Ok(())
}

#[tokio::test]
async fn trigger_polls_with_empty_message() -> anyhow::Result<()> {
    let harness = Harness::new();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/poll");
        then.status(200).header("content-type", "application/json").body(r#"{"tick":1}"#);
    });

    let (output, _) = harness
        .run(
            "httpRequestTrigger",
            json!({ "reader": { "url": url_literal(&server, "/poll"), "method": "GET" } }),
            Message::empty(),
        )
        .await;
    assert_eq!(body_of(output?), json!({ "tick": 1 }));
    mock.assert();
    Ok(())
}

#[tokio::test]
async fn invalid_method_is_rejected() {
    let harness = Harness::new();
    let (output, _) = harness
        .action(json!({ "reader": { "url": "'http://127.0.0.1:1'", "method": "HEAD" } }))
        .await;
    assert_eq!(
        output.unwrap_err().to_string(),
        "Method \"HEAD\" isn't one of the: DELETE,GET,PATCH,POST,PUT."
    );
}

#[tokio::test]
async fn invalid_url_is_fatal_despite_rebound_and_dont_throw() {
    let harness = Harness::new();
    for flags in [json!({ "enableRebound": true }), json!({ "dontThrowErrorFlg": true })] {
        let mut params = json!({ "reader": { "url": "'not a url'", "method": "GET" } });
        params
            .as_object_mut()
            .unwrap()
            .extend(flags.as_object().unwrap().clone());

        let (output, emitter) = harness.action(params).await;
        let err = output.unwrap_err();
        assert!(matches!(err, NodeError::Config(ref m) if m.starts_with("Invalid URL")), "{err}");
        assert!(emitter.events().await.is_empty());
    }
}
