#![allow(missing_docs)]

use axum::body::Body;
use axum::http::{Method, StatusCode};
use axum::routing::get;
use fixture_server::{Exchange, HandlerError, TestServer, deferred, handler, handler_fn};
use http_body_util::BodyExt;
use rstest::rstest;
use serde_json::{Value, json};

mod common;
pub use self::common::*;

#[rstest]
#[tokio::test]
async fn should_support_returning_body_directly(
    #[future] server: TestServer,
) -> anyhow::Result<()> {
    let server = server.await;
    server
        .get("/foo", handler_fn(|_exchange| "bar"))
        .get("/bar", handler_fn(|_exchange| json!({"foo": "bar"})))
        .get("/async", deferred(async { "bar" }));
    let base = url(&server)?;

    let body_string = reqwest::get(format!("{base}/foo")).await?.text().await?;
    let json_response = reqwest::get(format!("{base}/bar")).await?;
    let content_type = json_response.headers().get("content-type").cloned();
    let body_json = json_response.json::<Value>().await?;
    let body_async = reqwest::get(format!("{base}/async")).await?.text().await?;

    assert_eq!(body_string, "bar");
    assert_eq!(body_json, json!({"foo": "bar"}));
    assert_eq!(
        content_type.as_ref().and_then(|value| value.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(body_async, "bar");
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_support_returning_body_without_wrapping_in_function(
    #[future] server: TestServer,
) -> anyhow::Result<()> {
    let server = server.await;
    server
        .get("/foo", "bar")
        .get("/bar", json!({"foo": "bar"}))
        .get("/async", deferred(async { "bar" }));
    let base = url(&server)?;

    let body_string = reqwest::get(format!("{base}/foo")).await?.text().await?;
    let body_json = reqwest::get(format!("{base}/bar")).await?.json::<Value>().await?;
    let body_async = reqwest::get(format!("{base}/async")).await?.text().await?;

    assert_eq!(body_string, "bar");
    assert_eq!(body_json, json!({"foo": "bar"}));
    assert_eq!(body_async, "bar");
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_support_number_and_bool_literals(
    #[future] server: TestServer,
) -> anyhow::Result<()> {
    let server = server.await;
    server.get("/answer", 42).get("/yes", true).get("/zero", 0);
    let base = url(&server)?;

    let answer = reqwest::get(format!("{base}/answer")).await?.json::<Value>().await?;
    let yes = reqwest::get(format!("{base}/yes")).await?.json::<Value>().await?;
    let zero = reqwest::get(format!("{base}/zero")).await?.text().await?;

    assert_eq!(answer, json!(42));
    assert_eq!(yes, json!(true));
    assert!(zero.is_empty());
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_answer_the_same_for_literal_and_async_values(
    #[future] server: TestServer,
) -> anyhow::Result<()> {
    let server = server.await;
    server
        .get("/literal", "bar")
        .get("/async", handler(|_exchange| async { "bar" }));
    let base = url(&server)?;

    let literal = reqwest::get(format!("{base}/literal")).await?;
    let later = reqwest::get(format!("{base}/async")).await?;

    assert_eq!(literal.status(), later.status());
    assert_eq!(literal.headers().get("content-type"), later.headers().get("content-type"));
    assert_eq!(literal.text().await?, later.text().await?);
    server.close().await?;
    Ok(())
}

fn register(
    server: &TestServer,
    method: &Method,
    path: &str,
    handlers: [fixture_server::Handler; 2],
) {
    match *method {
        Method::GET => server.get(path, handlers),
        Method::POST => server.post(path, handlers),
        Method::PUT => server.put(path, handlers),
        Method::PATCH => server.patch(path, handlers),
        Method::DELETE => server.delete(path, handlers),
        _ => server.route(method.clone(), path, handlers),
    };
}

#[rstest]
#[case::get(Method::GET)]
#[case::post(Method::POST)]
#[case::put(Method::PUT)]
#[case::patch(Method::PATCH)]
#[case::delete(Method::DELETE)]
#[case::options(Method::OPTIONS)]
#[tokio::test]
async fn should_accept_multiple_callbacks(
    #[future] server: TestServer,
    #[case] method: Method,
) -> anyhow::Result<()> {
    let server = server.await;
    register(
        &server,
        &method,
        "/foo",
        [
            handler_fn(|exchange: Exchange| -> Result<(), HandlerError> {
                exchange.response().set_header("foo", "bar")?;
                exchange.next();
                Ok(())
            }),
            handler_fn(|exchange: Exchange| exchange.response().header("foo")),
        ],
    );

    let response = client(&server)?
        .request(method, format!("{}/foo", url(&server)?))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("foo").map(|value| value.as_bytes()), Some(&b"bar"[..]));
    assert_eq!(response.text().await?, "bar");
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_let_handlers_write_their_own_response(
    #[future] server: TestServer,
) -> anyhow::Result<()> {
    let server = server.await;
    server.post(
        "/created",
        handler_fn(|exchange: Exchange| {
            exchange.response().set_status(StatusCode::CREATED).send("created");
            // ignored, the response is already sent
            "other"
        }),
    );
    server.post(
        "/empty",
        handler_fn(|exchange: Exchange| {
            exchange.response().set_status(StatusCode::NO_CONTENT).end();
        }),
    );
    let client = client(&server)?;
    let base = url(&server)?;

    let created = client.post(format!("{base}/created")).send().await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(created.text().await?, "created");

    let empty = client.post(format!("{base}/empty")).send().await?;
    assert_eq!(empty.status(), StatusCode::NO_CONTENT);
    assert!(empty.text().await?.is_empty());
    server.close().await?;
    Ok(())
}

#[rstest]
#[case::empty_text(handler_fn(|_exchange| ""))]
#[case::zero(handler_fn(|_exchange| 0))]
#[case::null(handler_fn(|_exchange| Value::Null))]
#[case::nothing(handler_fn(|_exchange| None::<String>))]
#[tokio::test]
async fn should_not_send_falsy_values(
    #[future] server: TestServer,
    #[case] falsy: fixture_server::Handler,
) -> anyhow::Result<()> {
    let server = server.await;
    server.get("/falsy", falsy);

    let response = reqwest::get(format!("{}/falsy", url(&server)?)).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await?.is_empty());
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_expose_path_params_and_query(#[future] server: TestServer) -> anyhow::Result<()> {
    let server = server.await;
    server.get(
        "/users/{id}",
        handler_fn(|exchange: Exchange| {
            json!({
                "id": exchange.param("id"),
                "query": exchange.request().query_pairs(),
            })
        }),
    );

    let body = reqwest::get(format!("{}/users/john%20doe?sort=asc", url(&server)?))
        .await?
        .json::<Value>()
        .await?;

    assert_eq!(body, json!({"id": "john doe", "query": [["sort", "asc"]]}));
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_answer_not_found(#[future] server: TestServer) -> anyhow::Result<()> {
    let server = server.await;
    server.get("/foo", "bar");

    let response = client(&server)?
        .post(format!("{}/foo", url(&server)?))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    insta::assert_snapshot!(response.text().await?, @"Cannot POST /foo");
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_survive_failing_handlers(#[future] server: TestServer) -> anyhow::Result<()> {
    let server = server.await;
    server
        .get("/error", handler_fn(|_exchange| Err::<(), _>(HandlerError::msg("Failed"))))
        .get("/rejected", deferred(async { Err::<(), _>(std::io::Error::other("rejected")) }))
        .get(
            "/panic",
            handler_fn(|_exchange: Exchange| -> &'static str { panic!("handler exploded") }),
        )
        .get("/foo", "bar");
    let base = url(&server)?;

    for path in ["error", "rejected", "panic"] {
        let response = reqwest::get(format!("{base}/{path}")).await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "for {path}");
    }

    let body = reqwest::get(format!("{base}/foo")).await?.text().await?;
    assert_eq!(body, "bar");
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_pass_through_the_router(#[future] server: TestServer) -> anyhow::Result<()> {
    let server = server.await;
    server.get("/foo", "bar");
    server.with_router(|router| router.route("/raw", get(|| async { "raw axum" })));
    let base = url(&server)?;

    let raw = reqwest::get(format!("{base}/raw")).await?.text().await?;
    let fixture = reqwest::get(format!("{base}/foo")).await?.text().await?;

    assert_eq!(raw, "raw axum");
    assert_eq!(fixture, "bar");
    server.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn should_handle_requests_without_socket(#[future] server: TestServer) -> anyhow::Result<()> {
    let server = server.await;
    server.close().await?;
    server.get("/foo", "bar");

    let request = axum::http::Request::builder().uri("/foo").body(Body::empty())?;
    let response = server.handle(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(body, "bar");
    Ok(())
}
