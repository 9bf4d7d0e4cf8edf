use fixture_server::{ServerOptions, TestServer, create_server};
use rstest::fixture;
use tracing::info;

pub fn init_tracing() {
    // should be run once, fail otherwise, we skip that error
    let _ = tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    info!("Tracing initialized");
}

pub async fn start(options: ServerOptions) -> TestServer {
    init_tracing();
    match create_server(options).await {
        Ok(server) => server,
        Err(error) => {
            panic!("fail to start fixture server: {error:?}");
        }
    }
}

#[fixture]
pub async fn server() -> TestServer {
    start(ServerOptions::default()).await
}

#[fixture]
pub async fn tls_server() -> TestServer {
    start(ServerOptions::default().with_certificate(true)).await
}

/// A client trusting the certificate authority of `server`, if any.
pub fn client(server: &TestServer) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(ca_cert) = server.ca_cert() {
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(ca_cert.as_bytes())?);
    }
    Ok(builder.build()?)
}

/// The HTTP base URL of a listening server.
pub fn url(server: &TestServer) -> anyhow::Result<String> {
    server
        .url()
        .ok_or_else(|| anyhow::anyhow!("the http server is not listening"))
}

/// The HTTPS base URL of a listening server.
pub fn ssl_url(server: &TestServer) -> anyhow::Result<String> {
    server
        .ssl_url()
        .ok_or_else(|| anyhow::anyhow!("the https server is not listening"))
}
