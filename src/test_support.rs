// Local axum fixtures shared by the network tests

use axum::Router;
use std::net::SocketAddr;

/// Serve `app` on an ephemeral localhost port and return its address
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn base_url(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .unwrap()
}
