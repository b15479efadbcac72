#![cfg(unix)]

use std::time::Duration;

use axum::{routing::get, Router};
use mocksmith_daemon::api::apply_middleware;
use mocksmith_daemon::supervisor::{install_panic_trigger, Supervisor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;

async fn failing_handler() -> &'static str {
    panic!("handler failure");
}

async fn get_raw(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("listener should accept");
    let request = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("request should send");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("response should read");
    response
}

// The panic hook is process-wide, so this binary holds a single test.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stray_task_panic_shuts_down_but_handler_panic_does_not() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = apply_middleware(Router::new().route("/fail", get(failing_handler)), 1024);
    let mut command = Command::new("sleep");
    command.arg("30");

    let supervisor = Supervisor::new(listener, app, command);
    install_panic_trigger(supervisor.trigger_sender());
    let run = tokio::spawn(supervisor.run());

    let response = get_raw(addr, "/fail").await;
    assert!(response.starts_with("HTTP/1.1 500"), "response: {response}");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!run.is_finished(), "a contained handler panic must not stop the supervisor");

    let stray = tokio::spawn(async {
        panic!("background failure");
    });
    assert!(stray.await.unwrap_err().is_panic());

    let code = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("supervisor should finish")
        .unwrap()
        .unwrap();
    assert_eq!(code, 0);
}
