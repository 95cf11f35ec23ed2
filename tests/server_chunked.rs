use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use vibeserv::config::{RouteConfig, ServerConfig};
use vibeserv::server::Server;

fn spawn_server(port: u16, root: std::path::PathBuf) {
    let upload_dir = root.join("uploads");
    std::fs::create_dir_all(&upload_dir).unwrap();

    let location = RouteConfig {
        prefix: "/upload".into(),
        file_upload: true,
        upload_dir: Some("uploads".into()),
        ..Default::default()
    };

    let server_cfg = ServerConfig {
        ports: vec![port],
        root: root.to_string_lossy().into_owned(),
        locations: vec![location],
        ..Default::default()
    };

    thread::spawn(move || {
        let mut server = Server::new(vec![server_cfg]).expect("server should bind");
        server.run().expect("event loop should not error");
    });

    thread::sleep(Duration::from_millis(300));
}

#[test]
fn chunked_upload_is_assembled_and_saved_to_disk() {
    let root = std::env::temp_dir().join(format!("vibeserv_chunked_test_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).unwrap();

    spawn_server(18080, root.clone());

    let mut stream = TcpStream::connect("127.0.0.1:18080").expect("connect to test server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let headers = "POST /upload HTTP/1.1\r\n\
                   Host: localhost\r\n\
                   Transfer-Encoding: chunked\r\n\
                   Content-Type: text/plain\r\n\r\n";
    stream.write_all(headers.as_bytes()).unwrap();

    stream.write_all(b"5\r\nHello\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"7\r\n World!\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"0\r\n\r\n").unwrap();
    stream.flush().unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).expect("read response");
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("201"));

    let upload_dir = root.join("uploads");
    let mut found_content = false;
    for entry in std::fs::read_dir(&upload_dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_file() {
            let content = std::fs::read_to_string(&path).unwrap();
            if content == "Hello World!" {
                found_content = true;
            }
        }
    }
    assert!(found_content, "chunked upload body was not assembled on disk");

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn pipelined_get_requests_both_receive_responses() {
    let root = std::env::temp_dir().join(format!("vibeserv_pipeline_test_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("index.html"), "hello").unwrap();

    let location = RouteConfig {
        prefix: "/".into(),
        ..Default::default()
    };
    let server_cfg = ServerConfig {
        ports: vec![18081],
        root: root.to_string_lossy().into_owned(),
        locations: vec![location],
        ..Default::default()
    };

    thread::spawn(move || {
        let mut server = Server::new(vec![server_cfg]).expect("server should bind");
        server.run().expect("event loop should not error");
    });
    thread::sleep(Duration::from_millis(300));

    let mut stream = TcpStream::connect("127.0.0.1:18081").expect("connect to test server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let pipelined = "GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n\
                      GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
    stream.write_all(pipelined.as_bytes()).unwrap();

    let mut buffer = [0u8; 4096];
    let mut seen = 0;
    let mut collected = String::new();
    while seen < 2 {
        let n = stream.read(&mut buffer).expect("read pipelined responses");
        collected.push_str(&String::from_utf8_lossy(&buffer[..n]));
        seen = collected.matches("HTTP/1.1").count();
    }
    assert_eq!(collected.matches("200").count(), 2);

    let _ = std::fs::remove_dir_all(&root);
}
