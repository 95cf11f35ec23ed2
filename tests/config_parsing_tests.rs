use vibeserv::config::ConfigParser;

#[test]
fn parses_minimal_server_block() {
    let text = "server { listen 8080; root ./www; }";
    let servers = ConfigParser::parse_str(text).unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].ports, vec![8080]);
    assert_eq!(servers[0].root, "./www");
}

#[test]
fn parses_multiple_listen_directives_and_server_names() {
    let text = r#"
        server {
            listen 8080;
            listen 8081;
            server_name example.com www.example.com;
            root ./www;
        }
    "#;
    let servers = ConfigParser::parse_str(text).unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].ports, vec![8080, 8081]);
    assert_eq!(
        servers[0].server_names,
        vec!["example.com".to_string(), "www.example.com".to_string()]
    );
}

#[test]
fn parses_location_block_with_accepted_methods() {
    let text = r#"
        server {
            listen 8080;
            root ./www;
            location /api {
                root ./api;
                acceptedMethods GET POST;
                autoindex on;
            }
        }
    "#;
    let servers = ConfigParser::parse_str(text).unwrap();
    let loc = &servers[0].locations[0];
    assert_eq!(loc.prefix, "/api");
    assert_eq!(loc.root.as_deref(), Some("./api"));
    assert_eq!(loc.autoindex, Some(true));
    assert_eq!(
        loc.methods.as_deref(),
        Some(&[vibeserv::http::Method::Get, vibeserv::http::Method::Post][..])
    );
}

#[test]
fn parses_cgi_block_with_path_alias_and_extensions() {
    let text = r#"
        server {
            listen 8080;
            root ./www;
            cgi {
                cgi_path_alias /cgi-bin ./cgi-bin;
                file_extension .py .pl;
                upload_dir ./uploads;
            }
        }
    "#;
    let servers = ConfigParser::parse_str(text).unwrap();
    let cgi = servers[0].cgi.as_ref().unwrap();
    assert_eq!(cgi.url_prefix, "/cgi-bin");
    assert_eq!(cgi.fs_path, "./cgi-bin");
    assert_eq!(cgi.extensions, vec![".py".to_string(), ".pl".to_string()]);
    assert_eq!(cgi.upload_dir.as_deref(), Some("./uploads"));
}

#[test]
fn parses_error_pages_block_at_server_level() {
    let text = r#"
        server {
            listen 8080;
            root ./www;
            error_pages {
                404 ./www/404.html;
                500 ./www/500.html;
            }
        }
    "#;
    let servers = ConfigParser::parse_str(text).unwrap();
    assert_eq!(servers[0].error_pages.get(&404).unwrap(), "./www/404.html");
    assert_eq!(servers[0].error_pages.get(&500).unwrap(), "./www/500.html");
}

#[test]
fn missing_closing_brace_is_an_error() {
    let text = "server { listen 8080;";
    assert!(ConfigParser::parse_str(text).is_err());
}

#[test]
fn out_of_range_listen_port_is_an_error() {
    let text = "server { listen 70000; }";
    let err = ConfigParser::parse_str(text).unwrap_err();
    assert!(err.to_string().contains("out of range"));
}

#[test]
fn unknown_directive_in_server_block_is_an_error() {
    let text = "server { banana yes; }";
    let err = ConfigParser::parse_str(text).unwrap_err();
    assert!(err.to_string().contains("unknown directive"));
}

#[test]
fn unset_server_falls_back_to_defaults() {
    let text = "server { root ./www; }";
    let servers = ConfigParser::parse_str(text).unwrap();
    assert_eq!(servers[0].ports, vec![vibeserv::config::types::DEFAULT_PORT]);
    assert_eq!(servers[0].server_names, vec!["_".to_string()]);
}

#[test]
fn multiple_server_blocks_parse_independently() {
    let text = r#"
        server { listen 8080; server_name one.com; root ./www; }
        server { listen 9090; server_name two.com; root ./www; }
    "#;
    let servers = ConfigParser::parse_str(text).unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].server_names, vec!["one.com".to_string()]);
    assert_eq!(servers[1].ports, vec![9090]);
}
