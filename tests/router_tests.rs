use vibeserv::config::{CgiConfig, RouteConfig, ServerConfig};
use vibeserv::router::{resolve, Matched};

fn server_with_locations(locations: Vec<RouteConfig>) -> ServerConfig {
    ServerConfig {
        locations,
        ..Default::default()
    }
}

#[test]
fn resolves_to_the_only_matching_location() {
    let server = server_with_locations(vec![RouteConfig {
        prefix: "/".into(),
        ..Default::default()
    }]);

    match resolve(&server, "/index.html") {
        Matched::Location(Some(loc)) => assert_eq!(loc.prefix, "/"),
        _ => panic!("expected a location match"),
    }
}

#[test]
fn first_declared_prefix_wins_over_a_longer_later_one() {
    let server = server_with_locations(vec![
        RouteConfig { prefix: "/a".into(), ..Default::default() },
        RouteConfig { prefix: "/a/b".into(), ..Default::default() },
    ]);

    match resolve(&server, "/a/b/c") {
        Matched::Location(Some(loc)) => assert_eq!(loc.prefix, "/a"),
        _ => panic!("expected the first-declared prefix to win"),
    }
}

#[test]
fn no_matching_location_resolves_to_none() {
    let server = server_with_locations(vec![RouteConfig {
        prefix: "/only".into(),
        ..Default::default()
    }]);

    match resolve(&server, "/elsewhere") {
        Matched::Location(None) => {}
        _ => panic!("expected no location match"),
    }
}

#[test]
fn cgi_block_takes_priority_over_overlapping_locations() {
    let mut server = server_with_locations(vec![RouteConfig {
        prefix: "/".into(),
        ..Default::default()
    }]);
    server.cgi = Some(CgiConfig {
        url_prefix: "/cgi-bin".into(),
        fs_path: "./cgi-bin".into(),
        ..Default::default()
    });

    match resolve(&server, "/cgi-bin/hello.py") {
        Matched::Cgi(cgi) => assert_eq!(cgi.url_prefix, "/cgi-bin"),
        _ => panic!("expected the cgi block to win"),
    }
}

#[test]
fn target_outside_cgi_alias_still_falls_through_to_locations() {
    let mut server = server_with_locations(vec![RouteConfig {
        prefix: "/".into(),
        ..Default::default()
    }]);
    server.cgi = Some(CgiConfig {
        url_prefix: "/cgi-bin".into(),
        fs_path: "./cgi-bin".into(),
        ..Default::default()
    });

    match resolve(&server, "/static/app.css") {
        Matched::Location(Some(loc)) => assert_eq!(loc.prefix, "/"),
        _ => panic!("expected a location match"),
    }
}
