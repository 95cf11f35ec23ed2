use std::collections::{HashMap, HashSet};

use crate::config::types::ServerConfig;

/// Drops server blocks that conflict with each other or reference
/// nonexistent files/directories, printing a diagnostic for each drop.
/// Mirrors SPEC_FULL.md §8's ambient config/validation test scenarios.
pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut conflict_indices = HashSet::new();

    // 1. Exact (bind_address, port, server_name) duplicates.
    let mut usage_map: HashMap<(String, u16, String), Vec<usize>> = HashMap::new();
    for (idx, config) in configs.iter().enumerate() {
        for port in &config.ports {
            for name in &config.server_names {
                let key = (config.bind_address.clone(), *port, name.clone());
                usage_map.entry(key).or_default().push(idx);
            }
        }
    }
    for ((addr, port, name), indices) in usage_map {
        if indices.len() > 1 {
            println!(
                "❌ \x1b[1;31mConflict Detected:\x1b[0m multiple servers defined for {addr}:{port} with name '{name}'. Dropping conflicting configurations."
            );
            conflict_indices.extend(indices);
        }
    }

    // 2. Wildcard-vs-specific bind conflicts on the same port.
    let mut port_addrs: HashMap<u16, HashSet<String>> = HashMap::new();
    for config in &configs {
        for port in &config.ports {
            port_addrs.entry(*port).or_default().insert(config.bind_address.clone());
        }
    }
    for (port, addrs) in port_addrs {
        if addrs.contains("0.0.0.0") && addrs.len() > 1 {
            println!(
                "❌ \x1b[1;31mBind Conflict Detected:\x1b[0m port {port} mixes wildcard '0.0.0.0' with specific addresses {addrs:?}."
            );
            for (idx, config) in configs.iter().enumerate() {
                if config.ports.contains(&port) {
                    conflict_indices.insert(idx);
                }
            }
        }
    }

    // 3. File/status-code sanity checks.
    for (idx, config) in configs.iter().enumerate() {
        let mut valid = true;

        for (code, path) in &config.error_pages {
            if *code < 100 || *code > 599 {
                println!(
                    "❌ \x1b[1;31mInvalid Status Code:\x1b[0m server '{:?}' has invalid error page code {code}.",
                    config.server_names
                );
                valid = false;
            }
            if std::fs::File::open(path).is_err() {
                println!(
                    "❌ \x1b[1;31mFile Error:\x1b[0m server '{:?}' refers to missing error page '{path}' for code {code}.",
                    config.server_names
                );
                valid = false;
            }
        }

        for route in &config.locations {
            let root = config.effective_root(Some(route));
            if std::fs::read_dir(root).is_err() {
                println!(
                    "❌ \x1b[1;31mDirectory Error:\x1b[0m server '{:?}' location '{}' refers to invalid root directory '{}'.",
                    config.server_names, route.prefix, root
                );
                valid = false;
            }
        }

        if !valid {
            conflict_indices.insert(idx);
        }
    }

    let dropped = conflict_indices.len();
    let valid_configs: Vec<ServerConfig> = configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !conflict_indices.contains(idx))
        .map(|(_, c)| c)
        .collect();

    if dropped > 0 {
        println!("⚠️  \x1b[33mResult:\x1b[0m {dropped} configuration(s) dropped due to conflicts.");
    }

    valid_configs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(addr: &str, ports: Vec<u16>, name: &str) -> ServerConfig {
        ServerConfig {
            bind_address: addr.to_string(),
            ports,
            server_names: vec![name.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn no_conflicts_keeps_all() {
        let configs = vec![
            make_config("127.0.0.1", vec![8001], "s1"),
            make_config("127.0.0.1", vec![8002], "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn virtual_hosts_on_same_addr_port_are_ok() {
        let configs = vec![
            make_config("127.0.0.1", vec![8080], "example.com"),
            make_config("127.0.0.1", vec![8080], "api.example.com"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn exact_duplicate_drops_both() {
        let configs = vec![
            make_config("127.0.0.1", vec![8080], "same.com"),
            make_config("127.0.0.1", vec![8080], "same.com"),
            make_config("127.0.0.1", vec![8081], "other.com"),
        ];
        let valid = validate_configs(configs);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].server_names, vec!["other.com"]);
    }

    #[test]
    fn multi_port_partial_conflict_drops_both() {
        let configs = vec![
            make_config("127.0.0.1", vec![80, 81], "foo"),
            make_config("127.0.0.1", vec![80], "foo"),
        ];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_vs_specific_is_a_bind_conflict() {
        let configs = vec![
            make_config("0.0.0.0", vec![8080], "s1"),
            make_config("127.0.0.1", vec![8080], "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_with_distinct_names_is_virtual_hosting() {
        let configs = vec![
            make_config("0.0.0.0", vec![8080], "s1"),
            make_config("0.0.0.0", vec![8080], "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn invalid_status_code_drops_the_config() {
        let mut config = make_config("127.0.0.1", vec![8080], "s1");
        config.error_pages.insert(99, "exists".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn missing_error_page_file_drops_the_config() {
        let mut config = make_config("127.0.0.1", vec![8080], "s1");
        config
            .error_pages
            .insert(404, "/non/existent/path/err.html".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn missing_location_root_drops_the_config() {
        use crate::config::types::RouteConfig;
        let mut config = make_config("127.0.0.1", vec![8080], "s1");
        config.locations.push(RouteConfig {
            prefix: "/".into(),
            root: Some("/non/existent/dir".into()),
            ..Default::default()
        });
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn valid_files_and_dirs_survive() {
        use crate::config::types::RouteConfig;
        let temp_dir = std::env::temp_dir();
        let file_path = temp_dir.join("vibeserv_test_err.html");
        std::fs::write(&file_path, "error").unwrap();

        let mut config = make_config("127.0.0.1", vec![8080], "s1");
        config
            .error_pages
            .insert(404, file_path.to_str().unwrap().to_string());
        config.locations.push(RouteConfig {
            prefix: "/".into(),
            root: Some(temp_dir.to_str().unwrap().to_string()),
            ..Default::default()
        });

        assert_eq!(validate_configs(vec![config]).len(), 1);
        let _ = std::fs::remove_file(file_path);
    }
}
