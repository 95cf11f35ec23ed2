use std::fmt;

use crate::config::types::{RouteConfig, ServerConfig};

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mNetwork:\x1b[0m     \x1b[32m{}\x1b[0m \x1b[38;5;244mvia ports\x1b[0m \x1b[1;32m{:?}\x1b[0m",
            self.bind_address, self.ports
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mIdentity:\x1b[0m    \x1b[36m{}\x1b[0m",
            self.server_names.join(", ")
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDefault:\x1b[0m     \x1b[{}m{}\x1b[0m",
            if self.is_default_server() { "32" } else { "31" },
            if self.is_default_server() { "YES" } else { "NO" }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody Limit:\x1b[0m  \x1b[33m{} KB\x1b[0m",
            self.max_body_size / 1024
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError Pages:\x1b[0m")?;
            for (code, path) in &self.error_pages {
                writeln!(f, "    \x1b[38;5;244m{code:4}\x1b[0m → \x1b[31m{path}\x1b[0m")?;
            }
        }

        if let Some(cgi) = &self.cgi {
            writeln!(
                f,
                "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mCGI:\x1b[0m         \x1b[38;5;208m{} → {}\x1b[0m",
                cgi.url_prefix, cgi.fs_path
            )?;
        }

        writeln!(
            f,
            "\n  \x1b[1;37m📋 ROUTING TABLE ({}) \x1b[0m",
            self.locations.len()
        )?;
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;

        for (idx, route) in self.locations.iter().enumerate() {
            let is_last = idx == self.locations.len() - 1;
            let branch = if is_last { "  └──" } else { "  ├──" };
            writeln!(
                f,
                "  \x1b[38;5;244m{}\x1b[0m \x1b[1;37m{}\x1b[0m",
                branch, route.prefix
            )?;
            route.fmt_details(f, self, is_last)?;
            if !is_last {
                writeln!(f, "  \x1b[38;5;244m    │\x1b[0m")?;
            }
        }
        Ok(())
    }
}

impl RouteConfig {
    pub(crate) fn fmt_details(
        &self,
        f: &mut fmt::Formatter<'_>,
        server: &ServerConfig,
        is_last_route: bool,
    ) -> fmt::Result {
        let indent = if is_last_route { "     " } else { "  │  " };
        let methods_fmt = server
            .effective_methods(Some(self))
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(" | ");

        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Methods:\x1b[0m {}",
            indent, methods_fmt
        )?;
        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Root:\x1b[0m    \x1b[32m{}\x1b[0m",
            indent,
            server.effective_root(Some(self))
        )?;
        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Autoindex:\x1b[0m \x1b[{}m{}\x1b[0m",
            indent,
            if server.effective_autoindex(Some(self)) { "32" } else { "31" },
            if server.effective_autoindex(Some(self)) { "ON" } else { "OFF" }
        )?;

        if let Some((code, target)) = &self.return_directive {
            writeln!(
                f,
                "  \x1b[38;5;250m{indent}├─ Return:\x1b[0m \x1b[35m{code} {target}\x1b[0m"
            )?;
        }
        writeln!(
            f,
            "  \x1b[38;5;250m{}└─ Uploads:\x1b[0m {}",
            indent,
            if self.file_upload { "ENABLED" } else { "DISABLED" }
        )?;
        Ok(())
    }
}

pub fn display_config(configs: &[ServerConfig]) {
    println!("\n\x1b[1;35m 🌐 SERVER CONFIGURATION DASHBOARD\x1b[0m");
    println!(
        "\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m"
    );
    for (i, server) in configs.iter().enumerate() {
        println!("\n  \x1b[1;37mSERVER BLOCK {:02}\x1b[0m", i + 1);
        print!("{server}");
    }
    println!(
        "\n\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m"
    );
    println!(" \x1b[1;32m✔\x1b[0m Configuration loaded successfully - Ready for requests!\n");
}
