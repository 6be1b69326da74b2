// Startup module - displays banner and the route table
//
// Printed once before the server starts serving; the same information is
// also logged so it ends up in the log file.

use crate::config::{Config, VERSION};
use crate::proxy::routing::Route;
use crate::proxy::ProxyState;

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// One-line summary of what a route matches and how it rewrites
pub fn describe_route(route: &Route) -> String {
    let tags = if route.tags.is_empty() {
        "no tag rules".to_string()
    } else {
        route
            .tags
            .iter()
            .map(|rule| format!("{}{} {}", rule.begin, rule.end, rule.action.name()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{} -> {} ({})", route.name, route.target, tags)
}

/// Print the startup banner and route table
pub fn print_startup(config: &Config, state: &ProxyState) {
    use colors::*;

    // Banner
    println!();
    println!("  {BOLD}{CYAN}Reasoning Relay{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Reasoning tag rewriting for OpenAI-compatible backends{RESET}");
    println!();

    // Config file status
    match &config.source {
        Some(path) => println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display()),
        None => println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}"),
    }
    println!();

    println!("  {DIM}Routes (first match wins):{RESET}");
    for route in state.routes().iter() {
        println!("    {GREEN}✓{RESET} {}", describe_route(route));
    }
    println!();

    println!(
        "  {MAGENTA}▸{RESET} Proxy listening on {BOLD}{}{RESET}",
        config.bind_addr
    );
    println!();
}

/// Same information for the log
pub fn log_startup(config: &Config, state: &ProxyState) {
    tracing::info!("Reasoning Relay v{}", VERSION);
    for route in state.routes().iter() {
        tracing::info!("  route {}", describe_route(route));
    }
    tracing::info!("▸ Listening on {}", config.bind_addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    #[test]
    fn test_describe_route() {
        let route = Route::from_config(&RouteConfig::catch_all("http://localhost:8000")).unwrap();
        assert_eq!(
            describe_route(&route),
            "default -> http://localhost:8000 (<think></think> strip)"
        );

        let bare = RouteConfig {
            tags: Vec::new(),
            ..RouteConfig::catch_all("http://b:1")
        };
        let bare = Route::from_config(&bare).unwrap();
        assert_eq!(describe_route(&bare), "default -> http://b:1 (no tag rules)");
    }
}
