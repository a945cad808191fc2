use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 22] = [
        "RUST_LOG",
        "MKT_HOST",
        "MKT_PORT",
        "MKT_DATABASE_URL",
        "MKT_PUBLIC_URL",
        "MKT_RETURN_URL",
        "MKT_USE_X_FORWARDED_FOR",
        "MKT_USE_FORWARDED",
        "MKT_SHIPPING_FEE",
        "MKT_TOKEN_LIFETIME",
        "MKT_PROVIDER_QUERY_TIMEOUT_MS",
        "MKT_VERIFY_RATE_LIMIT",
        "MKT_VERIFY_RATE_WINDOW",
        "MKT_UNPAID_ORDER_TIMEOUT",
        "MKT_SWEEP_INTERVAL",
        "MKT_SWEEP_MIN_AGE",
        "MKT_MOMO_PARTNER_CODE",
        "MKT_MOMO_ENDPOINT",
        "MKT_PAYOS_CLIENT_ID",
        "MKT_PAYOS_ENDPOINT",
        "MKT_STRIPE_ENDPOINT",
        "MKT_ZALOPAY_APP_ID",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
