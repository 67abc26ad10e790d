//! Binary to walk through a broker login by hand and print a live quote.
//!
//! # Usage
//!
//! ```sh
//! export BROKER_GATEWAY_BROKERS="zerodha"
//! export BROKER_ZERODHA_API_KEY="your-api-key"
//! export BROKER_ZERODHA_API_SECRET="your-api-secret"
//! export BROKER_ZERODHA_REDIRECT_URI="http://127.0.0.1:3000/callback"
//! export BROKER_GATEWAY_STATE_DIR="$HOME/.broker-gateway"
//!
//! # 1. print the login URL and open it in a browser
//! cargo run --bin quote_check --features cli -- login zerodha
//! # 2. paste the code from the redirect
//! cargo run --bin quote_check --features cli -- auth zerodha <code>
//! # 3. quote through the active broker
//! cargo run --bin quote_check --features cli -- quote "NIFTY 50"
//! ```

use std::env;
use std::process::ExitCode;

use broker_gateway::BrokerGateway;
use broker_gateway::config::GatewayConfig;

const USAGE: &str = "usage: quote_check <brokers | login BROKER | auth BROKER CODE | quote SYMBOL | use BROKER | logout BROKER>";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(env::args().skip(1).collect()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<String>) -> broker_gateway::Result<()> {
    let gateway = BrokerGateway::from_config(&GatewayConfig::from_env()?)?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["brokers"] => {
            let active = gateway.active_broker();
            let authenticated = gateway.authenticated_brokers();
            for b in gateway.list_brokers() {
                let mark = if active.as_deref() == Some(b.name.as_str()) {
                    "*"
                } else if authenticated.contains(&b.name) {
                    "+"
                } else {
                    " "
                };
                println!("{mark} {:<10} {}", b.name, b.display_name);
            }
        }
        ["login", broker] => {
            // The nonce only lives in this process, so print a URL without one.
            println!("{}", gateway.login_url_with_state(broker, None)?);
        }
        ["auth", broker, code] => {
            gateway.try_authenticate_with_code(broker, code, None).await?;
            println!("✔ authenticated with {broker}");
            println!("active broker: {}", gateway.active_broker().unwrap_or_default());
        }
        ["quote", symbol] => {
            let q = gateway.try_get_quote(symbol).await?;
            println!(
                "{} ltp={} chg={:+} ({:+.2}%) o={} h={} l={} c={} vol={}",
                q.symbol, q.ltp, q.change, q.change_percent, q.open, q.high, q.low, q.close, q.volume
            );
        }
        ["use", broker] => {
            gateway.set_active_broker(broker)?;
            println!("✔ active broker: {broker}");
        }
        ["logout", broker] => {
            gateway.revoke(broker).await?;
            println!("✔ logged out of {broker}");
        }
        _ => eprintln!("{USAGE}"),
    }
    Ok(())
}
