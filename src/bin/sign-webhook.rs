use anyhow::{Context, Result};
use clap::Parser;
use storefront::infra::manual_provider::{sign_manual_event, SIGNATURE_HEADER};
use uuid::Uuid;

/// Produce a signed manual-provider webhook delivery, ready for curl.
#[derive(Parser, Debug)]
#[command(name = "sign-webhook", version, about = "Sign a manual payment webhook payload")]
struct Cli {
    /// Payment intent id returned by checkout (the part of clientSecret before "_secret_")
    #[arg(long)]
    intent: String,

    /// Order id the intent belongs to
    #[arg(long)]
    order: Uuid,

    /// Report the payment as failed instead of succeeded
    #[arg(long)]
    failed: bool,

    /// Webhook secret; defaults to STOREFRONT_WEBHOOK_SECRET
    #[arg(long)]
    secret: Option<String>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Cli::parse();

    let secret = match args.secret {
        Some(s) => s,
        None => std::env::var("STOREFRONT_WEBHOOK_SECRET")
            .context("Pass --secret or set STOREFRONT_WEBHOOK_SECRET")?,
    };

    let payload = sign_manual_event(&secret, &args.intent, args.order, !args.failed)
        .context("Failed to sign webhook payload")?;
    let body = String::from_utf8(payload.body).context("Payload is not UTF-8")?;
    let signature = payload.signature.unwrap_or_default();

    println!("{SIGNATURE_HEADER}: {signature}");
    println!("{body}");
    Ok(())
}
