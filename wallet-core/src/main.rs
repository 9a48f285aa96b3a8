use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use antarctic_wallet_lib::{
    HandshakeStatus, PaymentFlowController, PaymentStatus, WalletContext,
};

const DATA_DIR_NAME: &str = ".antarctic-wallet";

#[derive(Parser, Debug)]
#[command(name = "antarctic-wallet", about = "Antarctic Wallet from the terminal")]
struct Args {
    /// Directory holding the session and client config.
    #[arg(long, env = "ANTARCTIC_WALLET_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in through the Telegram bot.
    Login,
    /// Pay an SBP QR code.
    Pay {
        qr_url: String,
        #[arg(long, default_value = "USDT")]
        coin: String,
        /// Create the payment without waiting for confirmation on stdin.
        #[arg(long)]
        yes: bool,
    },
    /// Show balances.
    Accounts,
    /// Forget the stored session.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("antarctic_wallet_lib=info,antarctic_wallet=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?.join(DATA_DIR_NAME),
    };
    let context = WalletContext::initialize(data_dir).context("failed to open wallet data")?;
    tracing::info!(environment = context.environment(), "wallet context initialised");

    match args.command {
        Command::Login => login(&context).await,
        Command::Pay { qr_url, coin, yes } => pay(&context, &qr_url, &coin, yes).await,
        Command::Accounts => accounts(&context).await,
        Command::Logout => {
            context.logout()?;
            println!("Signed out");
            Ok(())
        }
    }
}

async fn login(context: &WalletContext) -> Result<()> {
    let login = context.login_controller();
    let handshake = login.prepare_handshake().await?;
    println!("Open {} and press Start", handshake.deep_link());
    login.start_polling()?;

    let status = wait_for(login.watch_status(), |status| status.is_terminal()).await;
    match status {
        Some(HandshakeStatus::Confirmed) => {
            if let Some(session) = login.session() {
                println!("Signed in as user {}", session.user_id);
            }
            Ok(())
        }
        Some(other) => bail!("login ended as {:?}", other),
        None => {
            login.teardown();
            bail!("login interrupted")
        }
    }
}

async fn pay(context: &WalletContext, qr_url: &str, coin: &str, yes: bool) -> Result<()> {
    if context.current_session()?.is_none() {
        bail!("not signed in, run `antarctic-wallet login` first");
    }

    let flow = context.payment_controller();
    let quote = match flow.start_quote_refresh(qr_url, coin).await? {
        Some(quote) => quote,
        None => bail!("no quote available for this QR code"),
    };
    println!(
        "Pay {} {} for {} RUB (rate {}, valid until {})",
        quote.value, quote.coin, quote.fiat_amount, quote.rate, quote.valid_until
    );
    if !yes && !confirm().await? {
        flow.teardown();
        println!("Cancelled");
        return Ok(());
    }

    let tx = flow.create_payment().await?;
    println!("Payment {} created, waiting for settlement", tx.tx_id);
    report_settlement(&flow).await
}

async fn report_settlement(flow: &PaymentFlowController) -> Result<()> {
    let status = wait_for(flow.watch_status(), |status| status.is_terminal()).await;
    let tx = flow.transaction();
    match (status, tx) {
        (Some(PaymentStatus::Settled), Some(tx)) => {
            println!(
                "Paid {} to {}",
                tx.fiat_value,
                tx.shop_name.as_deref().unwrap_or("merchant")
            );
            Ok(())
        }
        (Some(PaymentStatus::Rejected), Some(tx)) => bail!("payment {:?}", tx.status),
        _ => {
            flow.teardown();
            bail!("stopped waiting for settlement")
        }
    }
}

async fn accounts(context: &WalletContext) -> Result<()> {
    let accounts = context.api().get_accounts().await?;
    println!("Total: {} {}", accounts.total_fiat, accounts.currency);
    for item in accounts.items {
        println!(
            "  {:<6} {:>14} ({} {}) on {}",
            item.coin, item.balance, item.balance_fiat, accounts.currency, item.network
        );
    }
    Ok(())
}

/// Wait until `done` holds for the watched status; `None` on Ctrl-C.
async fn wait_for<S, F>(mut status: watch::Receiver<S>, done: F) -> Option<S>
where
    S: Copy,
    F: Fn(S) -> bool,
{
    loop {
        let current = *status.borrow_and_update();
        if done(current) {
            return Some(current);
        }
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
            _ = tokio::signal::ctrl_c() => return None,
        }
    }
}

async fn confirm() -> Result<bool> {
    println!("Confirm payment? [y/N]");
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
