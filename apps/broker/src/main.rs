use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use broker_common::{Account, AccountId, CredentialShape, DEFAULT_TIER};
use broker_core::config::{CoreConfig, ModelPrice};
use broker_provider_core::provider::OAuthMode;
use broker_storage::{AccountRepository, RequestRepository, SeaOrmAccountRepository, SeaOrmRequestRepository};
use clap::Parser;

mod cli;
mod data_dir;
mod dsn;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let data_dir = data_dir::resolve_data_dir(&cli.data_dir);
    let dsn = dsn::resolve_dsn(&cli.dsn, &data_dir).map_err(|e| anyhow::anyhow!(e))?;

    let db = broker_storage::db::connect(&dsn).await.context("connecting to database")?;
    broker_storage::db::sync_schema(&db).await.context("creating schema")?;

    let accounts: Arc<dyn AccountRepository> = Arc::new(SeaOrmAccountRepository::new(db.clone()));
    let requests: Arc<dyn RequestRepository> = Arc::new(SeaOrmRequestRepository::new(db));

    let Some(command) = cli.command else {
        return serve(&cli, accounts, requests).await;
    };

    run_command(command, accounts.as_ref(), requests.as_ref(), &cli.client_id, &cli.redirect_uri).await
}

async fn serve(cli: &Cli, accounts: Arc<dyn AccountRepository>, requests: Arc<dyn RequestRepository>) -> Result<()> {
    let config = build_config(cli)?;
    let ctx = broker_core::bootstrap(accounts, requests, config, cli.redirect_uri.clone());
    let app = broker_router::build_router(ctx.dispatcher);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await.context("server loop")?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<CoreConfig> {
    let mut config = CoreConfig::default();
    if !cli.client_id.is_empty() {
        config.client_id = cli.client_id.clone();
    }
    if let Some(window) = cli.session_window_ms {
        config.session_window_ms = window;
    }
    if let Some(leeway) = cli.refresh_leeway_ms {
        config.refresh_leeway_ms = leeway;
    }
    if let Some(path) = &cli.pricing_file {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading pricing file {path}"))?;
        let table: HashMap<String, ModelPrice> = serde_json::from_str(&raw).context("parsing pricing file")?;
        config.pricing = table;
    }
    Ok(config)
}

async fn run_command(
    command: Command,
    accounts: &dyn AccountRepository,
    requests: &dyn RequestRepository,
    client_id: &str,
    redirect_uri: &str,
) -> Result<()> {
    match command {
        Command::Add { name, mode, priority, model_mappings } => {
            add_account(accounts, name, mode, priority, model_mappings, client_id, redirect_uri).await
        }
        Command::List => list_accounts(accounts).await,
        Command::Remove { name, force } => remove_account(accounts, name, force).await,
        Command::Pause { name } => {
            let account = require_account(accounts, &name).await?;
            accounts.pause(account.id).await.context("pausing account")?;
            println!("paused {name}");
            Ok(())
        }
        Command::Resume { name } => {
            let account = require_account(accounts, &name).await?;
            accounts.resume(account.id).await.context("resuming account")?;
            println!("resumed {name}");
            Ok(())
        }
        Command::SetPriority { name, priority } => {
            if !(0..=100).contains(&priority) {
                bail!("priority must be in 0..=100");
            }
            let account = require_account(accounts, &name).await?;
            accounts.set_priority(account.id, priority).await.context("setting priority")?;
            println!("{name} priority set to {priority}");
            Ok(())
        }
        Command::ResetStats => {
            accounts.reset_stats().await.context("resetting stats")?;
            println!("stats reset");
            Ok(())
        }
        Command::ClearHistory => {
            requests.clear_all().await.context("clearing request history")?;
            println!("history cleared");
            Ok(())
        }
        Command::Analyze { limit } => analyze(requests, limit).await,
    }
}

async fn require_account(accounts: &dyn AccountRepository, name: &str) -> Result<Account> {
    accounts
        .get_by_name(name)
        .await
        .context("looking up account")?
        .ok_or_else(|| anyhow::anyhow!("no account named {name}"))
}

async fn list_accounts(accounts: &dyn AccountRepository) -> Result<()> {
    let all = accounts.list().await.context("listing accounts")?;
    if all.is_empty() {
        println!("no accounts registered");
        return Ok(());
    }
    for account in all {
        let status = if account.paused {
            "paused"
        } else if account.last_error.as_deref() == Some("reauth_required") {
            "reauth_required"
        } else if account.is_rate_limited(now_ms()) {
            "rate_limited"
        } else {
            "healthy"
        };
        println!(
            "{:<20} {:<22} priority={:<3} tier={} requests={:<6} status={}",
            account.name, account.provider, account.priority, account.tier, account.total_requests, status
        );
    }
    Ok(())
}

async fn remove_account(accounts: &dyn AccountRepository, name: String, force: bool) -> Result<()> {
    let account = require_account(accounts, &name).await?;
    if account.total_requests > 0 && !force {
        bail!("{name} has served {} requests; pass --force to remove anyway", account.total_requests);
    }
    accounts.remove(account.id).await.context("removing account")?;
    println!("removed {name}");
    Ok(())
}

async fn analyze(requests: &dyn RequestRepository, limit: u64) -> Result<()> {
    let recent = requests.list_recent(limit).await.context("loading request history")?;
    if recent.is_empty() {
        println!("no requests recorded");
        return Ok(());
    }

    let mut total_cost = 0.0;
    let mut total_tokens = 0i64;
    let mut errors = 0usize;
    for record in &recent {
        total_cost += record.cost_usd.unwrap_or(0.0);
        total_tokens += record.total_tokens.unwrap_or(0);
        if record.error.is_some() {
            errors += 1;
        }
    }

    println!("requests analysed: {}", recent.len());
    println!("total tokens:      {total_tokens}");
    println!("total cost (usd):  {total_cost:.4}");
    println!("errors:            {errors}");
    Ok(())
}

/// Registers a new account. OAuth modes (`max`/`console`) drive an
/// interactive authorize-url/paste-code exchange through C8; every other
/// mode registers a bare API key.
async fn add_account(
    accounts: &dyn AccountRepository,
    name: String,
    mode: String,
    priority: i32,
    model_mappings: Option<String>,
    client_id: &str,
    redirect_uri: &str,
) -> Result<()> {
    if accounts.get_by_name(&name).await.context("checking existing account")?.is_some() {
        bail!("an account named {name} already exists");
    }
    if !(0..=100).contains(&priority) {
        bail!("priority must be in 0..=100");
    }
    let model_mappings = model_mappings
        .map(|raw| serde_json::from_str::<HashMap<String, String>>(&raw))
        .transpose()
        .context("parsing --modelMappings as JSON")?;

    let mut account = match mode.as_str() {
        "max" | "console" => add_oauth_account(&name, &mode, client_id, redirect_uri).await?,
        "zai" | "openai-compatible" | "anthropic-compatible" | "openrouter" | "kilo" => {
            add_api_key_account(&name, &mode)?
        }
        other => bail!("unknown mode {other}"),
    };
    account.priority = priority;
    account.model_mappings = model_mappings;

    accounts.insert(account).await.context("storing new account")?;
    println!("added {name}");
    Ok(())
}

async fn add_oauth_account(name: &str, mode: &str, client_id: &str, redirect_uri: &str) -> Result<Account> {
    let oauth_mode = if mode == "console" { OAuthMode::Console } else { OAuthMode::Max };
    let adapter = broker_providers::AnthropicOAuthProvider::new(client_id.to_string(), redirect_uri.to_string());
    let flow = broker_core::OAuthFlow::new();

    let start = flow.begin(&adapter, oauth_mode, name.to_string(), now_ms()).await.context("starting oauth flow")?;
    println!("open this URL to authorize, then paste the resulting code:");
    println!("{}", start.authorize_url);
    print!("code: ");
    std::io::stdout().flush().ok();
    let mut code = String::new();
    std::io::stdin().read_line(&mut code).context("reading authorization code")?;

    flow.complete(&adapter, &start.session_id, code.trim(), now_ms()).await.context("completing oauth flow")
}

fn add_api_key_account(name: &str, provider: &str) -> Result<Account> {
    print!("api key for {name} ({provider}): ");
    std::io::stdout().flush().ok();
    let mut api_key = String::new();
    std::io::stdin().read_line(&mut api_key).context("reading api key")?;
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        bail!("api key must not be empty");
    }

    Ok(Account {
        id: AccountId::new(),
        name: name.to_string(),
        provider: provider.to_string(),
        credential: CredentialShape::ApiKey { api_key },
        priority: broker_common::DEFAULT_PRIORITY,
        paused: false,
        tier: DEFAULT_TIER,
        custom_endpoint: None,
        model_mappings: None,
        request_count: 0,
        total_requests: 0,
        session_request_count: 0,
        session_start: None,
        rate_limited_until: None,
        last_used_at: None,
        last_error: None,
        created_at: now_ms(),
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
