use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use axum::http::{Method, header};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use digistore::checkout::{Checkout, CheckoutSettings};
use digistore::config::Config;
use digistore::db::{self, AppState, SqliteRepository, queries};
use digistore::handlers;
use digistore::models::{
    CouponBook, CreateProduct, CreateProductVariant, CryptoCurrency, DEFAULT_ORDER_LIST_LIMIT, Order,
    OrderFilter, OrderStatus, PaymentMethod, PaymentStatus,
};
use digistore::payments::{
    IntentBuilder, PaymentGateway, StaticRateSource, StripeClient, UnconfiguredGateway,
};
use digistore::settlement::{EsploraIndexer, SettlementPolicy, SettlementWatcher, WatcherTiming};

#[derive(Parser)]
#[command(name = "digistore")]
#[command(author, version, about = "Digital goods checkout with card and crypto settlement")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Manage catalog products
    Product {
        #[command(subcommand)]
        action: ProductAction,
    },
    /// Inspect orders and move paid orders through fulfilment
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },
}

#[derive(Subcommand)]
enum ProductAction {
    /// Add a product to the catalog
    Add {
        #[arg(long)]
        slug: String,

        #[arg(long)]
        name: String,

        /// Base price, e.g. 29.99
        #[arg(long)]
        price: Decimal,

        #[arg(long)]
        description: Option<String>,

        /// Selectable option as `Name=Value` or `Name=Value:+10.00` (repeatable)
        #[arg(long = "option")]
        options: Vec<String>,
    },
    /// List products
    List {
        /// Include inactive products
        #[arg(long)]
        all: bool,
    },
    /// Show a product in the storefront again
    Activate { slug: String },
    /// Hide a product from the storefront and checkout
    Deactivate { slug: String },
}

#[derive(Subcommand)]
enum OrderAction {
    /// List orders, newest first
    List {
        #[arg(long)]
        status: Option<OrderStatus>,

        #[arg(long)]
        payment_status: Option<PaymentStatus>,

        #[arg(long)]
        method: Option<PaymentMethod>,

        #[arg(long, default_value_t = DEFAULT_ORDER_LIST_LIMIT)]
        limit: u32,
    },
    /// Show one order with its lines
    Show { order_number: String },
    /// Mark a paid order as being prepared for delivery
    Process { order_number: String },
    /// Mark a paid order as delivered
    Fulfil { order_number: String },
    /// Record a refund already issued at the payment provider
    Refund { order_number: String },
}

fn parse_option(raw: &str) -> anyhow::Result<CreateProductVariant> {
    let (name, rest) = raw
        .split_once('=')
        .with_context(|| format!("Option '{}' must look like Name=Value[:adjust]", raw))?;
    let (value, price_adjust) = match rest.split_once(':') {
        Some((value, adjust)) => (
            value,
            adjust
                .trim_start_matches('+')
                .parse::<Decimal>()
                .with_context(|| format!("Invalid price adjustment in '{}'", raw))?,
        ),
        None => (rest, Decimal::ZERO),
    };
    if name.trim().is_empty() || value.trim().is_empty() {
        bail!("Option '{}' needs both a name and a value", raw);
    }
    Ok(CreateProductVariant {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        price_adjust,
    })
}

fn open_db(config: &Config) -> anyhow::Result<db::DbPool> {
    let pool = db::create_pool(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    let conn = pool.get()?;
    db::init_db(&conn).context("Failed to initialize schema")?;
    Ok(pool)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = open_db(&config)?;
    let repo = Arc::new(SqliteRepository::new(pool));

    let gateway: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeClient::new(key.clone())),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, card checkout is disabled");
            Arc::new(UnconfiguredGateway)
        }
    };
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, Stripe webhooks will be rejected");
    }

    let currencies = [CryptoCurrency::Btc, CryptoCurrency::Ltc];
    let rates = StaticRateSource::new(currencies.map(|c| (c, config.crypto(c).rate)))?;
    let addresses: HashMap<_, _> = currencies
        .iter()
        .map(|&c| (c, config.crypto(c).address.clone()))
        .collect();
    let indexer_urls: HashMap<_, _> = currencies
        .iter()
        .map(|&c| (c, config.crypto(c).indexer_url.clone()))
        .collect();

    let intents =
        IntentBuilder::new(Arc::new(rates), addresses).with_ttl(config.intent_ttl_seconds);

    let watcher = Arc::new(SettlementWatcher::new(
        repo.clone(),
        Arc::new(EsploraIndexer::new(indexer_urls)),
        SettlementPolicy {
            btc_min_confirmations: config.btc.min_confirmations,
            ltc_min_confirmations: config.ltc.min_confirmations,
            tolerance_bps: config.payment_tolerance_bps,
            clock_skew_seconds: config.block_time_skew_seconds,
        },
        WatcherTiming {
            observation_delay: Duration::from_secs(config.watcher_observation_delay_seconds),
            poll_interval: Duration::from_secs(config.watcher_poll_interval_seconds),
        },
    ));

    let checkout = Arc::new(Checkout::new(
        repo.clone(),
        gateway,
        intents,
        watcher.clone(),
        CouponBook::default(),
        CheckoutSettings {
            tax_rate: config.tax_rate,
            currency: config.stripe_currency.clone(),
            success_url: format!(
                "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                config.base_url
            ),
            cancel_url: config.cart_page_url.clone(),
        },
    ));

    let state = AppState {
        orders: repo.clone(),
        products: repo,
        checkout,
        success_page_url: config.success_page_url.clone(),
        stripe_webhook_secret: config.stripe_webhook_secret.clone(),
    };

    let resumed = watcher.resume_open_intents().await?;
    if resumed > 0 {
        tracing::info!("Resumed {} settlement watcher(s)", resumed);
    }

    let cors = if config.dev_mode {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    };

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("digistore listening on {}", addr);
    if config.dev_mode {
        tracing::info!("Running in development mode");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

fn product_command(config: &Config, action: ProductAction) -> anyhow::Result<()> {
    let pool = open_db(config)?;
    let mut conn = pool.get()?;

    match action {
        ProductAction::Add {
            slug,
            name,
            price,
            description,
            options,
        } => {
            let variants = options
                .iter()
                .map(|o| parse_option(o))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let product = queries::create_product(
                &mut conn,
                &CreateProduct {
                    slug,
                    name,
                    description,
                    price,
                    variants,
                },
            )?;
            println!("Created product {} ({}) at {}", product.slug, product.id, product.price);
        }
        ProductAction::Activate { slug } => set_active(&conn, &slug, true)?,
        ProductAction::Deactivate { slug } => set_active(&conn, &slug, false)?,
        ProductAction::List { all } => {
            for product in queries::list_products(&conn, all)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    product.slug,
                    product.price,
                    if product.active { "active" } else { "inactive" },
                    product.name
                );
                for variant in &product.variants {
                    println!("  {}={} ({:+})", variant.name, variant.value, variant.price_adjust);
                }
            }
        }
    }
    Ok(())
}

fn set_active(conn: &Connection, slug: &str, active: bool) -> anyhow::Result<()> {
    if !queries::set_product_active(conn, slug, active)? {
        bail!("No product with slug '{}'", slug);
    }
    println!(
        "Product {} is now {}",
        slug,
        if active { "active" } else { "inactive" }
    );
    Ok(())
}

fn find_order(conn: &Connection, order_number: &str) -> anyhow::Result<Order> {
    queries::get_order_by_number(conn, order_number)?
        .with_context(|| format!("No order numbered {}", order_number))
}

fn order_transition(
    conn: &Connection,
    order_number: &str,
    verb: &str,
    apply: fn(&Connection, &str) -> digistore::error::Result<bool>,
) -> anyhow::Result<()> {
    let order = find_order(conn, order_number)?;
    if !apply(conn, &order.id)? {
        bail!(
            "Cannot {} order {}: it is {} with payment {}",
            verb,
            order.order_number,
            order.status.as_ref(),
            order.payment_status.as_ref()
        );
    }
    let order = find_order(conn, order_number)?;
    tracing::info!(
        "Order {} moved to {} by operator",
        order.order_number,
        order.status.as_ref()
    );
    println!("Order {} is now {}", order.order_number, order.status.as_ref());
    Ok(())
}

fn order_command(config: &Config, action: OrderAction) -> anyhow::Result<()> {
    let pool = open_db(config)?;
    let conn = pool.get()?;

    match action {
        OrderAction::List {
            status,
            payment_status,
            method,
            limit,
        } => {
            let filter = OrderFilter {
                status,
                payment_status,
                payment_method: method,
                limit: Some(limit),
            };
            for order in queries::list_orders(&conn, &filter)? {
                println!(
                    "{}\t{}\t{}/{}\t{}\t{}",
                    order.order_number,
                    order.totals.total,
                    order.status.as_ref(),
                    order.payment_status.as_ref(),
                    order.payment_method.as_ref(),
                    order.customer_email
                );
            }
        }
        OrderAction::Show { order_number } => {
            let order = find_order(&conn, &order_number)?;
            println!("Order {} ({})", order.order_number, order.id);
            println!(
                "Customer: {}{}",
                order.customer_email,
                order.customer_name.as_deref().map(|n| format!(" ({})", n)).unwrap_or_default()
            );
            println!(
                "Status: {} / payment {} via {}",
                order.status.as_ref(),
                order.payment_status.as_ref(),
                order.payment_method.as_ref()
            );
            for line in &order.lines {
                println!("  {} x{} @ {} = {}", line.name, line.quantity, line.unit_price, line.line_total);
                for (name, value) in &line.options {
                    println!("    {}: {}", name, value);
                }
            }
            println!(
                "Subtotal {}  Discount {}  Tax {}  Total {}",
                order.totals.subtotal, order.totals.discount, order.totals.tax, order.totals.total
            );
            if let Some(reference) = &order.confirmation_ref {
                println!("Confirmed by {}", reference);
            }
        }
        OrderAction::Process { order_number } => {
            order_transition(&conn, &order_number, "process", queries::try_start_processing)?
        }
        OrderAction::Fulfil { order_number } => {
            order_transition(&conn, &order_number, "fulfil", queries::try_fulfil_order)?
        }
        OrderAction::Refund { order_number } => {
            order_transition(&conn, &order_number, "refund", queries::try_refund_order)?
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("digistore=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Product { action } => product_command(&config, action),
        Commands::Order { action } => order_command(&config, action),
    }
}
