use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use bookline::config::Config;
use bookline::desk::{BookingDesk, Outcome};
use bookline::grouping::{DisplayPage, DisplayUnit};
use bookline::lifecycle::{Authority, PaymentEvent};
use bookline::model::*;
use bookline::pricing::{self, PriceQuery, PriceResolution, ResolutionSession, SessionEvent};
use bookline::store::{BookingFilter, MemoryStore};

#[derive(Parser)]
#[command(
    name = "bookline",
    version,
    about = "Booking desk for a home-service business: pricing, lifecycle and listings"
)]
struct Cli {
    /// Journal directory (overrides BOOKLINE_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load packages and bookings from a JSON file
    Import {
        file: PathBuf,
    },
    /// Show one page of bookings, recurring series folded together
    List {
        #[arg(short, long, default_value = "1")]
        page: usize,
        /// Bookings per page (overrides BOOKLINE_PAGE_SIZE)
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(short, long)]
        customer: Option<Ulid>,
        /// Include archived bookings
        #[arg(long)]
        archived: bool,
    },
    /// Price a package for an area and visit frequency
    Quote {
        service_type: String,
        package: Ulid,
        /// Square metres
        area: f64,
        #[arg(default_value = "1", allow_hyphen_values = true)]
        frequency: i64,
    },
    /// Move a booking to a new status
    Status {
        booking: Ulid,
        status: BookingStatus,
    },
    /// Record a payment event
    Pay {
        booking: Ulid,
        #[command(subcommand)]
        action: PayAction,
    },
    /// Hide a booking from active views
    Archive {
        booking: Ulid,
    },
    /// Permanently delete a booking
    Delete {
        booking: Ulid,
        /// Confirm an irreversible delete
        #[arg(long)]
        force: bool,
    },
    /// Rewrite the journal to its minimal form
    Compact,
    /// Check every package in the catalog for tier table problems
    Lint {
        service_type: String,
    },
}

#[derive(Subcommand)]
enum PayAction {
    /// Customer sent a transfer slip
    Submit { artifact: String },
    /// Paid at the counter
    Paid { method: PaymentMethod },
    /// Staff checked the slip
    Verify,
    Refund { reason: String },
    RefundDone,
    RefundCancel,
}

impl From<PayAction> for PaymentEvent {
    fn from(action: PayAction) -> Self {
        match action {
            PayAction::Submit { artifact } => PaymentEvent::SubmitEvidence { artifact },
            PayAction::Paid { method } => PaymentEvent::MarkPaid { method },
            PayAction::Verify => PaymentEvent::Verify,
            PayAction::Refund { reason } => PaymentEvent::RequestRefund { reason },
            PayAction::RefundDone => PaymentEvent::CompleteRefund,
            PayAction::RefundCancel => PaymentEvent::CancelRefund,
        }
    }
}

#[derive(Deserialize)]
struct ImportFile {
    #[serde(default)]
    packages: Vec<ServicePackage>,
    #[serde(default)]
    bookings: Vec<Booking>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    bookline::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(MemoryStore::open(&config.journal_path())?);
    let desk = BookingDesk::new(store.clone(), config.transition_table());

    match cli.command {
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let import: ImportFile = serde_json::from_str(&raw)?;
            for package in &import.packages {
                for issue in pricing::check_package(package) {
                    tracing::warn!(package = %package.id, "{issue}");
                }
            }
            let (packages, bookings) = (import.packages.len(), import.bookings.len());
            for package in import.packages {
                store.upsert_package(package).await?;
            }
            for booking in import.bookings {
                store.upsert_booking(booking).await?;
            }
            info!(packages, bookings, "import complete");
        }
        Commands::List {
            page,
            page_size,
            customer,
            archived,
        } => {
            let filter = BookingFilter {
                customer_id: customer,
                include_archived: archived,
                ..Default::default()
            };
            let page_size = page_size.unwrap_or(config.page_size);
            let now = Local::now().naive_local();
            let built = desk.page(&filter, page, page_size, now).await?;
            print_page(&built);
        }
        Commands::Quote {
            service_type,
            package,
            area,
            frequency,
        } => {
            let (session, mut events) =
                ResolutionSession::spawn(store.clone(), service_type, config.debounce);
            session.update(PriceQuery::new(package, area, frequency));
            let event = events.recv().await;
            session.close().await;
            match event {
                Some(SessionEvent::Resolved(resolved)) => print_resolution(&resolved.resolution),
                Some(SessionEvent::Failed { error, .. }) => return Err(error.into()),
                None => println!("no price"),
            }
        }
        Commands::Status { booking, status } => {
            print_outcome(desk.change_status(booking, status).await?);
        }
        Commands::Pay { booking, action } => {
            print_outcome(desk.apply_payment(booking, &action.into()).await?);
        }
        Commands::Archive { booking } => {
            print_outcome(desk.archive(booking).await?);
        }
        Commands::Delete { booking, force } => {
            let authority = if force {
                Authority::Privileged
            } else {
                Authority::Operator
            };
            print_outcome(desk.delete(booking, authority).await?);
        }
        Commands::Compact => {
            store.compact().await?;
        }
        Commands::Lint { service_type } => {
            let catalog = bookline::store::CatalogSource::fetch_package_catalog(
                store.as_ref(),
                &service_type,
            )
            .await?;
            for package in &catalog {
                let issues = pricing::check_package(package);
                if issues.is_empty() {
                    println!("{} ({}): ok", package.name, package.id);
                }
                for issue in issues {
                    println!("{} ({}): {issue}", package.name, package.id);
                }
            }
        }
    }

    let appends = store.appends_since_compact().await;
    if appends >= config.compact_threshold {
        info!(appends, "compaction threshold reached");
        store.compact().await?;
    }
    Ok(())
}

fn print_outcome(outcome: Outcome) {
    match outcome {
        Outcome::Applied(description) => println!("{description}"),
        Outcome::Unchanged => println!("nothing to do"),
    }
}

fn print_resolution(resolution: &PriceResolution) {
    match resolution {
        PriceResolution::Found(quote) => {
            println!("price: {}", quote.price);
            println!("staff: {}", quote.required_staff);
            if let Some(hours) = quote.estimated_hours {
                println!("hours: {hours}");
            }
        }
        PriceResolution::NotFound(miss) => println!("no price: {miss}"),
    }
    for issue in resolution.integrity() {
        println!("warning: {issue}");
    }
}

fn print_booking(prefix: &str, b: &Booking) {
    println!(
        "{prefix}{}  {} {}-{}  {:<12} {:<20} {:>8}{}",
        b.id,
        b.booking_date,
        b.start_time.format("%H:%M"),
        b.end_time.format("%H:%M"),
        b.status.to_string(),
        b.payment_status.to_string(),
        b.total_price,
        if b.is_archived() { "  [archived]" } else { "" },
    );
}

fn print_page(page: &DisplayPage) {
    if page.is_gap() {
        println!("(no listing starts on this page; the series before it runs across it)");
    }
    for unit in &page.items {
        match unit {
            DisplayUnit::Single(b) => print_booking("", b),
            DisplayUnit::Group(g) => {
                let pattern = g
                    .pattern
                    .map_or("recurring".to_string(), |p| format!("{p:?}").to_lowercase());
                println!(
                    "series {} ({pattern}, {} bookings, {} upcoming)",
                    g.group_id,
                    g.len(),
                    g.tally.upcoming
                );
                for member in &g.members {
                    print_booking("  ", member);
                }
            }
        }
    }
    println!(
        "page {}/{} ({} bookings on this page, {} total)",
        page.page,
        page.total_pages.max(1),
        page.booking_count(),
        page.total_weight
    );
}
