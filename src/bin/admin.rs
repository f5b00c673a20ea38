//! Site Services Admin CLI
//!
//! Administration tool for the records the site collects.
//!
//! # Usage
//!
//! ```bash
//! site-admin contacts list --limit 20
//! site-admin contacts read 3f9c0a...
//! site-admin subscribers add reader@example.com
//! site-admin subscribers list
//! site-admin users promote <uid>
//! ```
//!
//! # Environment Variables
//!
//! - `SITE_DATABASE_PATH`: SQLite database (default: ~/.local/share/site-services/site.db)
//! - `RUST_LOG`: log filter (default: site_services=info)

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use site_services::{Config, Record, SiteServices, DEFAULT_CONTACT_LIMIT};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "site-admin")]
#[command(version)]
#[command(about = "Site Services administration tool")]
struct Cli {
    /// Config file (default: ~/.config/site-services/config.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage contact form submissions
    Contacts(ContactsCommand),
    /// Manage newsletter subscribers
    Subscribers(SubscribersCommand),
    /// Manage user profiles
    Users(UsersCommand),
}

#[derive(Args)]
struct ContactsCommand {
    #[command(subcommand)]
    command: ContactsSubcommand,
}

#[derive(Subcommand)]
enum ContactsSubcommand {
    /// List the newest contacts
    List {
        #[arg(long, short, default_value_t = DEFAULT_CONTACT_LIMIT)]
        limit: usize,
    },
    /// Mark a contact as read
    Read {
        /// Contact record ID
        id: String,
    },
}

#[derive(Args)]
struct SubscribersCommand {
    #[command(subcommand)]
    command: SubscribersSubcommand,
}

#[derive(Subcommand)]
enum SubscribersSubcommand {
    /// List active subscribers
    List,
    /// Subscribe an email address
    Add { email: String },
    /// Unsubscribe an email address
    Remove { email: String },
}

#[derive(Args)]
struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Subcommand)]
enum UsersSubcommand {
    /// List user profiles
    List,
    /// Set a user's role
    Promote {
        /// User ID
        uid: String,
        #[arg(long, short, default_value = "admin")]
        role: String,
    },
}

// ============================================================================
// Commands
// ============================================================================

fn field<'a>(record: &'a Record, name: &str) -> &'a str {
    record.get_str(name).unwrap_or_default()
}

async fn list_contacts(
    services: &SiteServices,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let contacts = services.get_all_contacts(Some(limit)).await?;

    if contacts.is_empty() {
        println!("No contacts.");
        return Ok(());
    }

    println!(
        "{:<34} {:<24} {:<30} {:<6} {:<28}",
        "ID", "NAME", "EMAIL", "READ", "CREATED"
    );
    println!("{}", "-".repeat(126));

    for contact in &contacts {
        let read = if contact.get_bool("isRead").unwrap_or(false) {
            "yes"
        } else {
            "no"
        };
        println!(
            "{:<34} {:<24} {:<30} {:<6} {:<28}",
            contact.id,
            field(contact, "name"),
            field(contact, "email"),
            read,
            field(contact, "createdAt")
        );
    }

    println!();
    println!("Total: {} contact(s)", contacts.len());
    Ok(())
}

async fn mark_read(services: &SiteServices, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !services.mark_contact_as_read(id).await {
        return Err(format!("Contact '{}' not found", id).into());
    }
    println!("Marked contact {} as read", id);
    Ok(())
}

async fn list_subscribers(services: &SiteServices) -> Result<(), Box<dyn std::error::Error>> {
    let subscribers = services.get_all_subscribers().await?;

    if subscribers.is_empty() {
        println!("No active subscribers.");
        return Ok(());
    }

    println!("{:<40} {:<12} {:<28}", "EMAIL", "SOURCE", "SUBSCRIBED");
    println!("{}", "-".repeat(80));

    for subscriber in &subscribers {
        println!(
            "{:<40} {:<12} {:<28}",
            field(subscriber, "email"),
            field(subscriber, "source"),
            field(subscriber, "subscribedAt")
        );
    }

    println!();
    println!("Total: {} subscriber(s)", subscribers.len());
    Ok(())
}

async fn change_subscription(
    services: &SiteServices,
    email: &str,
    subscribe: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let envelope = if subscribe {
        services.subscribe_newsletter(email).await
    } else {
        services.unsubscribe_newsletter(email).await
    };

    if !envelope.success {
        return Err(envelope.error.unwrap_or_default().into());
    }
    println!("{}", envelope.message.unwrap_or_default());
    Ok(())
}

async fn list_users(services: &SiteServices) -> Result<(), Box<dyn std::error::Error>> {
    let users = services.get_all_users().await?;

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }

    println!(
        "{:<34} {:<32} {:<20} {:<8} {:<8}",
        "UID", "EMAIL", "NAME", "ROLE", "PROVIDER"
    );
    println!("{}", "-".repeat(106));

    for user in &users {
        println!(
            "{:<34} {:<32} {:<20} {:<8} {:<8}",
            field(user, "uid"),
            field(user, "email"),
            field(user, "displayName"),
            field(user, "role"),
            field(user, "provider")
        );
    }

    println!();
    println!("Total: {} user(s)", users.len());
    Ok(())
}

async fn promote_user(
    services: &SiteServices,
    uid: &str,
    role: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let envelope = services.set_user_role(uid, role).await;
    if !envelope.success {
        return Err(envelope.error.unwrap_or_default().into());
    }
    println!("Set role of {} to {}", uid, role);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(cli.config)?;
    // Admin commands never look up the caller's address
    config.ip_lookup.enabled = false;
    let services = SiteServices::from_config(&config).await?;

    match cli.command {
        Commands::Contacts(cmd) => match cmd.command {
            ContactsSubcommand::List { limit } => list_contacts(&services, limit).await,
            ContactsSubcommand::Read { id } => mark_read(&services, &id).await,
        },
        Commands::Subscribers(cmd) => match cmd.command {
            SubscribersSubcommand::List => list_subscribers(&services).await,
            SubscribersSubcommand::Add { email } => {
                change_subscription(&services, &email, true).await
            }
            SubscribersSubcommand::Remove { email } => {
                change_subscription(&services, &email, false).await
            }
        },
        Commands::Users(cmd) => match cmd.command {
            UsersSubcommand::List => list_users(&services).await,
            UsersSubcommand::Promote { uid, role } => promote_user(&services, &uid, &role).await,
        },
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "site_services=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
