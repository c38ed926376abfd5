mod commands;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use deskwatch::db::Database;

#[derive(Parser)]
#[command(name = "deskwatch")]
#[command(about = "Helpdesk ticket tracker with an SLA compliance and escalation engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize deskwatch in the current directory
    Init,

    /// Ticket management (every mutation re-runs the SLA/escalation checks)
    Ticket {
        #[command(subcommand)]
        action: TicketCommands,
    },

    /// SLA policy management
    Policy {
        #[command(subcommand)]
        action: PolicyCommands,
    },

    /// Escalation rule management
    Rule {
        #[command(subcommand)]
        action: RuleCommands,
    },

    /// User management
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Run SLA violation and escalation checks for a ticket
    Check {
        /// Ticket ID
        id: i64,
    },

    /// Compute the calendar-aware deadline for an (org, priority, type) tuple
    Deadline {
        /// Organization ID
        org: i64,
        /// Priority (low, normal, high, urgent)
        priority: String,
        /// Ticket type (question, incident, problem, task)
        ticket_type: String,
        /// Budget to apply (response, resolution)
        #[arg(short, long, default_value = "response")]
        kind: String,
        /// Start instant (RFC 3339); defaults to now
        #[arg(short, long)]
        from: Option<String>,
    },

    /// List SLA violations recorded for a ticket
    Violations {
        /// Ticket ID
        id: i64,
    },

    /// List queued escalation notifications
    Outbox,
}

#[derive(Subcommand)]
enum TicketCommands {
    /// Create a new ticket
    Create {
        /// Organization ID
        org: i64,
        /// Ticket subject
        subject: String,
        /// Ticket description
        #[arg(short, long)]
        description: Option<String>,
        /// Priority (low, normal, high, urgent)
        #[arg(short, long, default_value = "normal")]
        priority: String,
        /// Ticket type (question, incident, problem, task)
        #[arg(short = 't', long = "type", default_value = "question")]
        ticket_type: String,
    },
    /// Show ticket details
    Show {
        /// Ticket ID
        id: i64,
    },
    /// List tickets
    List {
        /// Filter by organization
        #[arg(short, long)]
        org: Option<i64>,
        /// Filter by status (new, open, pending, resolved, closed)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Assign a ticket to a user
    Assign {
        /// Ticket ID
        id: i64,
        /// User ID
        user: i64,
    },
    /// Record the first agent response on a ticket
    Respond {
        /// Ticket ID
        id: i64,
    },
    /// Mark a ticket resolved
    Resolve {
        /// Ticket ID
        id: i64,
    },
    /// Change a ticket's priority
    SetPriority {
        /// Ticket ID
        id: i64,
        /// New priority
        priority: String,
    },
    /// Change a ticket's status
    SetStatus {
        /// Ticket ID
        id: i64,
        /// New status
        status: String,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Add an SLA policy for an (org, priority, type) tuple
    Add {
        /// Organization ID
        org: i64,
        /// Priority the policy applies to
        priority: String,
        /// Ticket type the policy applies to
        ticket_type: String,
        /// Response budget in business hours
        #[arg(long)]
        response_hours: f64,
        /// Resolution budget in business hours
        #[arg(long)]
        resolution_hours: f64,
        /// Hour of day work opens (0-23)
        #[arg(long, default_value_t = 9)]
        hours_start: u32,
        /// Hour of day work closes (0-23)
        #[arg(long, default_value_t = 17)]
        hours_end: u32,
        /// Working weekdays, comma-separated ISO numbers (1 = Monday)
        #[arg(long, default_value = "1,2,3,4,5")]
        weekdays: String,
        /// Offset from UTC in minutes, east positive
        #[arg(long, default_value_t = 0)]
        utc_offset: i32,
        /// Holiday date (YYYY-MM-DD); may be repeated
        #[arg(long = "holiday")]
        holidays: Vec<String>,
    },
    /// List an organization's SLA policies
    List {
        /// Organization ID
        org: i64,
    },
    /// Add a holiday to an existing policy's calendar
    Holiday {
        /// Policy ID
        id: i64,
        /// Date (YYYY-MM-DD)
        date: String,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// Add an escalation rule
    Add {
        /// Organization ID
        org: i64,
        /// Rule name
        name: String,
        /// Trigger kind (age, priority-equals, status-equals, manual)
        #[arg(long)]
        trigger: String,
        /// Age threshold in hours (age trigger)
        #[arg(long)]
        hours: Option<i64>,
        /// Priority to match (priority-equals trigger)
        #[arg(long)]
        trigger_priority: Option<String>,
        /// Status to match (status-equals trigger)
        #[arg(long)]
        trigger_status: Option<String>,
        /// Action kind (notify-user, reassign, change-priority, notify-list)
        #[arg(long)]
        action: String,
        /// Target user ID (notify-user, reassign)
        #[arg(long)]
        user: Option<i64>,
        /// Target role (reassign)
        #[arg(long)]
        role: Option<String>,
        /// New priority (change-priority)
        #[arg(long)]
        new_priority: Option<String>,
        /// Notification recipient (notify-list); may be repeated
        #[arg(long = "recipient")]
        recipients: Vec<String>,
    },
    /// List an organization's escalation rules
    List {
        /// Organization ID
        org: i64,
    },
    /// Deactivate a rule
    Disable {
        /// Rule ID
        id: i64,
    },
    /// Fire a rule against a ticket explicitly (the only path for manual rules)
    Fire {
        /// Rule ID
        id: i64,
        /// Ticket ID
        ticket: i64,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user
    Add {
        /// Organization ID
        org: i64,
        /// Display name
        name: String,
        /// Email address
        email: String,
        /// Role (e.g. tech, manager)
        #[arg(short, long, default_value = "tech")]
        role: String,
    },
    /// List an organization's users
    List {
        /// Organization ID
        org: i64,
    },
}

fn find_deskwatch_dir() -> Result<PathBuf> {
    let mut current = env::current_dir()?;

    loop {
        let candidate = current.join(".deskwatch");
        if candidate.exists() && candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            bail!("Not a deskwatch directory (or any parent). Run 'deskwatch init' first.");
        }
    }
}

fn get_db() -> Result<Database> {
    let deskwatch_dir = find_deskwatch_dir()?;
    let db_path = deskwatch_dir.join("helpdesk.db");
    Database::open(&db_path).context("Failed to open database")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let cwd = env::current_dir()?;
            commands::init::run(&cwd)
        }

        Commands::Ticket { action } => {
            let db = get_db()?;
            match action {
                TicketCommands::Create {
                    org,
                    subject,
                    description,
                    priority,
                    ticket_type,
                } => commands::ticket::create(
                    &db,
                    org,
                    &subject,
                    description.as_deref(),
                    &priority,
                    &ticket_type,
                ),
                TicketCommands::Show { id } => commands::ticket::show(&db, id),
                TicketCommands::List { org, status } => {
                    commands::ticket::list(&db, org, status.as_deref())
                }
                TicketCommands::Assign { id, user } => commands::ticket::assign(&db, id, user),
                TicketCommands::Respond { id } => commands::ticket::respond(&db, id),
                TicketCommands::Resolve { id } => commands::ticket::resolve(&db, id),
                TicketCommands::SetPriority { id, priority } => {
                    commands::ticket::set_priority(&db, id, &priority)
                }
                TicketCommands::SetStatus { id, status } => {
                    commands::ticket::set_status(&db, id, &status)
                }
            }
        }

        Commands::Policy { action } => {
            let db = get_db()?;
            match action {
                PolicyCommands::Add {
                    org,
                    priority,
                    ticket_type,
                    response_hours,
                    resolution_hours,
                    hours_start,
                    hours_end,
                    weekdays,
                    utc_offset,
                    holidays,
                } => commands::policy::add(
                    &db,
                    org,
                    &priority,
                    &ticket_type,
                    response_hours,
                    resolution_hours,
                    hours_start,
                    hours_end,
                    &weekdays,
                    utc_offset,
                    &holidays,
                ),
                PolicyCommands::List { org } => commands::policy::list(&db, org),
                PolicyCommands::Holiday { id, date } => commands::policy::holiday(&db, id, &date),
            }
        }

        Commands::Rule { action } => {
            let db = get_db()?;
            match action {
                RuleCommands::Add {
                    org,
                    name,
                    trigger,
                    hours,
                    trigger_priority,
                    trigger_status,
                    action,
                    user,
                    role,
                    new_priority,
                    recipients,
                } => commands::rule::add(
                    &db,
                    org,
                    &name,
                    &trigger,
                    hours,
                    trigger_priority.as_deref(),
                    trigger_status.as_deref(),
                    &action,
                    user,
                    role,
                    new_priority.as_deref(),
                    recipients,
                ),
                RuleCommands::List { org } => commands::rule::list(&db, org),
                RuleCommands::Disable { id } => commands::rule::disable(&db, id),
                RuleCommands::Fire { id, ticket } => commands::rule::fire(&db, id, ticket),
            }
        }

        Commands::User { action } => {
            let db = get_db()?;
            match action {
                UserCommands::Add { org, name, email, role } => {
                    commands::user::add(&db, org, &name, &email, &role)
                }
                UserCommands::List { org } => commands::user::list(&db, org),
            }
        }

        Commands::Check { id } => {
            let db = get_db()?;
            commands::check::run(&db, id)
        }

        Commands::Deadline {
            org,
            priority,
            ticket_type,
            kind,
            from,
        } => {
            let db = get_db()?;
            commands::deadline::run(&db, org, &priority, &ticket_type, &kind, from.as_deref())
        }

        Commands::Violations { id } => {
            let db = get_db()?;
            commands::violations::run(&db, id)
        }

        Commands::Outbox => {
            let db = get_db()?;
            commands::outbox::run(&db)
        }
    }
}
