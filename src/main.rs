use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use contact_operation_queue::clock::SystemClock;
use contact_operation_queue::contact::api::{IdentifyResult, MockContactApi, ResolvedContact};
use contact_operation_queue::contact::domain::{
    AttributeUpdate, ChannelType, TagGroupUpdate, TagGroupUpdateType,
};
use contact_operation_queue::contact::runtime::{
    ManualWorkScheduler, TokioWorkScheduler, WorkScheduler,
};
use contact_operation_queue::persistence::DEFAULT_STORE_PATH;
use contact_operation_queue::{ContactConfig, ContactDeps, ContactManager, JsonFileStore};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON file holding the operation log and identity.
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the stored identity and the pending operations.
    Show,
    /// Append one operation to the stored log.
    Enqueue {
        #[command(subcommand)]
        operation: Operation,
    },
    /// Drain the log against an in-process simulated backend.
    Simulate {
        #[arg(long, default_value = "channel")]
        channel_id: String,
        /// Contact ID the simulated backend resolves to.
        #[arg(long, default_value = "simulated-contact")]
        contact_id: String,
        #[arg(long)]
        anonymous: bool,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand)]
enum Operation {
    Identify {
        named_user_id: String,
    },
    Reset,
    Resolve,
    Tag {
        #[arg(long)]
        group: String,
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(long)]
        remove: bool,
    },
    Attribute {
        name: String,
        /// JSON value; omit to remove the attribute.
        value: Option<String>,
    },
    Associate {
        channel_id: String,
        #[arg(long, value_enum, default_value_t = ChannelKind::Open)]
        channel_type: ChannelKind,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChannelKind {
    Email,
    Sms,
    Open,
}

impl From<ChannelKind> for ChannelType {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Email => ChannelType::Email,
            ChannelKind::Sms => ChannelType::Sms,
            ChannelKind::Open => ChannelType::Open,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ContactConfig::load(path)?,
        None => ContactConfig::default(),
    };
    let store = Arc::new(JsonFileStore::open(&args.store)?);
    println!("[MAIN] Store: {}", args.store.display());

    match args.command {
        Command::Simulate {
            channel_id,
            contact_id,
            anonymous,
            timeout_secs,
        } => {
            let result = IdentifyResult {
                contact: ResolvedContact {
                    contact_id,
                    is_anonymous: anonymous,
                    channel_associated_date: Utc::now(),
                },
                token: "simulated-token".to_string(),
                token_expires_in_ms: 3_600_000,
            };
            let api = Arc::new(MockContactApi::new().with_default_identity(result));
            let scheduler = Arc::new(TokioWorkScheduler::new(config.retry.clone()));
            let manager = build(store, api, scheduler.clone(), config)?;

            run_simulation(&manager, &scheduler, channel_id, Duration::from_secs(timeout_secs)).await?;
            print_state(&manager);
        }
        command => {
            // No channel ID is set, so nothing is dispatched.
            let manager = build(
                store,
                Arc::new(MockContactApi::new()),
                Arc::new(ManualWorkScheduler::new()),
                config,
            )?;
            if let Command::Enqueue { operation } = command {
                enqueue(&manager, operation)?;
            }
            print_state(&manager);
        }
    }

    Ok(())
}

fn build(
    store: Arc<JsonFileStore>,
    api: Arc<MockContactApi>,
    scheduler: Arc<dyn WorkScheduler>,
    config: ContactConfig,
) -> Result<Arc<ContactManager>> {
    let manager = ContactManager::new(
        ContactDeps {
            store,
            api,
            scheduler,
            clock: Arc::new(SystemClock),
        },
        config,
    )?;
    manager.generate_default_contact_id_if_not_set()?;
    Ok(manager)
}

fn enqueue(manager: &ContactManager, operation: Operation) -> Result<()> {
    println!("[MAIN] Enqueueing...");
    match operation {
        Operation::Identify { named_user_id } => manager.identify(&named_user_id)?,
        Operation::Reset => manager.reset()?,
        Operation::Resolve => {
            manager.foreground_resolve()?;
        }
        Operation::Tag { group, tags, remove } => {
            let kind = if remove {
                TagGroupUpdateType::Remove
            } else {
                TagGroupUpdateType::Add
            };
            manager.edit_tags(vec![TagGroupUpdate::new(group, tags, kind)])?;
        }
        Operation::Attribute { name, value } => {
            let now = Utc::now();
            let update = match value {
                Some(raw) => AttributeUpdate::set(name, serde_json::from_str(&raw)?, now),
                None => AttributeUpdate::remove(name, now),
            };
            manager.edit_attributes(vec![update])?;
        }
        Operation::Associate {
            channel_id,
            channel_type,
        } => {
            manager.associate_channel(&channel_id, channel_type.into())?;
        }
    }
    Ok(())
}

async fn run_simulation(
    manager: &Arc<ContactManager>,
    scheduler: &TokioWorkScheduler,
    channel_id: String,
    timeout: Duration,
) -> Result<()> {
    let mut updates = manager.subscribe();
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            println!("[SIMULATE] {:?}", update);
        }
    });

    println!(
        "[SIMULATE] Draining {} operations...",
        manager.pending_operations().len()
    );
    let t0 = Instant::now();
    manager.set_channel_id(Some(channel_id));

    while !scheduler.is_idle() || !manager.pending_operations().is_empty() {
        if t0.elapsed() > timeout {
            manager.shutdown();
            bail!("operations still pending after {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("[SIMULATE] Drained in {:?}", t0.elapsed());
    Ok(())
}

fn print_state(manager: &ContactManager) {
    let pending = manager.pending_operations();

    println!("-----------------------------------");
    match manager.contact_id_info() {
        Some(info) => {
            println!("Contact ID:       {}", info.contact_id);
            println!("Stable:           {}", info.is_stable);
            println!(
                "Named User:       {}",
                info.named_user_id.as_deref().unwrap_or("-")
            );
        }
        None => println!("Contact ID:       -"),
    }
    println!("Pending:          {}", pending.len());
    for entry in &pending {
        println!("  {} {:?} ({})", entry.created_at, entry.operation.kind(), entry.id);
    }
    println!("-----------------------------------");
}
