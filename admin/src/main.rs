mod config;
mod seed;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use entity::PipelineKind;
use migration::{Migrator, MigratorTrait};
use platform_api::{ApiError, ApiResult};
use platform_authz::{AuthzError, Permission, PermissionGate, TtlCache};
use platform_db::connect;
use platform_obs::{ObsConfig, init_tracing};
use products_crm::{
    BuyerFields, DbUserDirectory, DealFields, ItemQuery, MoveRequest, PipelineFields,
    PipelineManager, PipelineSettings, SortDirection, SortField, StageDeletePolicy,
};
use sea_orm::DatabaseConnection;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "crm-admin", version, about = "Deal and buyer pipeline administration")]
struct Cli {
    /// User the command acts as; pipeline commands are checked against its roles.
    #[arg(long, global = true, env = "CRM_ACTOR")]
    actor: Option<Uuid>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Seed a demo user plus a deal and a buyer funnel.
    Seed {
        #[arg(long, default_value = "admin@example.com")]
        email: String,
    },
    /// Work with deal funnels.
    #[command(subcommand)]
    Deals(PipelineCommand),
    /// Work with buyer funnels.
    #[command(subcommand)]
    Buyers(PipelineCommand),
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Subcommand, Debug)]
enum PipelineCommand {
    /// List categories.
    Categories {
        #[arg(long, help = "Include soft-deleted categories")]
        all: bool,
    },
    /// Print the stages of a category with their items in order.
    Board {
        #[arg(long)]
        category: Uuid,
        #[arg(long, help = "Case-insensitive title filter")]
        search: Option<String>,
        #[arg(long, default_value = "order")]
        sort: String,
        #[arg(long)]
        desc: bool,
    },
    /// Move an item to a stage, optionally at a position.
    Move {
        #[arg(long)]
        item: Uuid,
        #[arg(long)]
        stage: Uuid,
        #[arg(long)]
        order: Option<i32>,
        #[arg(long, help = "Refuse the move unless the item is still at this revision")]
        expected_revision: Option<i32>,
    },
    /// Close an item.
    Close {
        #[arg(long)]
        item: Uuid,
    },
    /// Soft-delete a stage.
    DeleteStage {
        #[arg(long)]
        category: Uuid,
        #[arg(long)]
        stage: Uuid,
        #[arg(long, help = "block | allow_dangling | reassign:<stage-id>")]
        policy: Option<StageDeletePolicy>,
    },
    /// Print the revision log of an item or a category.
    History {
        #[arg(long, conflicts_with = "category", required_unless_present = "category")]
        item: Option<Uuid>,
        #[arg(long)]
        category: Option<Uuid>,
    },
}

#[derive(Copy, Clone, Debug)]
enum Access {
    Read,
    Write,
    ManageFunnels,
}

impl PipelineCommand {
    fn access(&self) -> Access {
        match self {
            PipelineCommand::Categories { .. }
            | PipelineCommand::Board { .. }
            | PipelineCommand::History { .. } => Access::Read,
            PipelineCommand::Move { .. } | PipelineCommand::Close { .. } => Access::Write,
            PipelineCommand::DeleteStage { .. } => Access::ManageFunnels,
        }
    }
}

fn permission(kind: PipelineKind, access: Access) -> Permission {
    match (kind, access) {
        (PipelineKind::Deal, Access::Read) => Permission::DealsRead,
        (PipelineKind::Deal, Access::Write) => Permission::DealsWrite,
        (PipelineKind::Deal, Access::ManageFunnels) => Permission::DealsManageFunnels,
        (PipelineKind::Buyer, Access::Read) => Permission::BuyersRead,
        (PipelineKind::Buyer, Access::Write) => Permission::BuyersWrite,
        (PipelineKind::Buyer, Access::ManageFunnels) => Permission::BuyersManageFunnels,
    }
}

fn authz_error(err: AuthzError) -> ApiError {
    match err {
        AuthzError::Denied { .. } => ApiError::Forbidden(err.to_string()),
        AuthzError::Lookup(_) => ApiError::internal(err.into()),
    }
}

struct Admin {
    db: Arc<DatabaseConnection>,
    users: Arc<DbUserDirectory>,
    gate: PermissionGate,
    settings: PipelineSettings,
}

impl Admin {
    async fn connect(config: &AppConfig) -> Result<Self> {
        let db = Arc::new(connect(&config.database).await?);
        let users = Arc::new(DbUserDirectory::new(db.clone()));
        let cache = Arc::new(TtlCache::new(
            config.role_cache_capacity,
            config.role_cache_ttl,
        ));
        Ok(Self {
            gate: PermissionGate::new(users.clone(), cache),
            db,
            users,
            settings: config.pipeline.clone(),
        })
    }

    fn manager<F: PipelineFields>(&self) -> PipelineManager<F> {
        PipelineManager::new(self.db.clone(), self.users.clone(), self.settings.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(ObsConfig::from_env("crm-admin"))?;
    let cli = Cli::parse();
    if let Err(err) = run(cli, &config).await {
        eprintln!("{}", serde_json::to_string_pretty(&err.payload())?);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, config: &AppConfig) -> ApiResult<()> {
    match cli.command {
        Command::Migrate(MigrateCommand::Up) => migrate_up(config).await?,
        Command::Migrate(MigrateCommand::Down) => migrate_down(config).await?,
        Command::Seed { email } => {
            let admin = Admin::connect(config).await?;
            let summary = seed::run(&admin.db, &admin.users, &email).await?;
            println!("{summary}");
        }
        Command::Deals(command) => {
            let admin = Admin::connect(config).await?;
            run_pipeline::<DealFields>(&admin, cli.actor, command).await?;
        }
        Command::Buyers(command) => {
            let admin = Admin::connect(config).await?;
            run_pipeline::<BuyerFields>(&admin, cli.actor, command).await?;
        }
    }
    Ok(())
}

async fn migrate_up(config: &AppConfig) -> Result<()> {
    let db = connect(&config.database).await?;
    Migrator::up(&db, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down(config: &AppConfig) -> Result<()> {
    let db = connect(&config.database).await?;
    Migrator::down(&db, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}

async fn run_pipeline<F: PipelineFields>(
    admin: &Admin,
    actor: Option<Uuid>,
    command: PipelineCommand,
) -> ApiResult<()> {
    let actor = actor.ok_or_else(|| ApiError::Forbidden("pass --actor or set CRM_ACTOR".into()))?;
    admin
        .gate
        .check(actor, permission(F::KIND, command.access()))
        .await
        .map_err(authz_error)?;

    let manager = admin.manager::<F>();
    match command {
        PipelineCommand::Categories { all } => {
            let categories = manager.list_categories(!all).await?;
            print_json(&categories)?;
        }
        PipelineCommand::Board {
            category,
            search,
            sort,
            desc,
        } => {
            let category = manager.get_category(category).await?;
            let direction = if desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            println!("{} ({}, revision {})", category.name, F::KIND, category.revision);
            for stage in category.ordered_stages() {
                let query = ItemQuery {
                    search: search.clone(),
                    stage_id: Some(stage.id),
                    sort: SortField::parse(&sort),
                    direction,
                    ..ItemQuery::default()
                };
                let items = manager.list_by_category(category.id, &query).await?;
                let marker = if stage.is_active { "" } else { " [deleted]" };
                println!("== {} ({}){marker} {}", stage.name, items.len(), stage.id);
                for item in items {
                    let value = item
                        .fields
                        .value()
                        .map(|value| format!("{value:.2}"))
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "  {:>3}  {:<32} {:>12}  rev {}  {}",
                        item.order,
                        item.fields.title(),
                        value,
                        item.revision,
                        item.id
                    );
                }
            }
            let total = manager.sum_value_by_category(category.id, true).await?;
            let count = manager.count_by_category(category.id, true).await?;
            println!("{count} active item(s), total value {total:.2}");
        }
        PipelineCommand::Move {
            item,
            stage,
            order,
            expected_revision,
        } => {
            let request = MoveRequest {
                stage_id: stage,
                order,
                expected_revision,
            };
            let moved = manager.move_item(item, request, Some(actor)).await?;
            print_json(&moved)?;
        }
        PipelineCommand::Close { item } => {
            let closed = manager.close_item(item, Some(actor)).await?;
            print_json(&closed)?;
        }
        PipelineCommand::DeleteStage {
            category,
            stage,
            policy,
        } => {
            let updated = manager
                .delete_stage(category, stage, policy, Some(actor))
                .await?;
            print_json(&updated)?;
        }
        PipelineCommand::History { item, category } => {
            let records = match (item, category) {
                (Some(item), _) => manager.item_history(item).await?,
                (None, Some(category)) => manager.category_history(category).await?,
                (None, None) => {
                    return Err(ApiError::InvalidInput("pass --item or --category".into()));
                }
            };
            print_json(&records)?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
