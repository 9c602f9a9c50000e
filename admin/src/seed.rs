use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use platform_authz::Role;
use products_crm::{
    BuyerFields, BuyersManager, Category, DbUserDirectory, DealFields, DealsManager, NewCategory,
    NewItem, PipelineFields, PipelineManager, PipelineSettings, StageDraft,
};
use sea_orm::DatabaseConnection;
use tracing::info;
use uuid::Uuid;

const DEAL_STAGES: &[(&str, &str)] = &[
    ("New", "#9e9e9e"),
    ("Qualified", "#2196f3"),
    ("Proposal", "#ff9800"),
    ("Won", "#4caf50"),
    ("Lost", "#f44336"),
];

const BUYER_STAGES: &[(&str, &str)] = &[
    ("Lead", "#9e9e9e"),
    ("Contacted", "#2196f3"),
    ("Client", "#4caf50"),
];

pub struct SeedSummary {
    pub user_id: Uuid,
    pub deal_category: Option<Uuid>,
    pub buyer_category: Option<Uuid>,
}

impl fmt::Display for SeedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "user           {}", self.user_id)?;
        match self.deal_category {
            Some(id) => writeln!(f, "deal funnel    {id}")?,
            None => writeln!(f, "deal funnel    already present")?,
        }
        match self.buyer_category {
            Some(id) => write!(f, "buyer funnel   {id}"),
            None => write!(f, "buyer funnel   already present"),
        }
    }
}

/// Idempotent: the user is reused by email and funnels are only created for
/// kinds that have none yet.
pub async fn run(
    db: &Arc<DatabaseConnection>,
    users: &Arc<DbUserDirectory>,
    email: &str,
) -> Result<SeedSummary> {
    let user = match users.find_by_email(email).await? {
        Some(user) => user,
        None => {
            users
                .register(email, Some("Pipeline Admin"), &[Role::Admin])
                .await?
        }
    };

    let deals: DealsManager =
        PipelineManager::new(db.clone(), users.clone(), PipelineSettings::default());
    let deal_category = seed_funnel(
        &deals,
        user.id,
        "Sales",
        DEAL_STAGES,
        vec![
            DealFields::new("Fleet renewal").with_amount(125_000.0),
            DealFields::new("Office fit-out").with_amount(48_500.0),
            DealFields::new("Support contract").with_amount(12_000.0),
        ],
    )
    .await?;

    let buyers: BuyersManager =
        PipelineManager::new(db.clone(), users.clone(), PipelineSettings::default());
    let buyer_category = seed_funnel(
        &buyers,
        user.id,
        "Buyers",
        BUYER_STAGES,
        vec![
            BuyerFields::new("Anna Petrova").with_potential_value(9_000_000.0),
            BuyerFields::new("Boris Ivanov").with_potential_value(4_200_000.0),
        ],
    )
    .await?;

    info!(user_id = %user.id, "seed complete");
    Ok(SeedSummary {
        user_id: user.id,
        deal_category: deal_category.map(|category| category.id),
        buyer_category: buyer_category.map(|category| category.id),
    })
}

async fn seed_funnel<F: PipelineFields>(
    manager: &PipelineManager<F>,
    user_id: Uuid,
    name: &str,
    stages: &[(&str, &str)],
    items: Vec<F>,
) -> Result<Option<Category>> {
    if !manager.list_categories(true).await?.is_empty() {
        return Ok(None);
    }
    let stages = stages
        .iter()
        .zip(0..)
        .map(|((stage, color), order)| StageDraft::new(*stage, order).with_color(*color))
        .collect();
    let category = manager
        .create_category(
            NewCategory {
                name: name.to_string(),
                description: None,
                stages,
            },
            Some(user_id),
        )
        .await?;
    let first = category
        .ordered_stages()
        .first()
        .map(|stage| stage.id)
        .ok_or_else(|| anyhow!("category {} has no stages", category.id))?;
    for fields in items {
        manager
            .create_item(
                NewItem {
                    category_id: category.id,
                    stage_id: first,
                    order: None,
                    responsible_user_id: user_id,
                    fields,
                },
                Some(user_id),
            )
            .await?;
    }
    Ok(Some(category))
}
