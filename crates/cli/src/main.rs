//! Administrative CLI for the Niviz catalog.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use niviz_core::config::AppConfig;
use niviz_core::{
    Capability, CapabilitySet, ImagePath, MetadataKeyName, MetadataValue, NewUser, ResourceKind,
    ResourceRef,
};
use niviz_store::models::{CascadeDeleteStats, GrantRow, ProjectRow};
use niviz_store::{AccessControl, CatalogStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nivizctl")]
#[command(about = "Administrative CLI for the Niviz catalog")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "NIVIZ_CONFIG", default_value = "niviz.toml")]
    config: PathBuf,

    /// Act as this user: every command is checked against the user's
    /// grants, and listings only show what the user may view
    #[arg(long = "as", value_name = "USER_ID", global = true)]
    actor: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the catalog schema
    Migrate,
    /// Check database connectivity
    Health,
    /// User management commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Project management commands
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Dataset management commands
    Dataset {
        #[command(subcommand)]
        command: DatasetCommands,
    },
    /// Permission grant commands
    Grant {
        #[command(subcommand)]
        command: GrantCommands,
    },
    /// Show a user's effective capabilities on a project or dataset
    Permissions {
        user: i64,
        /// Resource as project:<id> or dataset:<id>
        #[arg(value_parser = parse_permissioned)]
        resource: (ResourceKind, i64),
    },
    /// Entity commands
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },
    /// Image commands
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
    /// Metadata tag commands
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Metadata filter commands
    Filter {
        #[command(subcommand)]
        command: FilterCommands,
    },
    /// List entity IDs passing every filter of a project/dataset pairing
    WorkingSet { pairing: i64 },
    /// Delete a row and everything that depends on it
    Delete {
        /// Row as <type>:<id>, e.g. dataset:3 or metadata_filter:12
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Create {
        username: String,
        email: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        picture: Option<String>,
        /// Grant global administrator rights
        #[arg(long, default_value_t = false)]
        admin: bool,
        /// Create the account disabled
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },
    /// List users
    List,
    /// Update account flags
    SetFlags {
        user: i64,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        admin: Option<bool>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project, optionally over datasets
    Create {
        name: String,
        /// Dataset to attach (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<i64>,
    },
    /// List projects
    List,
    /// Show a project with its pairings and grants
    Show { project: i64 },
    /// Rename a project
    Rename { project: i64, name: String },
    /// Attach a dataset to a project
    Attach { project: i64, dataset: i64 },
    /// Detach a dataset from a project (removes the pairing's filters)
    Detach { project: i64, dataset: i64 },
}

#[derive(Subcommand)]
enum DatasetCommands {
    /// Create a dataset
    Create {
        #[arg(long)]
        name: Option<String>,
    },
    /// List datasets
    List,
    /// Show a dataset with its pairings and entity count
    Show { dataset: i64 },
    /// Rename a dataset (omit --name to clear it)
    Rename {
        dataset: i64,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum GrantCommands {
    /// Create a grant; fails if the user already has one on the resource
    Add {
        user: i64,
        #[arg(value_parser = parse_permissioned)]
        resource: (ResourceKind, i64),
        /// Comma-separated capabilities, e.g. view,share
        #[arg(value_parser = parse_capabilities)]
        capabilities: CapabilitySet,
    },
    /// Create or replace a grant
    Set {
        user: i64,
        #[arg(value_parser = parse_permissioned)]
        resource: (ResourceKind, i64),
        #[arg(value_parser = parse_capabilities)]
        capabilities: CapabilitySet,
    },
    /// List grants on a resource
    List {
        #[arg(value_parser = parse_permissioned)]
        resource: (ResourceKind, i64),
    },
    /// Remove a grant
    Revoke {
        user: i64,
        #[arg(value_parser = parse_permissioned)]
        resource: (ResourceKind, i64),
    },
}

#[derive(Subcommand)]
enum EntityCommands {
    /// Create an entity in a dataset
    Create { dataset: i64 },
    /// List entities of a dataset
    List { dataset: i64 },
    /// Show an entity with its images and tags
    Show { entity: i64 },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Attach an image path to an entity (the image is shared by path)
    Attach { entity: i64, path: String },
    /// Detach an image from an entity
    Detach { entity: i64, image: i64 },
    /// Delete images no entity references
    Gc,
}

#[derive(Subcommand)]
enum TagCommands {
    /// Tag an entity with key=value
    Add {
        entity: i64,
        key: String,
        value: String,
    },
    /// Remove a key=value tag from an entity
    Remove {
        entity: i64,
        key: String,
        value: String,
    },
    /// List tags of an entity
    List { entity: i64 },
}

#[derive(Subcommand)]
enum FilterCommands {
    /// Add a filter on a project/dataset pairing
    Add {
        pairing: i64,
        key: String,
        value: String,
        /// Exclude entities with the pair instead of requiring it
        #[arg(long, default_value_t = false)]
        exclude: bool,
    },
    /// List filters on a pairing
    List { pairing: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let store = niviz_store::from_config(&config.database)
        .await
        .context("failed to open catalog store")?;
    let access = AccessControl::new(store.clone(), config.permissions.clone());

    run(cli.command, cli.actor, &store, &access).await
}

/// Load configuration from an optional TOML file and `NIVIZ_` environment variables.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("NIVIZ_").ignore(&["config"]).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

async fn run(
    command: Commands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        Commands::Migrate => {
            if let Some(actor) = actor {
                access.require_global_admin(actor, "migrate the schema").await?;
            }
            store.migrate().await?;
            println!("Schema is up to date.");
        }
        Commands::Health => {
            store.health_check().await?;
            println!("OK");
        }
        Commands::User { command } => handle_user_command(command, actor, store, access).await?,
        Commands::Project { command } => {
            handle_project_command(command, actor, store, access).await?
        }
        Commands::Dataset { command } => {
            handle_dataset_command(command, actor, store, access).await?
        }
        Commands::Grant { command } => handle_grant_command(command, actor, access).await?,
        Commands::Permissions {
            user,
            resource: (kind, id),
        } => {
            if let Some(actor) = actor.filter(|actor| *actor != user) {
                access.require(actor, kind, id, Capability::Admin).await?;
            }
            let held = access.resolve_permissions(user, kind, id).await?;
            if held.is_empty() {
                println!("User {user} has no access to {kind} {id}.");
            } else {
                println!("{held}");
            }
        }
        Commands::Entity { command } => {
            handle_entity_command(command, actor, store, access).await?
        }
        Commands::Image { command } => {
            handle_image_command(command, actor, store, access).await?
        }
        Commands::Tag { command } => handle_tag_command(command, actor, store, access).await?,
        Commands::Filter { command } => {
            handle_filter_command(command, actor, store, access).await?
        }
        Commands::WorkingSet { pairing } => {
            let ids = match actor {
                Some(actor) => access.working_set_as(actor, pairing).await?,
                None => store.working_set(pairing).await?,
            };
            for id in &ids {
                println!("{id}");
            }
            tracing::debug!(pairing, entities = ids.len(), "Working set evaluated");
        }
        Commands::Delete { resource } => {
            let stats = match actor {
                Some(actor) => access.delete_as(actor, resource).await?,
                None => store.delete(resource).await?,
            };
            println!("Deleted {resource}");
            print_stats(&stats);
        }
    }
    Ok(())
}

async fn handle_user_command(
    command: UserCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    if let Some(actor) = actor {
        access.require_global_admin(actor, "manage users").await?;
    }
    match command {
        UserCommands::Create {
            username,
            email,
            first_name,
            last_name,
            picture,
            admin,
            inactive,
        } => {
            let user = NewUser {
                first_name,
                last_name,
                picture,
                is_active: !inactive,
                is_admin: admin,
                ..NewUser::new(username, email)
            };
            let row = store.create_user(&user).await?;
            println!("User created: {} ({})", row.id, row.username);
        }
        UserCommands::List => {
            let users = store.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<8} {:<24} {:<32} {:<8} Admin",
                    "ID", "Username", "Email", "Active"
                );
                println!("{}", "-".repeat(80));
                for user in users {
                    println!(
                        "{:<8} {:<24} {:<32} {:<8} {}",
                        user.id, user.username, user.email, user.is_active, user.is_admin
                    );
                }
            }
        }
        UserCommands::SetFlags {
            user,
            active,
            admin,
        } => {
            let current = store
                .get_user(user)
                .await?
                .with_context(|| format!("user {user} not found"))?;
            let row = store
                .set_user_flags(
                    user,
                    active.unwrap_or(current.is_active),
                    admin.unwrap_or(current.is_admin),
                )
                .await?;
            println!(
                "User {}: active={} admin={}",
                row.id, row.is_active, row.is_admin
            );
        }
    }
    Ok(())
}

async fn handle_project_command(
    command: ProjectCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        ProjectCommands::Create { name, datasets } => {
            let project = match actor {
                Some(actor) => access.create_project_as(actor, &name, &datasets).await?,
                None => create_project_unchecked(store, &name, &datasets).await?,
            };
            println!("Project created: {} ({})", project.id, project.name);
        }
        ProjectCommands::List => {
            let mut projects = store.list_projects().await?;
            if let Some(actor) = actor {
                projects = visible(access, actor, ResourceKind::Project, projects, |p| p.id).await?;
            }
            if projects.is_empty() {
                println!("No projects found.");
            } else {
                println!("{:<8} {:<40} Updated", "ID", "Name");
                println!("{}", "-".repeat(80));
                for project in projects {
                    println!(
                        "{:<8} {:<40} {}",
                        project.id, project.name, project.updated_at
                    );
                }
            }
        }
        ProjectCommands::Show { project } => {
            if let Some(actor) = actor {
                access.require(actor, ResourceKind::Project, project, Capability::View).await?;
            }
            let row = store
                .get_project(project)
                .await?
                .with_context(|| format!("project {project} not found"))?;
            println!("Project ID: {}", row.id);
            println!("Name: {}", row.name);
            println!("Created: {}", row.created_at);
            println!("Updated: {}", row.updated_at);
            println!("Datasets:");
            for pairing in store.list_project_datasets(project).await? {
                println!("  dataset {} (pairing {})", pairing.dataset_id, pairing.id);
            }
            print_grants(&access.list_grants(ResourceKind::Project, project).await?);
        }
        ProjectCommands::Rename { project, name } => {
            let row = match actor {
                Some(actor) => access.rename_project_as(actor, project, &name).await?,
                None => store.rename_project(project, &name).await?,
            };
            println!("Project {} renamed to {}", row.id, row.name);
        }
        ProjectCommands::Attach { project, dataset } => {
            let pairing = match actor {
                Some(actor) => access.attach_dataset_as(actor, project, dataset).await?,
                None => store.attach_dataset(project, dataset).await?,
            };
            println!(
                "Dataset {} attached to project {} (pairing {})",
                pairing.dataset_id, pairing.project_id, pairing.id
            );
        }
        ProjectCommands::Detach { project, dataset } => {
            let stats = match actor {
                Some(actor) => access.detach_dataset_as(actor, project, dataset).await?,
                None => store.detach_dataset(project, dataset).await?,
            };
            println!("Dataset {dataset} detached from project {project}");
            print_stats(&stats);
        }
    }
    Ok(())
}

async fn handle_dataset_command(
    command: DatasetCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        DatasetCommands::Create { name } => {
            let row = match actor {
                Some(actor) => access.create_dataset_as(actor, name.as_deref()).await?,
                None => store.create_dataset(name.as_deref()).await?,
            };
            println!("Dataset created: {}", row.id);
        }
        DatasetCommands::List => {
            let mut datasets = store.list_datasets().await?;
            if let Some(actor) = actor {
                datasets = visible(access, actor, ResourceKind::Dataset, datasets, |d| d.id).await?;
            }
            if datasets.is_empty() {
                println!("No datasets found.");
            } else {
                println!("{:<8} {:<40} Updated", "ID", "Name");
                println!("{}", "-".repeat(80));
                for dataset in datasets {
                    println!(
                        "{:<8} {:<40} {}",
                        dataset.id,
                        dataset.name.as_deref().unwrap_or("-"),
                        dataset.updated_at
                    );
                }
            }
        }
        DatasetCommands::Show { dataset } => {
            if let Some(actor) = actor {
                access.require(actor, ResourceKind::Dataset, dataset, Capability::View).await?;
            }
            let row = store
                .get_dataset(dataset)
                .await?
                .with_context(|| format!("dataset {dataset} not found"))?;
            println!("Dataset ID: {}", row.id);
            println!("Name: {}", row.name.as_deref().unwrap_or("-"));
            println!("Entities: {}", store.count_entities(dataset).await?);
            println!("Projects:");
            for pairing in store.list_dataset_projects(dataset).await? {
                println!("  project {} (pairing {})", pairing.project_id, pairing.id);
            }
        }
        DatasetCommands::Rename { dataset, name } => {
            let row = match actor {
                Some(actor) => {
                    access
                        .rename_dataset_as(actor, dataset, name.as_deref())
                        .await?
                }
                None => store.rename_dataset(dataset, name.as_deref()).await?,
            };
            println!(
                "Dataset {} renamed to {}",
                row.id,
                row.name.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

async fn handle_grant_command(
    command: GrantCommands,
    actor: Option<i64>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        GrantCommands::Add {
            user,
            resource: (kind, id),
            capabilities,
        } => {
            if let Some(actor) = actor {
                access.require(actor, kind, id, Capability::Admin).await?;
            }
            let row = access.grant(user, kind, id, capabilities).await?;
            println!("Granted {} to user {} on {kind} {id}", row.capabilities, row.user_id);
        }
        GrantCommands::Set {
            user,
            resource: (kind, id),
            capabilities,
        } => {
            let row = match actor {
                Some(actor) => access.set_grant_as(actor, user, kind, id, capabilities).await?,
                None => access.set_grant(user, kind, id, capabilities).await?,
            };
            println!("Granted {} to user {} on {kind} {id}", row.capabilities, row.user_id);
        }
        GrantCommands::List {
            resource: (kind, id),
        } => {
            if let Some(actor) = actor {
                access.require(actor, kind, id, Capability::Admin).await?;
            }
            print_grants(&access.list_grants(kind, id).await?);
        }
        GrantCommands::Revoke {
            user,
            resource: (kind, id),
        } => {
            match actor {
                Some(actor) => access.revoke_grant_as(actor, user, kind, id).await?,
                None => access.revoke_grant(user, kind, id).await?,
            }
            println!("Revoked grant of user {user} on {kind} {id}");
        }
    }
    Ok(())
}

async fn handle_entity_command(
    command: EntityCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        EntityCommands::Create { dataset } => {
            let row = match actor {
                Some(actor) => access.create_entity_as(actor, dataset).await?,
                None => store.create_entity(dataset).await?,
            };
            println!("Entity created: {}", row.id);
        }
        EntityCommands::List { dataset } => {
            if let Some(actor) = actor {
                access.require(actor, ResourceKind::Dataset, dataset, Capability::View).await?;
            }
            for entity in store.list_entities(dataset).await? {
                println!("{:<8} {}", entity.id, entity.updated_at);
            }
        }
        EntityCommands::Show { entity } => {
            if let Some(actor) = actor {
                access.require_on_entity(actor, entity, &[Capability::View]).await?;
            }
            let row = store
                .get_entity(entity)
                .await?
                .with_context(|| format!("entity {entity} not found"))?;
            println!("Entity ID: {}", row.id);
            println!("Dataset: {}", row.dataset_id);
            println!("Updated: {}", row.updated_at);
            println!("Images:");
            for image in store.list_entity_images(entity).await? {
                println!("  {} {}", image.id, image.path);
            }
            println!("Tags:");
            for tag in store.list_entity_tags(entity).await? {
                println!("  {}={}", tag.key, tag.value);
            }
        }
    }
    Ok(())
}

async fn handle_image_command(
    command: ImageCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        ImageCommands::Attach { entity, path } => {
            let path = ImagePath::new(path)?;
            let row = match actor {
                Some(actor) => access.attach_image_as(actor, entity, &path).await?,
                None => store.attach_image(entity, &path).await?,
            };
            println!("Image {} attached to entity {}", row.image_id, row.entity_id);
        }
        ImageCommands::Detach { entity, image } => {
            match actor {
                Some(actor) => access.detach_image_as(actor, entity, image).await?,
                None => store.detach_image(entity, image).await?,
            }
            println!("Image {image} detached from entity {entity}");
        }
        ImageCommands::Gc => {
            if let Some(actor) = actor {
                access.require_global_admin(actor, "delete orphaned images").await?;
            }
            let deleted = store.delete_orphaned_images().await?;
            println!("Removed {deleted} orphaned image(s)");
        }
    }
    Ok(())
}

async fn handle_tag_command(
    command: TagCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        TagCommands::Add { entity, key, value } => {
            let key = MetadataKeyName::new(key)?;
            let value = MetadataValue::new(value)?;
            match actor {
                Some(actor) => access.tag_entity_as(actor, entity, &key, &value).await?,
                None => store.tag_entity(entity, &key, &value).await?,
            };
            println!("Entity {entity} tagged {key}={value}");
        }
        TagCommands::Remove { entity, key, value } => {
            let metadata = store
                .find_metadata(&key, &value)
                .await?
                .with_context(|| format!("no metadata {key}={value}"))?;
            match actor {
                Some(actor) => access.untag_entity_as(actor, entity, metadata.id).await?,
                None => store.untag_entity(entity, metadata.id).await?,
            }
            println!("Removed {key}={value} from entity {entity}");
        }
        TagCommands::List { entity } => {
            if let Some(actor) = actor {
                access.require_on_entity(actor, entity, &[Capability::View]).await?;
            }
            for tag in store.list_entity_tags(entity).await? {
                println!("{}={}", tag.key, tag.value);
            }
        }
    }
    Ok(())
}

async fn handle_filter_command(
    command: FilterCommands,
    actor: Option<i64>,
    store: &Arc<dyn CatalogStore>,
    access: &AccessControl,
) -> Result<()> {
    match command {
        FilterCommands::Add {
            pairing,
            key,
            value,
            exclude,
        } => {
            let key = MetadataKeyName::new(key)?;
            let value = MetadataValue::new(value)?;
            let row = match actor {
                Some(actor) => {
                    access
                        .add_filter_as(actor, pairing, &key, &value, exclude)
                        .await?
                }
                None => store.add_filter(pairing, &key, &value, exclude).await?,
            };
            println!(
                "Filter {} added: {} {key}={value}",
                row.id,
                if exclude { "exclude" } else { "include" }
            );
        }
        FilterCommands::List { pairing } => {
            let filters = match actor {
                Some(actor) => access.list_filters_as(actor, pairing).await?,
                None => store.list_filters(pairing).await?,
            };
            if filters.is_empty() {
                println!("No filters: every entity of the dataset is in the working set.");
            }
            let keys = store.list_keys().await?;
            for filter in filters {
                let label = match store.get_metadata(filter.metadata_id).await? {
                    Some(metadata) => {
                        let key = keys
                            .iter()
                            .find(|k| k.id == metadata.key_id)
                            .map(|k| k.name.as_str())
                            .unwrap_or("?");
                        format!("{key}={}", metadata.value)
                    }
                    None => format!("metadata {}", filter.metadata_id),
                };
                println!(
                    "{:<8} {:<8} {}",
                    filter.id,
                    if filter.is_exclusion { "exclude" } else { "include" },
                    label
                );
            }
        }
    }
    Ok(())
}

/// Create a project and attach `datasets`, deleting the project again if an
/// attach fails.
async fn create_project_unchecked(
    store: &Arc<dyn CatalogStore>,
    name: &str,
    datasets: &[i64],
) -> Result<ProjectRow> {
    let project = store.create_project(name).await?;
    for dataset in datasets {
        if let Err(err) = store.attach_dataset(project.id, *dataset).await {
            if let Err(cleanup) = store.delete(ResourceRef::Project(project.id)).await {
                tracing::error!(
                    project_id = project.id,
                    error = %cleanup,
                    "Failed to remove partially created project"
                );
            }
            return Err(err).with_context(|| format!("failed to attach dataset {dataset}"));
        }
    }
    Ok(project)
}

/// Keep the rows `actor` holds view on.
async fn visible<T>(
    access: &AccessControl,
    actor: i64,
    kind: ResourceKind,
    rows: Vec<T>,
    id: impl Fn(&T) -> i64,
) -> Result<Vec<T>> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if access.check(actor, kind, id(&row), Capability::View).await? {
            kept.push(row);
        }
    }
    Ok(kept)
}

fn print_grants(grants: &[GrantRow]) {
    if grants.is_empty() {
        println!("No grants.");
        return;
    }
    println!("{:<8} Capabilities", "User");
    for grant in grants {
        println!("{:<8} {}", grant.user_id, grant.capabilities);
    }
}

fn print_stats(stats: &CascadeDeleteStats) {
    let rows = [
        ("users", stats.users),
        ("projects", stats.projects),
        ("datasets", stats.datasets),
        ("project grants", stats.project_permissions),
        ("dataset grants", stats.dataset_permissions),
        ("pairings", stats.project_datasets),
        ("entities", stats.entities),
        ("images", stats.images),
        ("entity images", stats.entity_images),
        ("metadata keys", stats.metadata_keys),
        ("metadata", stats.metadata),
        ("entity tags", stats.entity_metadata),
        ("filters", stats.metadata_filters),
    ];
    for (label, count) in rows.iter().filter(|(_, count)| *count > 0) {
        println!("  {label}: {count}");
    }
    println!("  total: {}", stats.total());
}

fn parse_resource(s: &str) -> Result<ResourceRef, String> {
    ResourceRef::parse(s).map_err(|e| e.to_string())
}

fn parse_permissioned(s: &str) -> Result<(ResourceKind, i64), String> {
    match parse_resource(s)? {
        ResourceRef::Project(id) => Ok((ResourceKind::Project, id)),
        ResourceRef::Dataset(id) => Ok((ResourceKind::Dataset, id)),
        other => Err(format!(
            "{} rows carry no grants; expected project:<id> or dataset:<id>",
            other.type_name()
        )),
    }
}

fn parse_capabilities(s: &str) -> Result<CapabilitySet, String> {
    CapabilitySet::parse(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use niviz_core::config::DatabaseConfig;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_permissioned() {
        assert_eq!(
            parse_permissioned("dataset:4").unwrap(),
            (ResourceKind::Dataset, 4)
        );
        assert!(parse_permissioned("entity:4").is_err());
        assert!(parse_permissioned("dataset").is_err());
    }

    #[test]
    fn test_parse_capabilities() {
        let caps = parse_capabilities("view, share").unwrap();
        assert_eq!(caps.len(), 2);
        assert!(parse_capabilities("view,rate").is_err());
    }

    #[test]
    fn test_global_actor_flag() {
        let cli = Cli::try_parse_from(["nivizctl", "delete", "entity:7", "--as", "3"]).unwrap();
        assert_eq!(cli.actor, Some(3));
        assert!(matches!(
            cli.command,
            Commands::Delete {
                resource: ResourceRef::Entity(7)
            }
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");
        let config_path = dir.path().join("niviz.toml");
        std::fs::write(
            &config_path,
            format!(
                "[database]\ntype = \"sqlite\"\npath = \"{}\"\n\n[permissions]\nenforce_hierarchy = true\n",
                db_path.display()
            ),
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert!(config.permissions.enforce_hierarchy);
        match config.database {
            DatabaseConfig::Sqlite { path, .. } => assert_eq!(path, db_path),
            _ => panic!("expected sqlite config"),
        }
    }

    #[test]
    fn test_load_config_rejects_incomplete_postgres() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("niviz.toml");
        std::fs::write(
            &config_path,
            "[database]\ntype = \"postgres\"\nhost = \"db.internal\"\n",
        )
        .unwrap();

        assert!(load_config(&config_path).is_err());
    }

    #[tokio::test]
    async fn test_run_against_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::sqlite(dir.path().join("catalog.db"));
        let store = niviz_store::from_config(&config.database).await.unwrap();
        let access = AccessControl::new(store.clone(), config.permissions.clone());

        run(
            Commands::Dataset {
                command: DatasetCommands::Create {
                    name: Some("T1w".to_string()),
                },
            },
            None,
            &store,
            &access,
        )
        .await
        .unwrap();
        run(
            Commands::Entity {
                command: EntityCommands::Create { dataset: 1 },
            },
            None,
            &store,
            &access,
        )
        .await
        .unwrap();
        run(
            Commands::Tag {
                command: TagCommands::Add {
                    entity: 1,
                    key: "site".to_string(),
                    value: "A".to_string(),
                },
            },
            None,
            &store,
            &access,
        )
        .await
        .unwrap();

        assert_eq!(store.list_entity_tags(1).await.unwrap().len(), 1);

        // A user without grants cannot delete.
        run(
            Commands::User {
                command: UserCommands::Create {
                    username: "rater".to_string(),
                    email: "rater@example.org".to_string(),
                    first_name: None,
                    last_name: None,
                    picture: None,
                    admin: false,
                    inactive: false,
                },
            },
            None,
            &store,
            &access,
        )
        .await
        .unwrap();
        let denied = run(
            Commands::Delete {
                resource: ResourceRef::Dataset(1),
            },
            Some(1),
            &store,
            &access,
        )
        .await;
        assert!(denied.is_err());
        assert!(store.get_dataset(1).await.unwrap().is_some());
    }

    async fn sqlite_fixture(dir: &tempfile::TempDir) -> (Arc<dyn CatalogStore>, AccessControl) {
        let config = AppConfig::sqlite(dir.path().join("catalog.db"));
        let store = niviz_store::from_config(&config.database).await.unwrap();
        let access = AccessControl::new(store.clone(), config.permissions.clone());
        (store, access)
    }

    #[tokio::test]
    async fn test_actor_is_checked_on_data_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (store, access) = sqlite_fixture(&dir).await;
        let dataset = store.create_dataset(Some("T1w")).await.unwrap();
        let entity = store.create_entity(dataset.id).await.unwrap();
        let project = store.create_project("QC").await.unwrap();
        let pairing = store.attach_dataset(project.id, dataset.id).await.unwrap();
        let rater = store
            .create_user(&NewUser::new("rater", "rater@example.org"))
            .await
            .unwrap();

        let tag = |actor| {
            run(
                Commands::Tag {
                    command: TagCommands::Add {
                        entity: entity.id,
                        key: "site".to_string(),
                        value: "A".to_string(),
                    },
                },
                actor,
                &store,
                &access,
            )
        };
        assert!(tag(Some(rater.id)).await.is_err());
        assert!(store.list_entity_tags(entity.id).await.unwrap().is_empty());

        let denied = [
            Commands::Entity {
                command: EntityCommands::Create {
                    dataset: dataset.id,
                },
            },
            Commands::Image {
                command: ImageCommands::Attach {
                    entity: entity.id,
                    path: "/qa/a.png".to_string(),
                },
            },
            Commands::Filter {
                command: FilterCommands::Add {
                    pairing: pairing.id,
                    key: "site".to_string(),
                    value: "A".to_string(),
                    exclude: false,
                },
            },
            Commands::Dataset {
                command: DatasetCommands::Rename {
                    dataset: dataset.id,
                    name: None,
                },
            },
            Commands::Project {
                command: ProjectCommands::Rename {
                    project: project.id,
                    name: "renamed".to_string(),
                },
            },
            Commands::Dataset {
                command: DatasetCommands::Create { name: None },
            },
            Commands::Image {
                command: ImageCommands::Gc,
            },
        ];
        for command in denied {
            assert!(run(command, Some(rater.id), &store, &access).await.is_err());
        }
        assert_eq!(store.count_entities(dataset.id).await.unwrap(), 1);
        assert!(store.list_entity_images(entity.id).await.unwrap().is_empty());
        assert!(store.list_filters(pairing.id).await.unwrap().is_empty());
        assert_eq!(store.list_datasets().await.unwrap().len(), 1);
        assert_eq!(
            store.get_project(project.id).await.unwrap().unwrap().name,
            "QC"
        );

        access
            .grant(
                rater.id,
                ResourceKind::Dataset,
                dataset.id,
                CapabilitySet::parse("modify").unwrap(),
            )
            .await
            .unwrap();
        tag(Some(rater.id)).await.unwrap();
        assert_eq!(store.list_entity_tags(entity.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_actor_listings_only_show_viewable_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (store, access) = sqlite_fixture(&dir).await;
        let shown = store.create_project("shown").await.unwrap();
        store.create_project("hidden").await.unwrap();
        let rater = store
            .create_user(&NewUser::new("rater", "rater@example.org"))
            .await
            .unwrap();
        access
            .grant(
                rater.id,
                ResourceKind::Project,
                shown.id,
                CapabilitySet::parse("view").unwrap(),
            )
            .await
            .unwrap();

        let projects = visible(
            &access,
            rater.id,
            ResourceKind::Project,
            store.list_projects().await.unwrap(),
            |p| p.id,
        )
        .await
        .unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, shown.id);

        let users = run(
            Commands::User {
                command: UserCommands::List,
            },
            Some(rater.id),
            &store,
            &access,
        )
        .await;
        assert!(users.is_err());
    }

    #[tokio::test]
    async fn test_project_create_removes_project_when_attach_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (store, access) = sqlite_fixture(&dir).await;
        let dataset = store.create_dataset(None).await.unwrap();

        let result = run(
            Commands::Project {
                command: ProjectCommands::Create {
                    name: "study".to_string(),
                    datasets: vec![dataset.id, dataset.id + 100],
                },
            },
            None,
            &store,
            &access,
        )
        .await;
        assert!(result.is_err());
        assert!(store.list_projects().await.unwrap().is_empty());
        assert!(store.list_dataset_projects(dataset.id).await.unwrap().is_empty());
    }
}
