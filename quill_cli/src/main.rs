use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use quill_cli::{base_dir, handle_error, Result};
use quill_core::{PostStatus, PostType};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Manages the Quill content database")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Point Quill at a sqlite database and prepare it
    Init {
        /// Path of the sqlite database file
        database: String,
    },
    /// Move a legacy database onto the unified content model
    Migrate {
        /// Skip the file backup. The migration cannot be rolled back then
        #[arg(long)]
        no_backup: bool,
    },
    /// Restore the database from a backup taken by `migrate`
    Rollback {
        /// Backup file to restore
        backup: PathBuf,
    },
    /// Register the default post types and create the starter content
    Seed,
    /// List registered post types
    Types,
    /// Register a new post type
    RegisterType(RegisterType),
    /// List posts
    List {
        /// Only posts of this type
        #[arg(long = "type")]
        post_type: Option<String>,
        /// Only posts in this status (draft, publish, private, pending)
        #[arg(long)]
        status: Option<String>,
    },
    /// Print a post and its custom fields as JSON
    Show {
        slug: String,
    },
    /// Change the status of a post
    Status {
        slug: String,
        /// draft, publish, private or pending
        status: String,
    },
    /// Read and write custom fields
    Meta {
        #[command(subcommand)]
        action: MetaCommands,
    },
}

#[derive(Args)]
struct RegisterType {
    /// Unique name stored on posts, e.g. `testimonial`
    name: String,
    /// Plural display name
    label: String,
    /// Singular display name
    label_singular: String,
    #[arg(long)]
    description: Option<String>,
    /// Posts of this type may have a parent
    #[arg(long)]
    hierarchical: bool,
    #[arg(long)]
    has_archive: bool,
    #[arg(long)]
    categories: bool,
    #[arg(long)]
    tags: bool,
    #[arg(long)]
    excerpt: bool,
    #[arg(long)]
    featured_image: bool,
    #[arg(long)]
    menu_icon: Option<String>,
    #[arg(long, default_value_t = 5)]
    menu_position: i32,
    #[arg(long)]
    hide_from_menu: bool,
}
impl From<RegisterType> for PostType {
    fn from(args: RegisterType) -> Self {
        let mut post_type = PostType::new(args.name, args.label, args.label_singular);
        post_type.description = args.description;
        post_type.hierarchical = args.hierarchical;
        post_type.has_archive = args.has_archive;
        post_type.supports_categories = args.categories;
        post_type.supports_tags = args.tags;
        post_type.supports_excerpt = args.excerpt;
        post_type.supports_featured_image = args.featured_image;
        post_type.menu_icon = args.menu_icon;
        post_type.menu_position = args.menu_position;
        post_type.show_in_menu = !args.hide_from_menu;
        post_type
    }
}

#[derive(Subcommand)]
enum MetaCommands {
    /// Set a custom field, replacing any previous value
    Set {
        slug: String,
        key: String,
        value: String,
    },
    /// Print a custom field
    Get { slug: String, key: String },
    /// Print every custom field of a post
    List { slug: String },
}

fn parse_status(status: &str) -> Result<PostStatus> {
    Ok(status.parse::<PostStatus>()?)
}

fn run(command: Commands) -> Result<()> {
    let base = base_dir()?;
    match command {
        Commands::Init { database } => quill_cli::init(&base, &database),
        Commands::Migrate { no_backup } => quill_cli::migrate(&base, !no_backup),
        Commands::Rollback { backup } => quill_cli::rollback(&base, &backup),
        Commands::Seed => quill_cli::seed(&base),
        Commands::Types => quill_cli::list_types(&base),
        Commands::RegisterType(args) => quill_cli::register_type(&base, args.into()),
        Commands::List { post_type, status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            quill_cli::list(&base, post_type.as_deref(), status)
        }
        Commands::Show { slug } => quill_cli::show(&base, &slug),
        Commands::Status { slug, status } => {
            quill_cli::set_status(&base, &slug, parse_status(&status)?)
        }
        Commands::Meta { action } => match action {
            MetaCommands::Set { slug, key, value } => quill_cli::meta_set(&base, &slug, &key, &value),
            MetaCommands::Get { slug, key } => quill_cli::meta_get(&base, &slug, &key),
            MetaCommands::List { slug } => quill_cli::meta_list(&base, &slug),
        },
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();
    handle_error(run(cli.command));
}
