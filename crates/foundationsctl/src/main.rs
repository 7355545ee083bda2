//! foundationsctl - CLI client for the Identity Foundations backend

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use foundations_common::api::DEFAULT_SERVER_URL;
use foundationsctl::auth::CliAuth;
use foundationsctl::client::ApiClient;
use foundationsctl::commands::{self, Context, VariantArgs};
use foundationsctl::display;
use foundationsctl::draft::DraftStore;
use foundationsctl::errors::{exit_code_for, EXIT_SUCCESS};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foundationsctl")]
#[command(about = "Identity Foundations - take the assessment and explore your insights", long_about = None)]
#[command(version)]
struct Cli {
    /// foundationsd base URL
    #[arg(long, env = "FOUNDATIONS_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// User id sent to the server
    #[arg(long, env = "FOUNDATIONS_USER")]
    user: Option<String>,

    /// Bearer token for the prompt admin console
    #[arg(long, env = "FOUNDATIONS_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Draft file (defaults to the XDG state dir)
    #[arg(long, env = "FOUNDATIONS_DRAFT")]
    draft: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take (or continue) the assessment
    Take {
        /// Open a specific saved assessment
        #[arg(long)]
        assessment: Option<String>,

        /// Jump straight to the synthesis summary
        #[arg(long)]
        synthesis: bool,
    },

    /// Show a saved assessment
    View { id: String },

    /// List your assessments and analyses
    History,

    /// Generate insights for an assessment (the most recent by default)
    Insights {
        #[arg(long)]
        assessment: Option<String>,

        /// Prompt key to use
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Administer LLM prompts and their A/B variants
    Prompts {
        #[command(subcommand)]
        command: PromptCommands,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    /// List prompts
    List,

    /// Show a prompt with its variants
    Show { id: String },

    /// Create a prompt
    Create {
        key: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Delete a prompt with its variants and impressions
    Delete { id: String },

    /// Add a variant to a prompt
    AddVariant {
        prompt_id: String,

        #[command(flatten)]
        fields: VariantFields,
    },

    /// Change fields of a variant
    UpdateVariant {
        id: String,

        #[command(flatten)]
        fields: VariantFields,
    },

    /// Delete a variant
    DeleteVariant { id: String },

    /// Per-variant impressions, success rate and ratings
    Stats { prompt_id: String },
}

#[derive(Args)]
struct VariantFields {
    #[arg(long)]
    label: Option<String>,

    /// System prompt text, or @FILE
    #[arg(long)]
    system: Option<String>,

    /// User message template, or @FILE
    #[arg(long)]
    template: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    weight: Option<u32>,

    /// true or false
    #[arg(long)]
    active: Option<bool>,
}

impl From<VariantFields> for VariantArgs {
    fn from(f: VariantFields) -> Self {
        VariantArgs {
            label: f.label,
            system: f.system,
            template: f.template,
            model: f.model,
            temperature: f.temperature,
            weight: f.weight,
            active: f.active,
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let auth = Arc::new(CliAuth::new(cli.user));
    let client = ApiClient::new(&cli.server, auth.clone(), cli.admin_token)?;
    let drafts = DraftStore::new(cli.draft.unwrap_or_else(DraftStore::default_path));
    let ctx = Context { client, auth, drafts };

    match cli.command {
        Commands::Take { assessment, synthesis } => commands::take(&ctx, assessment, synthesis).await,
        Commands::View { id } => commands::view(&ctx, &id).await,
        Commands::History => commands::history(&ctx).await,
        Commands::Insights { assessment, prompt } => commands::insights(&ctx, assessment, prompt).await,
        Commands::Prompts { command } => match command {
            PromptCommands::List => commands::prompts_list(&ctx).await,
            PromptCommands::Show { id } => commands::prompts_show(&ctx, &id).await,
            PromptCommands::Create { key, description } => {
                commands::prompts_create(&ctx, key, description).await
            }
            PromptCommands::Delete { id } => commands::prompts_delete(&ctx, &id).await,
            PromptCommands::AddVariant { prompt_id, fields } => {
                commands::prompts_add_variant(&ctx, &prompt_id, fields.into()).await
            }
            PromptCommands::UpdateVariant { id, fields } => {
                commands::prompts_update_variant(&ctx, &id, fields.into()).await
            }
            PromptCommands::DeleteVariant { id } => commands::prompts_delete_variant(&ctx, &id).await,
            PromptCommands::Stats { prompt_id } => commands::prompts_stats(&ctx, &prompt_id).await,
        },
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            display::display_error(&format!("{:#}", e));
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}
