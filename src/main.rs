use anyhow::{Context, Result};
use clap::Parser;
use sqlchat::config::{load_env_file, AgentConfig, DbConfig, LlmConfig};
use sqlchat::db::{init_pool, PgExecutor};
use sqlchat::llm::LlmClient;
use sqlchat::prompt::{list_templates, resolve_template, PromptTemplate};
use sqlchat::{Session, TurnOutcome};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TABLE_PREVIEW_ROWS: usize = 20;

#[derive(Parser)]
#[command(name = "sqlchat")]
#[command(about = "Chat with a Postgres database: questions become SQL, results become charts")]
struct Args {
    /// Env file with PG_* and OPENAI_* settings
    #[arg(long, default_value = "db_config.env")]
    env_file: PathBuf,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Model name (or set OPENAI_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Prompt template file with {conversation_summary} and {user_input}
    #[arg(long)]
    template: Option<PathBuf>,

    /// Directory for the /templates and /template commands
    #[arg(long, default_value = "prompts")]
    prompts_dir: PathBuf,

    /// Show the formatted prompt in place of the raw user message
    #[arg(long)]
    show_prompt: bool,

    #[arg(long)]
    max_sql_attempts: Option<usize>,

    #[arg(long)]
    max_plot_attempts: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqlchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    load_env_file(&args.env_file);

    let mut llm_config = LlmConfig::from_env();
    if let Some(key) = args.api_key {
        llm_config.api_key = key;
    }
    if let Some(model) = args.model {
        llm_config.model = model;
    }
    llm_config.validate()?;

    let mut agent_config = AgentConfig::from_env()?;
    if let Some(n) = args.max_sql_attempts {
        agent_config.max_sql_attempts = n;
    }
    if let Some(n) = args.max_plot_attempts {
        agent_config.max_plot_attempts = n;
    }
    agent_config.validate()?;

    let db_config = DbConfig::from_env()?;
    info!("Connecting to {}", db_config.redacted());
    let pool = init_pool(&db_config.connection_url())
        .await
        .with_context(|| format!("cannot connect to {}", db_config.redacted()))?;

    let llm = LlmClient::new(&llm_config);
    info!("Using model {}", llm.model());

    let mut session = Session::new(Arc::new(llm), Arc::new(PgExecutor::new(pool)), &agent_config);
    if let Some(path) = &args.template {
        session.set_template(PromptTemplate::load(path)?);
        info!("Loaded prompt template {}", path.display());
    }
    session.set_display_formatted_prompt(args.show_prompt);

    println!(
        "Ask a question about your data. Commands: /reset, /templates, /template <name>, /quit"
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                println!("Conversation cleared.");
            }
            "/templates" => {
                let templates = list_templates(&args.prompts_dir)?;
                if templates.is_empty() {
                    println!("No templates in {}", args.prompts_dir.display());
                }
                for path in templates {
                    println!("  {}", path.display());
                }
                println!("Active: {}", session.template().name());
            }
            cmd if cmd.starts_with("/template ") => {
                let name = &cmd["/template ".len()..];
                match resolve_template(&args.prompts_dir, name) {
                    Ok(template) => {
                        info!("Switched prompt template to {}", template.name());
                        println!("Using template {}", template.name());
                        session.set_template(template);
                    }
                    Err(e) => println!("{}", e),
                }
            }
            _ => {
                let outcome = session.handle_turn(input).await;
                print_outcome(&outcome)?;
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) -> Result<()> {
    for note in &outcome.notes {
        println!("  ! {}", note);
    }
    println!("\n{}\n", outcome.display_text);
    if let Some(table) = outcome.table() {
        println!("{}\n", table.render_preview(TABLE_PREVIEW_ROWS));
    }
    if let Some(chart) = outcome.chart() {
        println!("chart: {}\n", serde_json::to_string(chart)?);
    }
    Ok(())
}
