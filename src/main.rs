use anyhow::Result;
use clap::Parser;

use stagegate::cli::commands::lifecycle::{LifecycleAction, LifecycleCommand};
use stagegate::cli::commands::record::{ListCommand, NewCommand, ShowCommand};
use stagegate::cli::commands::sequence::{SequenceNextCommand, SequencePeekCommand};
use stagegate::cli::commands::stage::{SaveCommand, ViewCommand};
use stagegate::cli::commands::transition::{AdvanceCommand, FinishCommand};
use stagegate::cli::commands::{App, Command};
use stagegate::cli::{Cli, Commands, SeqCommands};
use stagegate::{init_telemetry, shutdown_telemetry, StageGateConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        show_getting_started();
        return Ok(());
    };

    if let Err(e) = StageGateConfig::load_env_file() {
        eprintln!("⚠️  Ignoring unreadable .env file: {e}");
    }
    let config = StageGateConfig::load()?;
    init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        let app = App::build(config).await?;
        dispatch(command, &app).await
    });

    shutdown_telemetry();
    result
}

async fn dispatch(command: Commands, app: &App) -> Result<()> {
    match command {
        Commands::New {
            title,
            scope,
            year,
            kind,
            digital_signature,
        } => {
            NewCommand {
                title,
                scope,
                year,
                kind,
                digital_signature,
            }
            .execute(app)
            .await
        }
        Commands::List => ListCommand.execute(app).await,
        Commands::Show { record } => ShowCommand { record }.execute(app).await,
        Commands::View {
            record,
            stage,
            context,
        } => {
            ViewCommand {
                record,
                stage,
                context,
            }
            .execute(app)
            .await
        }
        Commands::Save {
            record,
            stage,
            content,
        } => {
            SaveCommand {
                record,
                stage,
                content,
            }
            .execute(app)
            .await
        }
        Commands::Advance {
            record,
            content,
            verification,
        } => {
            AdvanceCommand {
                record,
                content,
                verification,
            }
            .execute(app)
            .await
        }
        Commands::Finish {
            record,
            content,
            verification,
            yes,
        } => {
            FinishCommand {
                record,
                content,
                verification,
                yes,
            }
            .execute(app)
            .await
        }
        Commands::Reopen { record } => lifecycle(record, LifecycleAction::Reopen, app).await,
        Commands::Close { record } => lifecycle(record, LifecycleAction::Close, app).await,
        Commands::Submit { record } => lifecycle(record, LifecycleAction::Submit, app).await,
        Commands::Approve { record } => lifecycle(record, LifecycleAction::Approve, app).await,
        Commands::Reject { record } => lifecycle(record, LifecycleAction::Reject, app).await,
        Commands::Confirm { record } => lifecycle(record, LifecycleAction::Confirm, app).await,
        Commands::Seq { command } => match command {
            SeqCommands::Peek { target } => SequencePeekCommand { target }.execute(app).await,
            SeqCommands::Next { target } => SequenceNextCommand { target }.execute(app).await,
        },
    }
}

async fn lifecycle(record: String, action: LifecycleAction, app: &App) -> Result<()> {
    LifecycleCommand { record, action }.execute(app).await
}

fn show_getting_started() {
    println!("🗂️  Stagegate - staged approval records");
    println!();
    println!("   stagegate new --title 'Office supplies' --scope sector-7");
    println!("   stagegate save COM-001/2024 --body 'Demand text'");
    println!("   stagegate advance COM-001/2024 --body 'Demand text' --signer 'Maria Lemos'");
    println!("   stagegate show COM-001/2024");
    println!();
    println!("💡 Run 'stagegate --help' for all commands");
}
