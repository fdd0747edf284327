use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;

use cli_style::{colors, get_styles, TableBuilder};

use showtracker_engine::config::{AppConfig, CliConfig, FileConfig};
use showtracker_engine::metrics;
use showtracker_engine::tracking::{
    Confirmation, EngineEvent, ListKind, MutationOutcome, PendingSyncQueue, PremiumStatus,
    RankingOutcome, SessionConfig, SessionDeps, TrackingError, TrackingSession,
};
use showtracker_engine::{SqliteRecordStore, StaticCatalog};

use rustyline::{
    completion::Completer, highlight::Highlighter, history::FileHistory, validate::Validator,
    CompletionType, Config, Editor, Helper,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_list(s: &str) -> Result<ListKind, String> {
    ListKind::from_str(s)
        .ok_or_else(|| format!("Unknown list '{}', expected watching, watchlist or completed", s))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Directory holding the tracking database and the pending-sync file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// JSON file with the title catalog.
    #[clap(long, value_parser = parse_path)]
    pub catalog: Option<PathBuf>,

    /// Id of the user to sign in.
    #[clap(long, default_value_t = 1)]
    pub user_id: usize,

    /// Optional TOML config file, its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Default log filter, LOG_LEVEL takes precedence.
    #[clap(long)]
    pub logging_level: Option<String>,

    /// Start the session as a premium user.
    #[clap(long)]
    pub premium: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            catalog_path: self.catalog.clone(),
            user_id: self.user_id,
            logging_level: self.logging_level.clone(),
        }
    }
}

#[derive(Parser)]
#[command(styles=get_styles(),name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Adds a title to a list, moving it out of any other list.
    Add {
        title_id: i64,
        #[clap(value_parser = parse_list)]
        list: ListKind,
        /// Episode count, used when entering watching.
        #[clap(long)]
        total_units: Option<u32>,
    },

    /// Removes a title from a list, no-op if it is elsewhere.
    Remove {
        title_id: i64,
        #[clap(value_parser = parse_list)]
        list: ListKind,
    },

    /// Adds the title to the list, or removes it if already there.
    Toggle {
        title_id: i64,
        #[clap(value_parser = parse_list)]
        list: ListKind,
    },

    /// Sets the current episode of a watching title.
    Progress { title_id: i64, unit: u32 },

    /// Places a title at the given rank of the top-10.
    Rank { title_id: i64, rank: u32 },

    /// Removes a title from the top-10.
    Unrank { title_id: i64 },

    /// Shows one list, or all of them.
    Lists {
        #[clap(value_parser = parse_list)]
        list: Option<ListKind>,
    },

    /// Shows the top-10.
    Ranking,

    /// Shows the watch statistics.
    Stats,

    /// Shows every completion record.
    History,

    /// Shows the achievement catalog and what is unlocked.
    Achievements,

    /// Turns premium status on or off.
    Premium { status: String },

    /// Pushes pending records to the store.
    Flush,

    /// Waits for running completion pipelines.
    Settle,

    /// Prints the Prometheus metrics.
    Metrics,

    /// Shows the path of the tracking db.
    Where,

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

struct Repl {
    runtime: Runtime,
    session: TrackingSession,
    events: broadcast::Receiver<EngineEvent>,
    db_path: String,
}

impl Repl {
    fn execute_command(&mut self, line: String) -> CommandExecutionResult {
        if line.is_empty() {
            return CommandExecutionResult::Ok;
        }

        let args = shlex::split(&line)
            .unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

        let cli =
            InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

        let command = match cli {
            Ok(cli) => cli.command,
            Err(e) => {
                if e.print().is_err() {
                    println!("{}", e);
                }
                return CommandExecutionResult::Ok;
            }
        };
        cli_style::print_command_echo(&line);

        let result = match command {
            InnerCommand::Add {
                title_id,
                list,
                total_units,
            } => self.report_mutation(|s| s.add_to_list(title_id, list, total_units)),
            InnerCommand::Remove { title_id, list } => {
                self.report_mutation(|s| s.remove_from_list(title_id, list))
            }
            InnerCommand::Toggle { title_id, list } => {
                self.report_mutation(|s| s.toggle(title_id, list))
            }
            InnerCommand::Progress { title_id, unit } => {
                self.report_mutation(|s| s.update_progress(title_id, unit))
            }
            InnerCommand::Rank { title_id, rank } => {
                let result = self.runtime.block_on(self.session.set_rank(title_id, rank));
                report_ranking(result)
            }
            InnerCommand::Unrank { title_id } => {
                let result = self.runtime.block_on(self.session.remove_rank(title_id));
                report_ranking(result)
            }
            InnerCommand::Lists { list } => {
                let kinds = match list {
                    Some(list) => vec![list],
                    None => ListKind::ALL.to_vec(),
                };
                for kind in kinds {
                    self.print_list(kind);
                }
                CommandExecutionResult::Ok
            }
            InnerCommand::Ranking => {
                let ranking = self.session.ranking();
                cli_style::print_section_header("Top 10");
                if ranking.is_empty() {
                    cli_style::print_empty_list("Nothing ranked yet");
                } else {
                    let mut table = TableBuilder::new(vec!["#", "Title"]);
                    for entry in ranking {
                        table.add_row(vec![entry.rank.to_string(), entry.title_id.to_string()]);
                    }
                    table.print();
                }
                cli_style::print_section_footer();
                CommandExecutionResult::Ok
            }
            InnerCommand::Stats => {
                self.print_stats();
                CommandExecutionResult::Ok
            }
            InnerCommand::History => {
                let history = self.session.completion_history();
                cli_style::print_section_header("Completions");
                if history.is_empty() {
                    cli_style::print_empty_list("No completions yet");
                } else {
                    let mut table =
                        TableBuilder::new(vec!["When", "Title", "Minutes", "Estimated"]);
                    for record in history {
                        table.add_row(vec![
                            format_timestamp(record.completed_at),
                            record.title,
                            record.total_runtime_minutes.to_string(),
                            record.runtime_estimated.to_string(),
                        ]);
                    }
                    table.print();
                }
                cli_style::print_section_footer();
                CommandExecutionResult::Ok
            }
            InnerCommand::Achievements => {
                cli_style::print_section_header("Achievements");
                let mut table = TableBuilder::new(vec!["Id", "Name", "Rarity", "Premium", "Unlocked"]);
                for achievement in self.session.achievements() {
                    table.add_row(vec![
                        achievement.id,
                        achievement.name,
                        achievement.rarity.as_str().to_string(),
                        achievement.is_premium_only.to_string(),
                        achievement
                            .unlocked_at
                            .map(format_timestamp)
                            .unwrap_or_else(|| "-".to_string()),
                    ]);
                }
                table.print();
                cli_style::print_section_footer();
                CommandExecutionResult::Ok
            }
            InnerCommand::Premium { status } => {
                let is_premium = match status.as_str() {
                    "on" | "true" => true,
                    "off" | "false" => false,
                    other => {
                        return CommandExecutionResult::Error(format!(
                            "Invalid premium status '{}', expected on or off",
                            other
                        ))
                    }
                };
                if self.session.premium().set(is_premium) {
                    cli_style::print_success(&format!("Premium set to {}", is_premium));
                } else {
                    cli_style::print_warning(&format!("Premium already {}", is_premium));
                }
                CommandExecutionResult::Ok
            }
            InnerCommand::Flush => {
                let flushed = self.runtime.block_on(self.session.flush_pending());
                cli_style::print_success(&format!(
                    "Flushed {} record(s), {} still pending",
                    flushed,
                    self.session.pending_len()
                ));
                CommandExecutionResult::Ok
            }
            InnerCommand::Settle => {
                let reports = self.runtime.block_on(self.session.settle());
                for report in reports {
                    let mut message = format!(
                        "{} completed, {} minutes",
                        report.record.title, report.record.total_runtime_minutes
                    );
                    if let Some(err) = &report.metadata_error {
                        message.push_str(&format!(" ({})", err));
                    }
                    if report.persisted {
                        cli_style::print_success(&message);
                    } else {
                        cli_style::print_warning(&format!("{}, queued for sync", message));
                    }
                }
                CommandExecutionResult::Ok
            }
            InnerCommand::Metrics => {
                println!("{}", metrics::gather_text());
                CommandExecutionResult::Ok
            }
            InnerCommand::Where => {
                println!("{}", self.db_path);
                CommandExecutionResult::Ok
            }
            InnerCommand::Exit => CommandExecutionResult::Exit,
        };

        self.drain_events();
        result
    }

    fn report_mutation<'a, F, Fut>(&'a self, mutation: F) -> CommandExecutionResult
    where
        F: FnOnce(&'a TrackingSession) -> Fut,
        Fut: std::future::Future<Output = Result<MutationOutcome, TrackingError>>,
    {
        match self.runtime.block_on(mutation(&self.session)) {
            Ok(outcome) => {
                let message = match outcome.confirmation {
                    Confirmation::Unchanged => {
                        format!("Title {} unchanged", outcome.title_id)
                    }
                    Confirmation::Confirmed { attempts } => format!(
                        "Title {}: {} -> {} ({} attempt(s))",
                        outcome.title_id,
                        format_list(outcome.previous),
                        format_list(outcome.current),
                        attempts
                    ),
                };
                cli_style::print_success(&message);
                CommandExecutionResult::Ok
            }
            Err(err) => CommandExecutionResult::Error(err.to_string()),
        }
    }

    fn print_list(&self, kind: ListKind) {
        let entries = self.session.list(kind);
        cli_style::print_section_header(&format!("{} ({})", kind, entries.len()));
        if entries.is_empty() {
            cli_style::print_empty_list("Empty");
        }
        for entry in entries {
            let item = match entry.progress {
                Some(progress) => format!(
                    "{}  {}/{}",
                    entry.title_id, progress.current_unit, progress.total_units
                ),
                None => entry.title_id.to_string(),
            };
            cli_style::print_list_item(&item, colors::WHITE);
        }
        cli_style::print_section_footer();
    }

    fn print_stats(&self) {
        let stats = self.session.stats();
        let counts = self.session.counts();
        cli_style::print_section_header("Stats");
        cli_style::print_key_value(
            "Total watch time",
            &format!(
                "{}h {}m",
                stats.total_watch_time_minutes / 60,
                stats.total_watch_time_minutes % 60
            ),
        );
        cli_style::print_key_value(
            "Lists",
            &format!(
                "watching {}, watchlist {}, completed {}",
                counts.watching, counts.watchlist, counts.completed
            ),
        );
        if let Some(actor) = &stats.favorite_actor {
            cli_style::print_key_value(
                "Favorite actor",
                &format!("{} ({} works)", actor.name, actor.works_watched),
            );
        }
        for (genre, count) in &stats.genre_breakdown {
            cli_style::print_list_item(&format!("{}: {}", genre, count), colors::TEAL);
        }
        for (month, minutes) in &stats.monthly_watch_time {
            cli_style::print_list_item(&format!("{}: {} min", month, minutes), colors::DIM);
        }
        cli_style::print_section_footer();
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => print_event(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    cli_style::print_warning(&format!("{} event(s) skipped", skipped));
                }
                Err(_) => break,
            }
        }
    }
}

fn report_ranking(result: Result<RankingOutcome, TrackingError>) -> CommandExecutionResult {
    match result {
        Ok(outcome) => {
            let rank = outcome
                .current_rank
                .map(|r| format!("#{}", r))
                .unwrap_or_else(|| "unranked".to_string());
            cli_style::print_success(&format!("Title {} is {}", outcome.title_id, rank));
            if let Some(evicted) = outcome.evicted {
                cli_style::print_warning(&format!("Title {} dropped out of the top-10", evicted));
            }
            CommandExecutionResult::Ok
        }
        Err(err) => CommandExecutionResult::Error(err.to_string()),
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::AchievementsUnlocked { achievements } => {
            for achievement in achievements {
                cli_style::print_unlock(&achievement.name, achievement.rarity.as_str());
            }
        }
        EngineEvent::ShareOffered { title, .. } => {
            cli_style::print_event(event.event_type(), &format!("Share that you finished {}?", title))
        }
        EngineEvent::MutationRolledBack {
            operation, reason, ..
        } => cli_style::print_error(&format!("{} rolled back: {}", operation, reason)),
        EngineEvent::CompletionRecorded { record, persisted } => cli_style::print_event(
            event.event_type(),
            &format!("{} (persisted: {})", record.title, persisted),
        ),
        _ => cli_style::print_event(event.event_type(), ""),
    }
}

fn format_list(list: Option<ListKind>) -> String {
    list.map(|l| l.to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

#[derive(rustyline_derive::Hinter)]
struct CommandHelper {
    commands_names: Vec<String>,
}

impl CommandHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        CommandHelper { commands_names }
    }
}

impl Completer for CommandHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(' ') {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .cloned()
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for CommandHelper {}
impl Validator for CommandHelper {}
impl Helper for CommandHelper {}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(&app_config.logging_level)),
        )
        .try_init()
        .context("Failed to initialize logging")?;
    metrics::init_metrics();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let db_path = app_config.record_db_path();
    let record_store = Arc::new(SqliteRecordStore::new(&db_path)?);
    let catalog = match &app_config.catalog_path {
        Some(path) => StaticCatalog::from_json_file(path)?,
        None => {
            warn!("No catalog given, completions will use estimated runtimes");
            StaticCatalog::new([])
        }
    };
    let catalog_len = catalog.len();

    let pending_path = app_config.pending_queue_path();
    let carried_over = PendingSyncQueue::load(&pending_path)?;
    let deps = SessionDeps {
        record_store,
        catalog: Arc::new(catalog),
        premium: PremiumStatus::new(cli_args.premium),
    };
    let session = runtime.block_on(TrackingSession::sign_in(
        app_config.user_id,
        deps,
        SessionConfig::from_app_config(&app_config),
        carried_over,
    ))?;
    info!("Signed in as user {}", app_config.user_id);

    cli_style::print_welcome(
        app_config.user_id,
        &db_path.display().to_string(),
        catalog_len,
        session.pending_len(),
    );

    let events = session.subscribe();
    let mut repl = Repl {
        runtime,
        session,
        events,
        db_path: db_path.display().to_string(),
    };

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();
    let mut rl = Editor::<CommandHelper, FileHistory>::with_config(config)?;
    rl.set_helper(Some(CommandHelper::new()));
    let prompt = cli_style::get_prompt();

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                match repl.execute_command(line) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => break,
                    CommandExecutionResult::Error(err) => {
                        cli_style::print_error(&err);
                        repl.drain_events();
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("CTRL-D: exiting.");
                break;
            }
            Err(e) => {
                println!("Error: {:?}", e);
                break;
            }
        }
    }

    let Repl {
        runtime, session, ..
    } = repl;
    let leftover = runtime.block_on(session.sign_out());
    leftover
        .save(&pending_path)
        .with_context(|| format!("Failed to save pending records to {:?}", pending_path))?;
    Ok(())
}
