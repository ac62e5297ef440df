use anyhow::{Context, Result, anyhow};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ReflectConfig;
use reflect_core::breathing::Breathing;
use reflect_core::capabilities::{CommandSynthesizer, LogNotifier, SpeechSynthesizer};
use reflect_core::lock::PinLock;
use reflect_core::mood::{self, DEFAULT_RECENT_LIMIT};
use reflect_core::{
    AppContext, CoachError, CoachSession, GeminiProvider, ModelMode, Mood, MoodEntry, MoodStore,
    OpenAiCompatProvider, ProviderCredentials, ProviderRouter, SYSTEM_INSTRUCTION, SessionStore,
    SettingsStore, Tier, UserSettings, checkin, quote,
};
use reflect_store::ReflectDb;

#[derive(Parser)]
#[command(name = "reflect")]
#[command(version)]
#[command(about = "Reflect: a CBT journaling coach for the terminal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration (keys masked)
    Config,

    /// Show or update saved profile and provider keys (keys are read from stdin)
    Settings {
        #[arg(long)]
        age: Option<u32>,
        /// Prompt for the Groq key used in fast mode
        #[arg(long)]
        fast_key: bool,
        /// Prompt for the DeepSeek key used in deep mode
        #[arg(long)]
        deep_key: bool,
        /// Prompt for the Gemini key used as fallback
        #[arg(long)]
        fallback_key: bool,
    },

    /// Send a single journal entry to the coach
    Ask {
        message: String,
        /// fast or deep
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<ModelMode>,
    },

    /// Interactive journaling session
    Chat {
        /// fast or deep
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<ModelMode>,
        /// Read replies aloud
        #[arg(long)]
        speak: bool,
    },

    /// Archive the current conversation and start fresh
    NewSession,

    /// Show the current conversation, or archived ones
    History {
        /// List this many archived sessions instead
        #[arg(long)]
        archived: Option<usize>,
    },

    /// Log or list moods
    Mood {
        #[command(subcommand)]
        action: MoodCommand,
    },

    /// Mood trend and insight
    Insights,

    /// Daily check-in reminder
    Checkin {
        /// Hide the reminder for the rest of today
        #[arg(long)]
        dismiss: bool,
    },

    /// Today's quote
    Quote,

    /// Guided 4-7-8 breathing
    Breathe {
        #[arg(long, default_value_t = 4)]
        cycles: u32,
    },

    /// Manage the app PIN
    Pin {
        #[command(subcommand)]
        action: PinCommand,
    },
}

#[derive(Subcommand)]
enum MoodCommand {
    /// Record how you feel (joyful, calm, neutral, anxious, distressed)
    Log {
        mood: String,
        /// What's on your mind
        caption: Vec<String>,
    },
    /// Recent entries, newest first
    List {
        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum PinCommand {
    /// Set or replace the 4-digit PIN
    Set,
    /// Remove the PIN
    Clear,
}

fn parse_mode(s: &str) -> Result<ModelMode, String> {
    ModelMode::parse(s).ok_or_else(|| format!("unknown mode '{}' (expected fast or deep)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    if let Commands::Init = cli.command {
        return cmd_init().await;
    }

    let app = App::open(&cli.config)?;
    let mut lock = unlock(&*app.db).await?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Config => cmd_config(&app).await,
        Commands::Settings {
            age,
            fast_key,
            deep_key,
            fallback_key,
        } => {
            let tiers = [
                (Tier::Fast, fast_key),
                (Tier::Deep, deep_key),
                (Tier::Fallback, fallback_key),
            ]
            .into_iter()
            .filter_map(|(tier, wanted)| wanted.then_some(tier))
            .collect::<Vec<_>>();
            let update = settings_update(age, &tiers, prompt_api_key)?;
            cmd_settings(&app, update).await
        }
        Commands::Ask { message, mode } => cmd_ask(&app, &message, mode).await,
        Commands::Chat { mode, speak } => cmd_chat(&app, mode, speak).await,
        Commands::NewSession => cmd_new_session(&app).await,
        Commands::History { archived } => cmd_history(&app, archived).await,
        Commands::Mood { action } => match action {
            MoodCommand::Log { mood, caption } => cmd_mood_log(&app, &mood, &caption.join(" ")).await,
            MoodCommand::List { limit } => cmd_mood_list(&app, limit).await,
        },
        Commands::Insights => cmd_insights(&app).await,
        Commands::Checkin { dismiss } => cmd_checkin(&app, dismiss).await,
        Commands::Quote => cmd_quote(&app).await,
        Commands::Breathe { cycles } => cmd_breathe(cycles).await,
        Commands::Pin { action } => cmd_pin(&mut lock, action).await,
    }
}

/// Everything a command needs once config is loaded
struct App {
    cfg: ReflectConfig,
    db: Arc<ReflectDb>,
    router: Arc<ProviderRouter>,
}

impl App {
    fn open(config_path: &Option<PathBuf>) -> Result<Self> {
        let cfg = ReflectConfig::load(config_path)?;
        let db = Arc::new(
            ReflectDb::new(cfg.storage.db_path()).context("Failed to open reflect database")?,
        );
        let router = Arc::new(build_router(&cfg)?);
        Ok(Self { cfg, db, router })
    }

    async fn sign_in(&self, mode: Option<ModelMode>) -> Result<AppContext> {
        if self.cfg.coach.demo {
            return Ok(AppContext::demo(&self.cfg.user.id));
        }
        AppContext::sign_in(
            &self.cfg.user.id,
            &*self.db,
            &self.cfg.credentials(),
            mode.unwrap_or(self.cfg.coach.default_mode),
        )
        .await
    }

    fn coach(&self) -> Result<CoachSession> {
        let instruction = self.cfg.instruction(SYSTEM_INSTRUCTION)?;
        Ok(CoachSession::new(self.router.clone(), self.db.clone()).with_instruction(&instruction))
    }
}

fn build_router(cfg: &ReflectConfig) -> Result<ProviderRouter> {
    let client = reqwest::Client::builder()
        .timeout(cfg.retry.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let p = &cfg.providers;
    let fast = OpenAiCompatProvider::groq(client.clone())
        .with_base_url(&p.fast.base_url)
        .with_model(&p.fast.model)
        .with_temperature(p.fast.temperature)
        .with_max_tokens(p.fast.max_tokens);
    let deep = OpenAiCompatProvider::deepseek(client.clone())
        .with_base_url(&p.deep.base_url)
        .with_model(&p.deep.model)
        .with_temperature(p.deep.temperature)
        .with_max_tokens(p.deep.max_tokens);
    let fallback = GeminiProvider::new(client)
        .with_base_url(&p.fallback.base_url)
        .with_model(&p.fallback.model);
    debug!(
        "Providers: fast={} deep={} fallback={}",
        p.fast.model, p.deep.model, p.fallback.model
    );

    Ok(
        ProviderRouter::new(Arc::new(fast), Arc::new(deep), Arc::new(fallback))
            .with_retry_policy(cfg.retry.policy()),
    )
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Ask for the PIN when one is set; the returned lock is unlocked
async fn unlock(db: &ReflectDb) -> Result<PinLock<'_>> {
    let mut lock = PinLock::load(db).await?;
    if lock.is_locked() {
        let attempt = prompt("PIN: ")?;
        lock.unlock(&attempt)?;
    }
    Ok(lock)
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config::default_config_path();
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    let data_dir = config_dir.join("data");
    tokio::fs::create_dir_all(&data_dir).await?;

    println!("Reflect initialized at {}", config_dir.display());
    println!(
        "Set GROQ_API_KEY, DEEPSEEK_API_KEY and GEMINI_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(app: &App) -> Result<()> {
    println!("{:#?}", app.cfg);
    Ok(())
}

fn prompt_api_key(tier: Tier) -> Result<String> {
    let provider = match tier {
        Tier::Fast => "Groq",
        Tier::Deep => "DeepSeek",
        Tier::Fallback => "Gemini",
    };
    let key = prompt(&format!("{} API key: ", provider))?;
    if key.is_empty() {
        anyhow::bail!("{} API key is required when --{}-key is given", provider, tier);
    }
    Ok(key)
}

/// Settings update for `age` plus one freshly read key per requested tier
fn settings_update(
    age: Option<u32>,
    tiers: &[Tier],
    mut read_key: impl FnMut(Tier) -> Result<String>,
) -> Result<UserSettings> {
    let mut credentials = ProviderCredentials::default();
    for &tier in tiers {
        let key = Some(read_key(tier)?);
        match tier {
            Tier::Fast => credentials.fast_key = key,
            Tier::Deep => credentials.deep_key = key,
            Tier::Fallback => credentials.fallback_key = key,
        }
    }
    Ok(UserSettings { age, credentials })
}

async fn cmd_settings(app: &App, update: UserSettings) -> Result<()> {
    let user = &app.cfg.user.id;
    let settings = if update == UserSettings::default() {
        app.db.load_settings(user).await?
    } else {
        let merged = app.db.save_settings(user, &update).await?;
        println!("Settings saved.");
        merged
    };

    match settings.age {
        Some(age) => println!("Age:      {}", age),
        None => println!("Age:      (not set)"),
    }
    println!("Keys:     {:?}", settings.credentials);
    Ok(())
}

fn print_reply_error(e: &CoachError) {
    match e {
        CoachError::Router(failure) => println!("Coach unavailable: {}", failure),
        other => println!("{}", other),
    }
}

async fn cmd_ask(app: &App, message: &str, mode: Option<ModelMode>) -> Result<()> {
    let ctx = app.sign_in(mode).await?;
    let coach = app.coach()?;
    coach.load(&ctx).await?;

    match coach.send(&ctx, message).await {
        Ok(Some(reply)) => {
            if let Some(tier) = reply.recovered_via {
                debug!("Answered by {} provider", tier);
            }
            println!("{}", reply.text);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            print_reply_error(&e);
            Err(e.into())
        }
    }
}

async fn cmd_chat(app: &App, mode: Option<ModelMode>, speak: bool) -> Result<()> {
    let mut ctx = app.sign_in(mode).await?;
    let coach = app.coach()?;
    let restored = coach.load(&ctx).await?;

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    let latest = app.db.recent_moods(ctx.user_id(), 1).await?;
    if let Err(e) = checkin::notify_if_due(&*app.db, &LogNotifier, &latest, Utc::now()).await {
        warn!("Check-in reminder failed: {}", e);
    }

    let speaker = (speak || app.cfg.coach.speak_replies).then(CommandSynthesizer::platform_default);

    println!("Reflect ({} mode{})", ctx.mode(), if ctx.is_demo() { ", demo" } else { "" });
    if restored > 0 {
        println!("Restored {} messages from your last session.", restored);
    }
    println!("Commands: /new, /mode fast|deep, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => break,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                match coach.new_session(&ctx).await? {
                    Some(archived) => println!("Archived {} messages. Fresh start.", archived.messages.len()),
                    None => println!("Nothing to archive yet."),
                }
                continue;
            }
            _ => {}
        }
        if let Some(arg) = input.strip_prefix("/mode") {
            match ModelMode::parse(arg.trim()) {
                Some(mode) => {
                    ctx.set_mode(mode);
                    println!("Switched to {} mode.", mode);
                }
                None => println!("Usage: /mode fast|deep"),
            }
            continue;
        }

        let result = tokio::select! {
            result = coach.send(&ctx, input) => result,
            _ = cancel.cancelled() => break,
        };
        match result {
            Ok(Some(reply)) => {
                println!("\n{}\n", reply.text);
                if let Some(synth) = &speaker {
                    tokio::select! {
                        spoken = synth.speak(&reply.text) => {
                            if let Err(e) = spoken {
                                warn!("Could not read reply aloud: {}", e);
                            }
                        }
                        _ = cancel.cancelled() => {
                            let _ = synth.stop().await;
                            break;
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e @ CoachError::Storage(_)) => return Err(e.into()),
            Err(e) => print_reply_error(&e),
        }
    }

    ctx.sign_out();
    println!("Take care.");
    Ok(())
}

async fn cmd_new_session(app: &App) -> Result<()> {
    let ctx = app.sign_in(None).await?;
    let coach = app.coach()?;
    coach.load(&ctx).await?;
    match coach.new_session(&ctx).await? {
        Some(archived) => println!(
            "Archived session {} ({} messages).",
            archived.id,
            archived.messages.len()
        ),
        None => println!("Current session is empty; nothing archived."),
    }
    Ok(())
}

async fn cmd_history(app: &App, archived: Option<usize>) -> Result<()> {
    let user = &app.cfg.user.id;
    if let Some(limit) = archived {
        let sessions = app.db.list_archives(user, limit).await?;
        if sessions.is_empty() {
            println!("No archived sessions.");
        }
        for session in sessions {
            let preview = session
                .messages
                .first()
                .map(|m| m.content.chars().take(60).collect::<String>())
                .unwrap_or_default();
            println!(
                "{}  {:>3} msgs  {}",
                session.archived_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                session.messages.len(),
                preview
            );
        }
        return Ok(());
    }

    let messages = app.db.load_current(user).await?;
    if messages.is_empty() {
        println!("No messages in the current session.");
    }
    for message in messages {
        println!("[{}] {}\n", message.role, message.content);
    }
    Ok(())
}

async fn cmd_mood_log(app: &App, mood: &str, caption: &str) -> Result<()> {
    let mood = Mood::parse(mood).ok_or_else(|| {
        let known: Vec<&str> = Mood::ALL.iter().map(|m| m.label()).collect();
        anyhow!("unknown mood '{}' (expected one of: {})", mood, known.join(", "))
    })?;
    let entry = MoodEntry::new(mood, caption)?;
    app.db.log_mood(&app.cfg.user.id, &entry).await?;
    println!("Logged {}.", entry.mood);
    Ok(())
}

async fn cmd_mood_list(app: &App, limit: usize) -> Result<()> {
    let entries = app.db.recent_moods(&app.cfg.user.id, limit).await?;
    if entries.is_empty() {
        println!("No moods logged yet.");
    }
    for entry in entries {
        println!(
            "{}  {:<14} {}",
            entry.logged_at.with_timezone(&Local).format("%a %d %b %H:%M"),
            entry.mood.to_string(),
            entry.caption
        );
    }
    Ok(())
}

async fn cmd_insights(app: &App) -> Result<()> {
    let recent = app
        .db
        .recent_moods(&app.cfg.user.id, DEFAULT_RECENT_LIMIT)
        .await?;
    let points = mood::trend(&recent);
    for point in &points {
        println!("{:<4} {:<5} {}", point.day, "█".repeat(point.score as usize), point.score);
    }
    println!("\n{}", mood::insight(&points));
    Ok(())
}

async fn cmd_checkin(app: &App, dismiss: bool) -> Result<()> {
    let now = Utc::now();
    if dismiss {
        checkin::dismiss(&*app.db, now).await?;
        println!("Check-in dismissed for today.");
        return Ok(());
    }

    let recent = app.db.recent_moods(&app.cfg.user.id, 1).await?;
    if checkin::is_due(&*app.db, &recent, now).await? {
        checkin::notify_if_due(&*app.db, &LogNotifier, &recent, now).await?;
        println!("How are you feeling today? Log it with `reflect mood log <mood> <caption>`.");
    } else {
        println!("You're all checked in for today.");
    }
    Ok(())
}

async fn cmd_quote(app: &App) -> Result<()> {
    let ctx = app.sign_in(None).await?;
    let recent = app
        .db
        .recent_moods(ctx.user_id(), DEFAULT_RECENT_LIMIT)
        .await?;
    let quote = quote::daily_quote(
        &*app.db,
        &app.router,
        ctx.credentials(),
        &recent,
        Local::now().date_naive(),
        ctx.is_demo(),
    )
    .await?;
    println!("\"{}\"", quote);
    Ok(())
}

async fn cmd_breathe(cycles: u32) -> Result<()> {
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    let mut breathing = Breathing::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    while breathing.completed_cycles() < cycles {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        print!(
            "\r{:<8} {:>2}  (cycle {}/{})",
            breathing.phase().label(),
            breathing.remaining(),
            breathing.completed_cycles() + 1,
            cycles
        );
        io::stdout().flush()?;
        breathing.tick();
    }
    println!("\nWell done.");
    Ok(())
}

async fn cmd_pin(lock: &mut PinLock<'_>, action: PinCommand) -> Result<()> {
    match action {
        PinCommand::Set => {
            let pin = prompt("New PIN: ")?;
            let confirm = prompt("Confirm PIN: ")?;
            lock.set_pin(&pin, &confirm).await?;
            println!("PIN set. Reflect will ask for it on every start.");
        }
        PinCommand::Clear => {
            lock.clear().await?;
            println!("PIN removed.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_keys_are_not_taken_from_argv() {
        assert!(
            Cli::try_parse_from(["reflect", "settings", "--fast-key", "gsk_secret"]).is_err()
        );
        let cli = Cli::try_parse_from(["reflect", "settings", "--age", "30", "--fallback-key"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Settings {
                age: Some(30),
                fast_key: false,
                deep_key: false,
                fallback_key: true,
            }
        ));
    }

    #[test]
    fn test_settings_update_reads_requested_keys() {
        let mut asked = Vec::new();
        let update = settings_update(None, &[Tier::Deep, Tier::Fallback], |tier| {
            asked.push(tier);
            Ok(format!("{}-key", tier))
        })
        .unwrap();
        assert_eq!(asked, vec![Tier::Deep, Tier::Fallback]);
        assert_eq!(update.credentials.fast_key, None);
        assert_eq!(update.credentials.deep_key.as_deref(), Some("deep-key"));
        assert_eq!(update.credentials.fallback_key.as_deref(), Some("fallback-key"));
    }

    #[test]
    fn test_settings_update_without_keys_reads_nothing() {
        let update = settings_update(Some(41), &[], |_| anyhow::bail!("should not prompt")).unwrap();
        assert_eq!(update.age, Some(41));
        assert!(!update.credentials.has_any());
    }
}
