use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use humaniq::api::types::{
    CertificateRequest, ChallengeFilter, ChallengeSubmission, PageRequest, PostDraft, PostPatch, ProfileUpdate,
    SkillScores,
};
use humaniq::api::{auth, badges, certificates, challenges, forum, skills, users};
use humaniq::config::{ConfigError, Timeouts};
use humaniq::{
    ApiContract, App, AuthError, AuthState, ClientConfig, GuardOutcome, Navigation, PageScope, RequestError, RetryPolicy,
    RouteGuard, navigate,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("not signed in; run `humaniq login` first")]
    NotSignedIn,
    #[error("already signed in as {0}; run `humaniq logout` first")]
    AlreadySignedIn(String),
    #[error("interrupted")]
    Cancelled,
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "humaniq", about = "HUMANIQ learning platform client")]
struct Cli {
    #[arg(long, env = "HUMANIQ_API_URL", default_value = humaniq::config::DEFAULT_API_URL)]
    api_url: String,

    /// Backend auth contract: `v1` or `v2`.
    #[arg(long, env = "HUMANIQ_API_CONTRACT")]
    contract: Option<ApiContract>,

    #[arg(long, env = "HUMANIQ_SESSION_FILE", default_value = ".humaniq-session.json")]
    session_file: PathBuf,

    #[arg(long, env = "HUMANIQ_REQUEST_TIMEOUT_SECS", default_value_t = humaniq::config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    #[arg(long, env = "HUMANIQ_CONNECT_TIMEOUT_SECS", default_value_t = humaniq::config::DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    /// Extra attempts for failed GET requests.
    #[arg(long, env = "HUMANIQ_RETRY_MAX", default_value_t = humaniq::config::DEFAULT_RETRY_MAX)]
    retry_max: u32,

    #[arg(long, env = "HUMANIQ_RETRY_INITIAL_BACKOFF_MS", default_value_t = humaniq::config::DEFAULT_RETRY_INITIAL_BACKOFF_MS)]
    retry_initial_backoff_ms: u64,

    #[arg(long, env = "HUMANIQ_RETRY_MAX_BACKOFF_MS", default_value_t = humaniq::config::DEFAULT_RETRY_MAX_BACKOFF_MS)]
    retry_max_backoff_ms: u64,

    /// Log requests and session transitions to stderr.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "HUMANIQ_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "HUMANIQ_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Print the signed-in user.
    Whoami,
    /// Rotate the access credential (v2 contract only).
    Refresh,
    /// Show where navigating to PATH would land right now.
    Route {
        path: String,
    },
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
    Profile(ProfileCommand),
    Challenges(ChallengesCommand),
    Badges(BadgesCommand),
    Forum(ForumCommand),
    Certificates(CertificatesCommand),
    Assessment(AssessmentCommand),
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    Update {
        #[arg(long)]
        name: Option<String>,
    },
    Progress,
}

#[derive(Args, Debug)]
struct ChallengesCommand {
    #[command(subcommand)]
    command: ChallengesSubcommand,
}

#[derive(Subcommand, Debug)]
enum ChallengesSubcommand {
    List {
        #[arg(long)]
        skill: Option<String>,
        #[arg(long = "type")]
        challenge_type: Option<String>,
    },
    Show {
        id: i64,
    },
    Start {
        id: i64,
    },
    Submit {
        id: i64,
        #[command(flatten)]
        submission: SubmissionArgs,
    },
    Complete {
        id: i64,
        #[command(flatten)]
        submission: SubmissionArgs,
    },
}

#[derive(Args, Debug)]
struct SubmissionArgs {
    #[arg(long)]
    score: Option<i64>,
    #[arg(long)]
    feedback: Option<String>,
    #[arg(long)]
    answer: Option<String>,
}

impl From<SubmissionArgs> for ChallengeSubmission {
    fn from(args: SubmissionArgs) -> Self {
        Self { score: args.score, feedback: args.feedback, answer: args.answer }
    }
}

#[derive(Args, Debug)]
struct BadgesCommand {
    #[command(subcommand)]
    command: BadgesSubcommand,
}

#[derive(Subcommand, Debug)]
enum BadgesSubcommand {
    List,
    Show { id: i64 },
    Mine,
    Leaderboard,
}

#[derive(Args, Debug)]
struct ForumCommand {
    #[command(subcommand)]
    command: ForumSubcommand,
}

#[derive(Subcommand, Debug)]
enum ForumSubcommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },
    Show {
        id: i64,
    },
    Post {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    Delete {
        id: i64,
    },
    Comment {
        post_id: i64,
        content: String,
    },
    Uncomment {
        post_id: i64,
        comment_id: i64,
    },
}

#[derive(Args, Debug)]
struct CertificatesCommand {
    #[command(subcommand)]
    command: CertificatesSubcommand,
}

#[derive(Subcommand, Debug)]
enum CertificatesSubcommand {
    List,
    Show {
        id: i64,
    },
    Generate {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Args, Debug)]
struct AssessmentCommand {
    #[command(subcommand)]
    command: AssessmentSubcommand,
}

#[derive(Subcommand, Debug)]
enum AssessmentSubcommand {
    /// Most recent assessment.
    Show,
    History,
    Submit(ScoresArgs),
}

/// Likert scores, 1 (weak) to 5 (strong).
#[derive(Args, Debug)]
struct ScoresArgs {
    #[arg(long)]
    communication: u8,
    #[arg(long)]
    active_listening: u8,
    #[arg(long)]
    conflict_resolution: u8,
    #[arg(long)]
    teamwork: u8,
    #[arg(long)]
    critical_thinking: u8,
    #[arg(long)]
    time_management: u8,
}

impl From<ScoresArgs> for SkillScores {
    fn from(args: ScoresArgs) -> Self {
        Self {
            communication: args.communication,
            active_listening: args.active_listening,
            conflict_resolution: args.conflict_resolution,
            teamwork: args.teamwork,
            critical_thinking: args.critical_thinking,
            time_management: args.time_management,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Must run before parsing so `.env` values reach clap's env fallbacks.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("humaniq=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn client_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    let contract = cli.contract.ok_or(ConfigError::MissingContract)?;
    let mut config = ClientConfig::new(contract)
        .with_base_url(&cli.api_url)
        .with_session_file(cli.session_file.clone())
        .with_retry(RetryPolicy {
            max_retries: cli.retry_max,
            initial_backoff: Duration::from_millis(cli.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(cli.retry_max_backoff_ms),
        });
    config.timeouts = Timeouts { request_secs: cli.request_timeout_secs, connect_secs: cli.connect_timeout_secs };
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = client_config(&cli)?;
    let app = App::from_config(&config)?;
    let state = app.start().await;
    tracing::debug!(phase = ?state.phase, "session resolved");

    let scope = Arc::new(PageScope::new());
    let interrupt = {
        let scope = scope.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                scope.cancel();
            }
        })
    };

    let result = dispatch(&app, &state, &scope, cli.command).await;
    interrupt.abort();
    app.teardown();
    result
}

async fn dispatch(app: &App, state: &AuthState, scope: &PageScope, command: Command) -> Result<(), CliError> {
    let gw = app.gateway();
    match command {
        Command::Login { email, password } => {
            public_page(state)?;
            let user = cancellable(scope, app.auth().login(&email, &password)).await??;
            print_json(&user)
        }
        Command::Register { name, email, password } => {
            public_page(state)?;
            let user = cancellable(scope, app.auth().register(&name, &email, &password)).await??;
            print_json(&user)
        }
        Command::Logout => {
            app.auth().logout();
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            protected_page(state)?;
            match &state.user {
                Some(user) => print_json(user),
                None => Err(CliError::NotSignedIn),
            }
        }
        Command::Refresh => {
            protected_page(state)?;
            cancellable(scope, app.auth().refresh()).await??;
            println!("access credential rotated");
            Ok(())
        }
        Command::Route { path } => {
            match navigate(&path, state) {
                Navigation::Loading => println!("loading"),
                Navigation::Render(route) => println!("render {route}"),
                Navigation::Redirect(route) => println!("redirect {route}"),
            }
            Ok(())
        }
        Command::Password { current, new } => {
            protected_page(state)?;
            page(app, scope, auth::change_password(gw, &current, &new)).await
        }
        Command::Profile(profile) => {
            protected_page(state)?;
            match profile.command {
                ProfileSubcommand::Show => page(app, scope, users::profile(gw)).await,
                ProfileSubcommand::Update { name } => {
                    page(app, scope, users::update_profile(gw, &ProfileUpdate { name })).await
                }
                ProfileSubcommand::Progress => page(app, scope, users::progress(gw)).await,
            }
        }
        Command::Challenges(cmd) => {
            protected_page(state)?;
            run_challenges(app, scope, cmd).await
        }
        Command::Badges(cmd) => {
            protected_page(state)?;
            match cmd.command {
                BadgesSubcommand::List => page(app, scope, badges::list(gw)).await,
                BadgesSubcommand::Show { id } => page(app, scope, badges::get(gw, id)).await,
                BadgesSubcommand::Mine => page(app, scope, badges::mine(gw)).await,
                BadgesSubcommand::Leaderboard => page(app, scope, badges::leaderboard(gw)).await,
            }
        }
        Command::Forum(cmd) => {
            protected_page(state)?;
            run_forum(app, scope, cmd).await
        }
        Command::Certificates(cmd) => {
            protected_page(state)?;
            match cmd.command {
                CertificatesSubcommand::List => page(app, scope, certificates::list(gw)).await,
                CertificatesSubcommand::Show { id } => page(app, scope, certificates::get(gw, id)).await,
                CertificatesSubcommand::Generate { title, description } => {
                    let request = CertificateRequest { title, description };
                    page(app, scope, certificates::generate(gw, &request)).await
                }
            }
        }
        Command::Assessment(cmd) => {
            protected_page(state)?;
            match cmd.command {
                AssessmentSubcommand::Show => page(app, scope, skills::assessment(gw)).await,
                AssessmentSubcommand::History => page(app, scope, skills::history(gw)).await,
                AssessmentSubcommand::Submit(scores) => {
                    let scores = SkillScores::from(scores);
                    page(app, scope, skills::submit_assessment(gw, &scores)).await
                }
            }
        }
    }
}

async fn run_challenges(app: &App, scope: &PageScope, cmd: ChallengesCommand) -> Result<(), CliError> {
    let gw = app.gateway();
    match cmd.command {
        ChallengesSubcommand::List { skill, challenge_type } => {
            let filter = ChallengeFilter { skill_type: skill, challenge_type };
            page(app, scope, challenges::list(gw, &filter)).await
        }
        ChallengesSubcommand::Show { id } => page(app, scope, challenges::get(gw, id)).await,
        ChallengesSubcommand::Start { id } => page(app, scope, challenges::start(gw, id)).await,
        ChallengesSubcommand::Submit { id, submission } => {
            let submission = ChallengeSubmission::from(submission);
            page(app, scope, challenges::submit(gw, id, &submission)).await
        }
        ChallengesSubcommand::Complete { id, submission } => {
            let completion = ChallengeSubmission::from(submission);
            page(app, scope, challenges::complete(gw, id, &completion)).await
        }
    }
}

async fn run_forum(app: &App, scope: &PageScope, cmd: ForumCommand) -> Result<(), CliError> {
    let gw = app.gateway();
    match cmd.command {
        ForumSubcommand::List { page: number, per_page } => {
            page(app, scope, forum::list_posts(gw, PageRequest { page: number, per_page })).await
        }
        ForumSubcommand::Show { id } => page(app, scope, forum::get_post(gw, id)).await,
        ForumSubcommand::Post { title, content } => {
            page(app, scope, forum::create_post(gw, &PostDraft { title, content })).await
        }
        ForumSubcommand::Edit { id, title, content } => {
            page(app, scope, forum::update_post(gw, id, &PostPatch { title, content })).await
        }
        ForumSubcommand::Delete { id } => page(app, scope, forum::delete_post(gw, id)).await,
        ForumSubcommand::Comment { post_id, content } => {
            page(app, scope, forum::create_comment(gw, post_id, &content)).await
        }
        ForumSubcommand::Uncomment { post_id, comment_id } => {
            page(app, scope, forum::delete_comment(gw, post_id, comment_id)).await
        }
    }
}

/// Gate a command the way a protected page is gated.
fn protected_page(state: &AuthState) -> Result<(), CliError> {
    match RouteGuard::RequiresSession.render(state, || ()) {
        GuardOutcome::Render(()) => Ok(()),
        GuardOutcome::Loading | GuardOutcome::Redirect(_) => Err(CliError::NotSignedIn),
    }
}

fn public_page(state: &AuthState) -> Result<(), CliError> {
    match RouteGuard::RequiresNoSession.render(state, || ()) {
        GuardOutcome::Redirect(_) => {
            let email = state.user.as_ref().map(|u| u.email.clone()).unwrap_or_default();
            Err(CliError::AlreadySignedIn(email))
        }
        GuardOutcome::Loading | GuardOutcome::Render(()) => Ok(()),
    }
}

async fn cancellable<T>(scope: &PageScope, work: impl Future<Output = T>) -> Result<T, CliError> {
    scope.run(work).await.ok_or(CliError::Cancelled)
}

/// Run one domain call as a page would and print its result.
async fn page<T: Serialize>(
    app: &App,
    scope: &PageScope,
    call: impl Future<Output = Result<T, RequestError>>,
) -> Result<(), CliError> {
    let value = cancellable(scope, app.auth().run(call)).await??;
    print_json(&value)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
