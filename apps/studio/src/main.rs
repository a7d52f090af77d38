use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    media::file_to_reference,
    persist::{
        capture_referral_from_url, pending_referral_code, stash_landing_url, take_landing_url,
    },
    AccessGate, AppController, AuthUser, FileState, GenerationClient, PersistedState,
    ProfileClient, ProfileService, SearchOrder, SendOutcome, Session, SessionSync,
    ThumbnailFetcher, YoutubeSearchClient,
};
use shared::domain::{AspectRatio, Resolution, UserId};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod chat;
mod report;

#[derive(Parser, Debug)]
#[command(name = "thumbnail-studio", about = "Design viral YouTube thumbnails from the terminal")]
struct Cli {
    #[arg(long, env = "THUMBNAIL_SERVER_URL", default_value = "http://127.0.0.1:8787")]
    server_url: String,
    /// Where guest usage, referral codes and the session are remembered.
    #[arg(long, env = "THUMBNAIL_STATE_FILE")]
    state_file: Option<PathBuf>,
    #[arg(long, env = "YOUTUBE_API_KEY", hide_env_values = true)]
    youtube_api_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remember the `ref` code of an invite link for the next sign-in.
    CaptureReferral { url: String },
    /// Queue a YouTube link as the style source of the next generation.
    Land { youtube_url: String },
    SignIn {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
    },
    SignOut,
    Status,
    /// Generate one thumbnail and save it.
    Generate(GenerateArgs),
    /// Interactive refinement session.
    Chat(SourceArgs),
    Search {
        query: String,
        #[arg(long, default_value = "relevance")]
        order: SearchOrder,
        #[arg(long)]
        page_token: Option<String>,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Video whose thumbnail sets the style.
    #[arg(long)]
    youtube_url: Option<String>,
    /// Photo of the subject to feature.
    #[arg(long)]
    photo: Option<PathBuf>,
    #[arg(long, default_value = "16:9")]
    aspect: AspectRatio,
    #[arg(long, default_value = "1K")]
    resolution: Resolution,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    prompt: Option<String>,
    /// Directory for the saved image.
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

struct Studio {
    http: reqwest::Client,
    server_url: String,
    youtube_api_key: Option<String>,
    state: Arc<dyn PersistedState>,
    profiles: Arc<dyn ProfileService>,
}

impl Studio {
    fn new(cli: &Cli) -> Result<Self> {
        let state_path = match &cli.state_file {
            Some(path) => path.clone(),
            None => default_state_path()?,
        };
        let http = reqwest::Client::new();
        Ok(Self {
            profiles: Arc::new(ProfileClient::new(http.clone(), cli.server_url.clone())),
            state: Arc::new(FileState::open(state_path)?),
            server_url: cli.server_url.clone(),
            youtube_api_key: cli.youtube_api_key.clone(),
            http,
        })
    }

    fn session_sync(&self) -> SessionSync {
        SessionSync::new(self.state.clone(), self.profiles.clone())
    }

    /// Restores the remembered identity and refreshes its profile.
    async fn session(&self) -> Session {
        let sync = self.session_sync();
        let mut session = sync.restore();
        if session.is_signed_in() {
            if let Err(error) = sync.refresh(&mut session).await {
                warn!(%error, "continuing without a synced profile");
            }
        }
        session
    }

    async fn controller(&self, source: &SourceArgs) -> Result<AppController> {
        let gate = AccessGate::new(self.state.clone(), self.profiles.clone());
        let generator = Arc::new(GenerationClient::new(self.http.clone(), self.server_url.clone()));
        let mut controller = AppController::new(gate, generator, self.session().await);

        controller.set_aspect_ratio(source.aspect);
        controller.set_resolution(source.resolution);

        let youtube_url = match &source.youtube_url {
            Some(url) => Some(url.clone()),
            None => take_landing_url(self.state.as_ref())?,
        };
        if let Some(url) = youtube_url {
            let fetcher = ThumbnailFetcher::new(self.http.clone());
            controller.load_style_from_youtube(&fetcher, &url).await?;
        }
        if let Some(photo) = &source.photo {
            controller.set_subject_reference(Some(file_to_reference(photo).await?));
        }
        Ok(controller)
    }
}

fn default_state_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("unable to resolve local app data dir; pass --state-file"))?;
    Ok(base.join("thumbnail_studio").join("state.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let studio = Studio::new(&cli)?;

    match cli.command {
        Command::CaptureReferral { url } => {
            match capture_referral_from_url(studio.state.as_ref(), &url)? {
                Some(code) => println!("saved referral code {code}; it is applied when you sign in"),
                None => println!("no referral code in that link"),
            }
        }
        Command::Land { youtube_url } => {
            if client_core::youtube::video_id(&youtube_url).is_none() {
                bail!("Invalid YouTube URL");
            }
            stash_landing_url(studio.state.as_ref(), &youtube_url)?;
            println!("queued {youtube_url} for the next generation");
        }
        Command::SignIn { user_id, email } => {
            let mut session = Session::guest();
            let user = AuthUser {
                user_id: UserId::new(user_id),
                email,
            };
            let profile = studio.session_sync().sign_in(&mut session, user).await?;
            report::print_profile(&profile);
        }
        Command::SignOut => {
            let sync = studio.session_sync();
            let mut session = sync.restore();
            sync.sign_out(&mut session)?;
            println!("signed out");
        }
        Command::Status => {
            let session = studio.session().await;
            let gate = AccessGate::new(studio.state.clone(), studio.profiles.clone());
            report::print_status(
                &session,
                gate.guest_generations_left(),
                pending_referral_code(studio.state.as_ref()).as_deref(),
            );
        }
        Command::Generate(args) => {
            let mut controller = studio.controller(&args.source).await?;
            let outcome = match args.prompt.as_deref() {
                Some(prompt) => controller.send_message(prompt).await,
                None => controller
                    .generate_initial()
                    .await
                    .ok_or_else(|| anyhow!("provide --youtube-url or --photo to start"))?,
            };
            report::print_outcome(&controller, &outcome);
            if !matches!(outcome, SendOutcome::Generated { .. }) {
                bail!("no thumbnail generated");
            }
            if let Some(path) = controller.save_current_image(&args.out).await? {
                println!("saved {}", path.display());
            }
        }
        Command::Chat(source) => {
            let controller = studio.controller(&source).await?;
            chat::run(controller).await?;
        }
        Command::Search {
            query,
            order,
            page_token,
        } => {
            let client = YoutubeSearchClient::new(studio.http.clone(), studio.youtube_api_key.clone());
            let page = client
                .search_videos(&query, page_token.as_deref(), order)
                .await?;
            report::print_search(&page);
        }
    }

    Ok(())
}
