use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Input, Password};
use tracing::info;

mod api;
mod app;
mod conversation;
mod extract;
mod handler;
mod registry;
mod session;
mod tui;
mod ui;

use api::{ApiClient, ChatOutcome};
use app::App;
use conversation::advice_request;
use registry::PlantRegistry;
use session::Session;
use tui::{AppEvent, EventHandler, PollKind, Ticker};

#[derive(Parser)]
#[command(name = "ecobox")]
#[command(version)]
#[command(about = "Asistente de terminal para el monitoreo de plantas EcoBox")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat assistant (default)
    Chat {
        /// Start the conversation about this plant
        #[arg(short, long)]
        plant: Option<i64>,
    },
    /// Sign in and store the API token
    Login {
        #[arg(short, long)]
        email: Option<String>,
        /// Backend API root, e.g. http://localhost:8000/api
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// List your registered plants
    Plants,
    /// Show the dashboard summary
    Dashboard,
    /// Show notifications
    Alerts {
        /// Only unread ones
        #[arg(short, long)]
        unread: bool,
        /// Mark everything listed as read
        #[arg(long)]
        mark_read: bool,
    },
    /// Ask a single question without opening the chat screen
    Ask {
        question: String,
        /// Ask about this plant
        #[arg(short, long)]
        plant: Option<i64>,
    },
}

fn init_logging() -> Result<()> {
    let dir = Session::config_dir()?;
    std::fs::create_dir_all(&dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("ecobox.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecobox=info".into()),
        )
        .with_writer(std::sync::Arc::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn load_session() -> Result<Session> {
    Session::load().context("no hay sesión guardada. Ejecuta `ecobox login` primero")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        None => run_chat(None).await,
        Some(Commands::Chat { plant }) => run_chat(plant).await,
        Some(Commands::Login { email, base_url }) => run_login(email, base_url).await,
        Some(Commands::Logout) => run_logout(),
        Some(Commands::Plants) => run_plants().await,
        Some(Commands::Dashboard) => run_dashboard().await,
        Some(Commands::Alerts { unread, mark_read }) => run_alerts(unread, mark_read).await,
        Some(Commands::Ask { question, plant }) => run_ask(question, plant).await,
    }
}

async fn run_chat(plant: Option<i64>) -> Result<()> {
    let session = load_session()?;
    info!(user = %session.user.email, "starting chat");

    let mut app = App::new(session, plant).await?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut handler = EventHandler::new();
    let tx = handler.sender();

    let mut ticker = Ticker::new();
    ticker.subscribe(
        PollKind::Dashboard,
        std::time::Duration::from_secs(60),
        handler.sender(),
    );
    ticker.subscribe(
        PollKind::Alerts,
        std::time::Duration::from_secs(30),
        handler.sender(),
    );

    let run = run_loop(&mut app, &mut terminal, &mut handler, &tx).await;

    ticker.shutdown();
    tui::restore()?;
    run
}

async fn run_loop(
    app: &mut App,
    terminal: &mut tui::Tui,
    handler: &mut EventHandler,
    tx: &tokio::sync::mpsc::UnboundedSender<AppEvent>,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if let Some(event) = handler.next().await {
            handler::handle_event(app, event, tx).await?;
        } else {
            break;
        }

        // Collect the in-flight turn once the fetch finishes. The 300ms
        // tick guarantees we get here shortly after it does.
        if app
            .turn_task
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(false)
        {
            if let Some(task) = app.turn_task.take() {
                let (request, result) = task.await?;
                app.finish_turn(request, result);
            }
        }
    }
    Ok(())
}

async fn run_login(email: Option<String>, base_url: Option<String>) -> Result<()> {
    let theme = ColorfulTheme::default();

    let email = match email {
        Some(e) => e,
        None => Input::with_theme(&theme)
            .with_prompt("Email")
            .interact_text()?,
    };
    let password = Password::with_theme(&theme)
        .with_prompt("Contraseña")
        .interact()?;

    let base_url = base_url.unwrap_or_else(|| session::DEFAULT_BASE_URL.to_string());
    let api = ApiClient::new(&base_url)?;

    let session = api.login(&email, &password).await?;
    session.save()?;

    println!(
        "{} Sesión iniciada como {}",
        "✓".green().bold(),
        session.user.email.cyan()
    );
    Ok(())
}

fn run_logout() -> Result<()> {
    if Session::exists() {
        Session::clear()?;
        println!("{} Sesión cerrada", "✓".green().bold());
    } else {
        println!("{}", "No había sesión guardada".yellow());
    }
    Ok(())
}

async fn run_plants() -> Result<()> {
    let session = load_session()?;
    let api = ApiClient::from_session(&session)?;
    let plants = api.list_plants().await?;

    if plants.is_empty() {
        println!("{}", "No tienes plantas registradas".yellow());
        return Ok(());
    }

    println!("{}", format!("🌿 Mis plantas ({})", plants.len()).bold());
    for plant in &plants {
        let species = plant.species.as_deref().unwrap_or("especie desconocida");
        println!(
            "  {} {} {} {}",
            format!("#{}", plant.id).dimmed(),
            plant.display_name.green().bold(),
            format!("({})", species).dimmed(),
            format!("[{}]", plant.state_label()).yellow(),
        );
    }
    Ok(())
}

async fn run_dashboard() -> Result<()> {
    let session = load_session()?;
    let api = ApiClient::from_session(&session)?;
    let summary = api.dashboard().await?;

    println!("{}", "📊 Resumen EcoBox".bold());
    println!("  Plantas:           {}", summary.total_plantas);
    println!("  Sensores:          {}", summary.total_sensores);
    if summary.plantas_necesitan_agua > 0 {
        println!(
            "  Necesitan agua:    {}",
            summary.plantas_necesitan_agua.to_string().cyan().bold()
        );
    }
    if summary.plantas_criticas > 0 {
        println!(
            "  En estado crítico: {}",
            summary.plantas_criticas.to_string().red().bold()
        );
    }
    if let Some(t) = &summary.temperatura_promedio {
        println!("  Temperatura media: {}", t);
    }
    if let Some(h) = &summary.humedad_promedio {
        println!("  Humedad media:     {}", h);
    }
    if let Some(ts) = &summary.ultima_actualizacion {
        println!("  {}", format!("Actualizado: {}", ts).dimmed());
    }
    Ok(())
}

async fn run_alerts(unread: bool, mark_read: bool) -> Result<()> {
    let session = load_session()?;
    let api = ApiClient::from_session(&session)?;
    let notifications = api.notifications(unread).await?;

    if notifications.is_empty() {
        println!("{}", "Sin notificaciones".green());
        return Ok(());
    }

    for n in &notifications {
        let marker = if n.leida { " " } else { "●" };
        let tipo = n.tipo.as_deref().unwrap_or("info");
        let line = format!("{} [{}] {}", marker, tipo, n.mensaje);
        match tipo {
            "critico" | "error" => println!("{}", line.red()),
            "advertencia" => println!("{}", line.yellow()),
            _ => println!("{}", line),
        }
        if let Some(fecha) = &n.fecha {
            println!("    {}", fecha.dimmed());
        }
    }

    if mark_read {
        for n in notifications.iter().filter(|n| !n.leida) {
            api.mark_notification_read(n.id).await?;
        }
        println!("{} Marcadas como leídas", "✓".green().bold());
    }
    Ok(())
}

async fn run_ask(question: String, plant: Option<i64>) -> Result<()> {
    let session = load_session()?;
    let api = ApiClient::from_session(&session)?;

    let registry = match api.list_plants().await {
        Ok(plants) => PlantRegistry::from_plants(plants),
        Err(_) => PlantRegistry::new(),
    };

    if let Some(id) = plant {
        if registry.by_id(id).is_none() {
            bail!("no existe la planta #{}", id);
        }
    }

    let request = advice_request(question.clone(), &question, plant, &registry);

    println!("{}", "Pensando...".dimmed());
    match api.chat(&request).await? {
        ChatOutcome::Answer(text) => {
            if let Some(p) = plant.and_then(|id| registry.by_id(id)) {
                println!("{}", format!("🌱 {}", p.display_name).green().bold());
            }
            println!("{}", text);
        }
        ChatOutcome::Empty => {
            println!("{}", conversation::templated_status_reply(plant, &registry));
        }
        ChatOutcome::Failure(reason) => {
            bail!("el asistente no pudo responder: {}", reason);
        }
    }
    Ok(())
}
